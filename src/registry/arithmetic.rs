//! Per-pixel arithmetic and image statistics.

use super::{ArgumentSpec, Arguments, Operation, OperationError, Registry};
use crate::image::interleaved_u8;
use crate::value::{Kind, Value};
use image::DynamicImage;

pub(super) fn register(registry: &mut Registry) {
    registry.register(Invert);
    registry.register(Avg);
    registry.register(Max);
    registry.register(GetPoint);
    registry.register(BandJoin);
    registry.register(HasAlpha);
}

const IN: ArgumentSpec = ArgumentSpec::required("in", Kind::Image, "input image");

/// Every sample of `img` in its native range, band-interleaved.
fn samples(img: &DynamicImage) -> Vec<f64> {
    let bytes = img.as_bytes();
    let color = img.color();
    match color.bytes_per_pixel() / color.channel_count() {
        1 => bytes.iter().map(|&b| f64::from(b)).collect(),
        2 => bytes
            .chunks_exact(2)
            .map(|c| f64::from(u16::from_ne_bytes([c[0], c[1]])))
            .collect(),
        _ => bytes
            .chunks_exact(4)
            .map(|c| f64::from(f32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
    }
}

fn bands(img: &DynamicImage) -> usize {
    usize::from(img.color().channel_count())
}

struct Invert;

impl Operation for Invert {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn description(&self) -> &'static str {
        "invert every band of an image"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![IN, ArgumentSpec::output("out", Kind::Image, "output image")]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let mut pixels = args.image("in")?.pixels().clone();
        match &mut pixels {
            DynamicImage::ImageLuma8(b) => invert_u8(b),
            DynamicImage::ImageLumaA8(b) => invert_u8(b),
            DynamicImage::ImageRgb8(b) => invert_u8(b),
            DynamicImage::ImageRgba8(b) => invert_u8(b),
            DynamicImage::ImageLuma16(b) => invert_u16(b),
            DynamicImage::ImageLumaA16(b) => invert_u16(b),
            DynamicImage::ImageRgb16(b) => invert_u16(b),
            DynamicImage::ImageRgba16(b) => invert_u16(b),
            DynamicImage::ImageRgb32F(b) => invert_f32(b),
            DynamicImage::ImageRgba32F(b) => invert_f32(b),
            other => {
                return Err(OperationError(format!(
                    "invert: unsupported color type {:?}",
                    other.color()
                )));
            }
        }
        let out = args.new_image(pixels);
        args.set_output("out", Value::Image(out))
    }
}

fn invert_u8(samples: &mut [u8]) {
    samples.iter_mut().for_each(|s| *s = u8::MAX - *s);
}

fn invert_u16(samples: &mut [u16]) {
    samples.iter_mut().for_each(|s| *s = u16::MAX - *s);
}

fn invert_f32(samples: &mut [f32]) {
    samples.iter_mut().for_each(|s| *s = 1.0 - *s);
}

struct Avg;

impl Operation for Avg {
    fn name(&self) -> &'static str {
        "avg"
    }

    fn description(&self) -> &'static str {
        "find the mean of all samples"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![IN, ArgumentSpec::output("out", Kind::Double, "mean sample value")]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let values = samples(args.image("in")?.pixels());
        let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
        args.set_output("out", Value::Double(mean))
    }
}

struct Max;

impl Operation for Max {
    fn name(&self) -> &'static str {
        "max"
    }

    fn description(&self) -> &'static str {
        "find the largest sample and where it is"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::output("out", Kind::Double, "largest sample value"),
            ArgumentSpec::output("x", Kind::Int, "column of the first maximum"),
            ArgumentSpec::output("y", Kind::Int, "row of the first maximum"),
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let pixels = args.image("in")?.pixels();
        let (band_count, width) = (bands(pixels), pixels.width() as usize);
        let (index, value) = samples(pixels)
            .into_iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });
        let pixel = index / band_count;
        args.set_output("out", Value::Double(value))?;
        args.set_output("x", Value::Int((pixel % width) as i64))?;
        args.set_output("y", Value::Int((pixel / width) as i64))
    }
}

struct GetPoint;

impl Operation for GetPoint {
    fn name(&self) -> &'static str {
        "getpoint"
    }

    fn description(&self) -> &'static str {
        "read the bands of one pixel"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::required("x", Kind::Int, "column"),
            ArgumentSpec::required("y", Kind::Int, "row"),
            ArgumentSpec::output("out_array", Kind::DoubleArray, "band values"),
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let (x, y) = (args.int("x")?, args.int("y")?);
        let pixels = args.image("in")?.pixels();
        let inside = (0..i64::from(pixels.width())).contains(&x)
            && (0..i64::from(pixels.height())).contains(&y);
        if !inside {
            return Err(OperationError(format!(
                "getpoint: point ({x}, {y}) is outside the image"
            )));
        }
        let band_count = bands(pixels);
        let start = (y as usize * pixels.width() as usize + x as usize) * band_count;
        let point = samples(pixels)[start..start + band_count].to_vec();
        args.set_output("out_array", Value::DoubleArray(point))
    }
}

struct BandJoin;

impl Operation for BandJoin {
    fn name(&self) -> &'static str {
        "bandjoin"
    }

    fn description(&self) -> &'static str {
        "join the bands of several images"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            ArgumentSpec::required("in", Kind::ImageArray, "images to join"),
            ArgumentSpec::output("out", Kind::Image, "output image"),
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let images = args.image_array("in")?;
        let Some(first) = images.first() else {
            return Err(OperationError::new("bandjoin: no input images"));
        };
        let (width, height) = (first.width(), first.height());
        for image in images {
            if (image.width(), image.height()) != (width, height) {
                return Err(OperationError::new("bandjoin: images must match in size"));
            }
            if image.pixels().color().bytes_per_pixel() != image.pixels().color().channel_count() {
                return Err(OperationError::new("bandjoin: only 8-bit images are supported"));
            }
        }
        let total: u32 = images.iter().map(|image| image.bands()).sum();

        let pixel_count = width as usize * height as usize;
        let mut joined = Vec::with_capacity(pixel_count * total as usize);
        for pixel in 0..pixel_count {
            for image in images {
                let band_count = image.bands() as usize;
                let start = pixel * band_count;
                joined.extend_from_slice(&image.pixels().as_bytes()[start..start + band_count]);
            }
        }
        let pixels = interleaved_u8(width, height, total, joined).ok_or_else(|| {
            OperationError(format!("bandjoin: {total} bands is more than 4"))
        })?;
        let out = args.new_image(pixels);
        args.set_output("out", Value::Image(out))
    }
}

struct HasAlpha;

impl Operation for HasAlpha {
    fn name(&self) -> &'static str {
        "hasalpha"
    }

    fn description(&self) -> &'static str {
        "whether an image has an alpha band"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![IN, ArgumentSpec::output("out", Kind::Bool, "true if the last band is alpha")]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let has_alpha = args.image("in")?.has_alpha();
        args.set_output("out", Value::Bool(has_alpha))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::dispatch;
    use crate::error::Error;
    use crate::image::{BandFormat, Image};
    use crate::options::{OptionSet, OptionValue};
    use crate::runtime::Runtime;
    use crate::value::Slot;

    fn runtime() -> Runtime {
        Runtime::startup(RuntimeConfig::default()).unwrap()
    }

    fn image(rt: &Runtime, bytes: &[u8], width: u32, height: u32, bands: u32) -> Image {
        Image::from_memory(rt, bytes, width, height, bands, BandFormat::UChar).unwrap()
    }

    #[test]
    fn invert_flips_every_band() {
        let rt = runtime();
        let source = image(&rt, &[0, 255, 10, 200], 1, 1, 4);
        let out = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image("in", &source),
            OptionValue::output_image("out", &out),
        ]);
        dispatch::call(&rt, "invert", &options).unwrap();
        assert_eq!(out.take().unwrap().to_bytes(), vec![255, 0, 245, 55]);
    }

    #[test]
    fn invert_sixteen_bit() {
        let rt = runtime();
        let bytes: Vec<u8> = [0u16, 1000].iter().flat_map(|s| s.to_ne_bytes()).collect();
        let source = Image::from_memory(&rt, &bytes, 2, 1, 1, BandFormat::UShort).unwrap();
        let out = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image("in", &source),
            OptionValue::output_image("out", &out),
        ]);
        dispatch::call(&rt, "invert", &options).unwrap();
        let expected: Vec<u8> = [65535u16, 64535].iter().flat_map(|s| s.to_ne_bytes()).collect();
        assert_eq!(out.take().unwrap().to_bytes(), expected);
    }

    #[test]
    fn avg_of_all_samples() {
        let rt = runtime();
        let source = image(&rt, &[0, 10, 20, 30], 2, 2, 1);
        let out = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image("in", &source),
            OptionValue::output_double("out", &out),
        ]);
        dispatch::call(&rt, "avg", &options).unwrap();
        assert_eq!(out.get(), Some(15.0));
    }

    #[test]
    fn max_reports_value_and_position() {
        let rt = runtime();
        let source = image(&rt, &[1, 2, 3, 9, 4, 9], 3, 2, 1);
        let (value, x, y) = (Slot::new(), Slot::new(), Slot::new());
        let options = OptionSet::new([
            OptionValue::input_image("in", &source),
            OptionValue::output_double("out", &value),
            OptionValue::output_int("x", &x),
            OptionValue::output_int("y", &y),
        ]);
        dispatch::call(&rt, "max", &options).unwrap();
        assert_eq!(value.get(), Some(9.0));
        assert_eq!((x.get(), y.get()), (Some(0), Some(1)));
    }

    #[test]
    fn max_with_only_main_output() {
        let rt = runtime();
        let source = image(&rt, &[5, 7], 2, 1, 1);
        let value = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image("in", &source),
            OptionValue::output_double("out", &value),
        ]);
        dispatch::call(&rt, "max", &options).unwrap();
        assert_eq!(value.get(), Some(7.0));
    }

    #[test]
    fn getpoint_reads_bands() {
        let rt = runtime();
        let source = image(&rt, &[1, 2, 3, 4, 5, 6], 2, 1, 3);
        let point = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image("in", &source),
            OptionValue::input_int("x", 1),
            OptionValue::input_int("y", 0),
            OptionValue::output_double_array("out_array", &point),
        ]);
        dispatch::call(&rt, "getpoint", &options).unwrap();
        assert_eq!(point.get(), Some(vec![4.0, 5.0, 6.0]));
    }

    #[test]
    fn getpoint_outside_fails() {
        let rt = runtime();
        let source = image(&rt, &[1], 1, 1, 1);
        let point: Slot<Vec<f64>> = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image("in", &source),
            OptionValue::input_int("x", 1),
            OptionValue::input_int("y", 0),
            OptionValue::output_double_array("out_array", &point),
        ]);
        assert!(matches!(
            dispatch::call(&rt, "getpoint", &options),
            Err(Error::OperationFailed { .. })
        ));
    }

    #[test]
    fn bandjoin_interleaves() {
        let rt = runtime();
        let rgb = image(&rt, &[1, 2, 3, 4, 5, 6], 2, 1, 3);
        let alpha = image(&rt, &[255, 128], 2, 1, 1);
        let out = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image_array("in", &[rgb.clone(), alpha]),
            OptionValue::output_image("out", &out),
        ]);
        dispatch::call(&rt, "bandjoin", &options).unwrap();
        let joined = out.take().unwrap();
        assert_eq!(joined.bands(), 4);
        assert!(joined.has_alpha());
        assert_eq!(joined.to_bytes(), vec![1, 2, 3, 255, 4, 5, 6, 128]);
        // History follows the first image of the array.
        assert_eq!(joined.call_event_log().len(), 1);
        assert!(rgb.call_event_log().is_empty());
    }

    #[test]
    fn bandjoin_rejects_too_many_bands() {
        let rt = runtime();
        let rgb = image(&rt, &[1, 2, 3], 1, 1, 3);
        let out: Slot<Image> = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image_array("in", &[rgb.clone(), rgb]),
            OptionValue::output_image("out", &out),
        ]);
        assert!(dispatch::call(&rt, "bandjoin", &options).is_err());
    }

    #[test]
    fn hasalpha_answers() {
        let rt = runtime();
        for (bands, expected) in [(1, false), (2, true), (3, false), (4, true)] {
            let source = image(&rt, &vec![0; bands as usize], 1, 1, bands);
            let out = Slot::new();
            let options = OptionSet::new([
                OptionValue::input_image("in", &source),
                OptionValue::output_bool("out", &out),
            ]);
            dispatch::call(&rt, "hasalpha", &options).unwrap();
            assert_eq!(out.get(), Some(expected), "{bands} bands");
        }
    }
}
