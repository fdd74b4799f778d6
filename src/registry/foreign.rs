//! Loaders and savers, built on the pure-Rust `image` codecs.
//!
//! ## Format mapping
//!
//! | Format | Suffixes | Load | Save | Save options |
//! |---|---|---|---|---|
//! | JPEG | `jpg`, `jpeg`, `jpe` | `jpegload` (`shrink`) | `jpegsave` | `Q` |
//! | PNG | `png` | `pngload` | `pngsave` | `compression` |
//! | WebP | `webp` | `webpload` | `webpsave` (lossless) | none |
//! | TIFF | `tif`, `tiff` | `tiffload` | `tiffsave` | none |
//! | GIF | `gif` | `gifload` | none | none |
//! | AVIF | `avif` | none | `heifsave` (rav1e) | `Q`, `speed` |
//!
//! Every loader and saver exists twice: the plain name works on a file
//! (`filename` argument), the `_buffer` variant on a blob (`buffer`
//! argument). AVIF is save-only: the `image` crate's `avif` feature provides
//! the rav1e encoder but no decoder.

use super::{
    ArgumentSpec, Arguments, ForeignRole, ForeignSpec, ForeignTarget, Operation, OperationError,
    Registry,
};
use crate::value::{Kind, Value};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::tiff::TiffEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageFormat};
use std::borrow::Cow;
use std::io::Cursor;

/// One codec and the operation names it provides.
struct Format {
    format: ImageFormat,
    suffixes: &'static [&'static str],
    /// `(file, buffer)` loader names.
    load: Option<(&'static str, &'static str)>,
    /// `(file, buffer)` saver names.
    save: Option<(&'static str, &'static str)>,
    priority: i32,
}

const FORMATS: &[Format] = &[
    Format {
        format: ImageFormat::Jpeg,
        suffixes: &["jpg", "jpeg", "jpe"],
        load: Some(("jpegload", "jpegload_buffer")),
        save: Some(("jpegsave", "jpegsave_buffer")),
        priority: 50,
    },
    Format {
        format: ImageFormat::Png,
        suffixes: &["png"],
        load: Some(("pngload", "pngload_buffer")),
        save: Some(("pngsave", "pngsave_buffer")),
        priority: 40,
    },
    Format {
        format: ImageFormat::WebP,
        suffixes: &["webp"],
        load: Some(("webpload", "webpload_buffer")),
        save: Some(("webpsave", "webpsave_buffer")),
        priority: 30,
    },
    Format {
        format: ImageFormat::Tiff,
        suffixes: &["tif", "tiff"],
        load: Some(("tiffload", "tiffload_buffer")),
        save: Some(("tiffsave", "tiffsave_buffer")),
        priority: 20,
    },
    Format {
        format: ImageFormat::Gif,
        suffixes: &["gif"],
        load: Some(("gifload", "gifload_buffer")),
        save: None,
        priority: 10,
    },
    Format {
        format: ImageFormat::Avif,
        suffixes: &["avif"],
        load: None,
        save: Some(("heifsave", "heifsave_buffer")),
        priority: 0,
    },
];

pub(super) fn register(registry: &mut Registry) {
    for format in FORMATS {
        if format.load.is_some() {
            registry.register(Loader { format, target: ForeignTarget::File });
            registry.register(Loader { format, target: ForeignTarget::Buffer });
        }
        if format.save.is_some() {
            registry.register(Saver { format, target: ForeignTarget::File });
            registry.register(Saver { format, target: ForeignTarget::Buffer });
        }
    }
}

fn pick(names: Option<(&'static str, &'static str)>, target: ForeignTarget) -> &'static str {
    match (names, target) {
        (Some((file, _)), ForeignTarget::File) => file,
        (Some((_, buffer)), ForeignTarget::Buffer) => buffer,
        (None, _) => "",
    }
}

// ============================================================================
// Loading
// ============================================================================

struct Loader {
    format: &'static Format,
    target: ForeignTarget,
}

impl Operation for Loader {
    fn name(&self) -> &'static str {
        pick(self.format.load, self.target)
    }

    fn description(&self) -> &'static str {
        match self.target {
            ForeignTarget::File => "load an image from a file",
            ForeignTarget::Buffer => "load an image from a buffer",
        }
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        let mut args = vec![match self.target {
            ForeignTarget::File => ArgumentSpec::required("filename", Kind::String, "file to load from"),
            ForeignTarget::Buffer => ArgumentSpec::required("buffer", Kind::Blob, "buffer to load from"),
        }];
        if self.format.format == ImageFormat::Jpeg {
            args.push(ArgumentSpec::optional(
                "shrink",
                Kind::Int,
                "shrink factor on load: 1, 2, 4 or 8",
            ));
        }
        args.push(ArgumentSpec::output("out", Kind::Image, "output image"));
        args
    }

    fn foreign(&self) -> Option<ForeignSpec> {
        Some(ForeignSpec {
            role: ForeignRole::Load,
            target: self.target,
            suffixes: self.format.suffixes,
            format: self.format.format,
            priority: self.format.priority,
        })
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let decoded = match self.target {
            ForeignTarget::File => {
                let path = args.string("filename")?;
                let bytes = std::fs::read(path)
                    .map_err(|e| OperationError(format!("unable to read {path}: {e}")))?;
                image::load_from_memory_with_format(&bytes, self.format.format)
            }
            ForeignTarget::Buffer => {
                image::load_from_memory_with_format(args.blob("buffer")?, self.format.format)
            }
        }
        .map_err(|e| OperationError(format!("{} is not a valid {:?} image: {e}", self.name(), self.format.format)))?;

        let shrink = args.int_or("shrink", 1)?;
        let pixels = match shrink {
            1 => decoded,
            2 | 4 | 8 => {
                let factor = shrink as u32;
                let width = (decoded.width() / factor).max(1);
                let height = (decoded.height() / factor).max(1);
                decoded.resize_exact(width, height, FilterType::Triangle)
            }
            other => {
                return Err(OperationError(format!(
                    "shrink must be 1, 2, 4 or 8, got {other}"
                )));
            }
        };

        let out = args.new_image(pixels);
        args.set_output("out", Value::Image(out))
    }
}

// ============================================================================
// Saving
// ============================================================================

struct Saver {
    format: &'static Format,
    target: ForeignTarget,
}

impl Operation for Saver {
    fn name(&self) -> &'static str {
        pick(self.format.save, self.target)
    }

    fn description(&self) -> &'static str {
        match self.target {
            ForeignTarget::File => "save an image to a file",
            ForeignTarget::Buffer => "save an image to a buffer",
        }
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        let mut args = vec![ArgumentSpec::required("in", Kind::Image, "image to save")];
        if self.target == ForeignTarget::File {
            args.push(ArgumentSpec::required("filename", Kind::String, "file to save to"));
        }
        match self.format.format {
            ImageFormat::Jpeg => {
                args.push(ArgumentSpec::optional("Q", Kind::Int, "quality factor, 1-100"));
            }
            ImageFormat::Avif => {
                args.push(ArgumentSpec::optional("Q", Kind::Int, "quality factor, 1-100"));
                args.push(ArgumentSpec::optional("speed", Kind::Int, "encoder speed, 1-10"));
            }
            ImageFormat::Png => {
                args.push(ArgumentSpec::optional(
                    "compression",
                    Kind::Int,
                    "compression level, 0-9",
                ));
            }
            _ => {}
        }
        if self.target == ForeignTarget::Buffer {
            args.push(ArgumentSpec::output("buffer", Kind::Blob, "buffer to save to"));
        }
        args
    }

    fn foreign(&self) -> Option<ForeignSpec> {
        Some(ForeignSpec {
            role: ForeignRole::Save,
            target: self.target,
            suffixes: self.format.suffixes,
            format: self.format.format,
            priority: self.format.priority,
        })
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let settings = EncodeSettings::from_args(args)?;
        let encoded = encode(self.format.format, args.image("in")?.pixels(), &settings)?;
        if encoded.is_empty() {
            return Err(OperationError::new("encoder wrote no data"));
        }
        match self.target {
            ForeignTarget::File => {
                let path = args.string("filename")?;
                std::fs::write(path, &encoded)
                    .map_err(|e| OperationError(format!("unable to write {path}: {e}")))
            }
            ForeignTarget::Buffer => {
                let blob = args.new_blob(encoded);
                args.set_output("buffer", Value::Blob(blob))
            }
        }
    }
}

struct EncodeSettings {
    quality: u8,
    compression: u32,
    speed: u8,
}

impl EncodeSettings {
    fn from_args(args: &Arguments<'_>) -> Result<Self, OperationError> {
        let defaults = &args.config().save;
        let quality = args.int_or("Q", i64::from(defaults.jpeg_quality))?;
        if !(1..=100).contains(&quality) {
            return Err(OperationError(format!("Q must be 1-100, got {quality}")));
        }
        let compression = args.int_or("compression", i64::from(defaults.png_compression))?;
        if !(0..=9).contains(&compression) {
            return Err(OperationError(format!(
                "compression must be 0-9, got {compression}"
            )));
        }
        let speed = args.int_or("speed", i64::from(defaults.heif_speed))?;
        if !(1..=10).contains(&speed) {
            return Err(OperationError(format!("speed must be 1-10, got {speed}")));
        }
        Ok(Self {
            quality: quality as u8,
            compression: compression as u32,
            speed: speed as u8,
        })
    }
}

/// Convert to a pixel layout the target encoder accepts.
fn encodable(format: ImageFormat, img: &DynamicImage) -> Cow<'_, DynamicImage> {
    let color = img.color();
    let grey = matches!(
        color,
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16
    );
    match format {
        ImageFormat::Jpeg => match color {
            ColorType::L8 | ColorType::Rgb8 => Cow::Borrowed(img),
            _ if grey => Cow::Owned(DynamicImage::ImageLuma8(img.to_luma8())),
            _ => Cow::Owned(DynamicImage::ImageRgb8(img.to_rgb8())),
        },
        ImageFormat::Png => match color {
            ColorType::Rgb32F => Cow::Owned(DynamicImage::ImageRgb16(img.to_rgb16())),
            ColorType::Rgba32F => Cow::Owned(DynamicImage::ImageRgba16(img.to_rgba16())),
            _ => Cow::Borrowed(img),
        },
        ImageFormat::Tiff => match color {
            ColorType::L8 | ColorType::L16 | ColorType::Rgb8 | ColorType::Rgb16 => Cow::Borrowed(img),
            ColorType::Rgba8 | ColorType::Rgba16 => Cow::Borrowed(img),
            ColorType::La8 => Cow::Owned(DynamicImage::ImageRgba8(img.to_rgba8())),
            _ if color.has_alpha() => Cow::Owned(DynamicImage::ImageRgba16(img.to_rgba16())),
            _ => Cow::Owned(DynamicImage::ImageRgb16(img.to_rgb16())),
        },
        _ => match color {
            ColorType::Rgb8 | ColorType::Rgba8 => Cow::Borrowed(img),
            _ if color.has_alpha() => Cow::Owned(DynamicImage::ImageRgba8(img.to_rgba8())),
            _ => Cow::Owned(DynamicImage::ImageRgb8(img.to_rgb8())),
        },
    }
}

fn encode(
    format: ImageFormat,
    img: &DynamicImage,
    settings: &EncodeSettings,
) -> Result<Vec<u8>, OperationError> {
    let img = encodable(format, img);
    let mut buf = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, settings.quality))?
        }
        ImageFormat::Png => {
            let compression = match settings.compression {
                0..=2 => CompressionType::Fast,
                3..=6 => CompressionType::Default,
                _ => CompressionType::Best,
            };
            img.write_with_encoder(PngEncoder::new_with_quality(
                &mut buf,
                compression,
                PngFilter::Adaptive,
            ))?
        }
        ImageFormat::WebP => img.write_with_encoder(WebPEncoder::new_lossless(&mut buf))?,
        ImageFormat::Tiff => {
            let mut cursor = Cursor::new(&mut buf);
            img.write_with_encoder(TiffEncoder::new(&mut cursor))?
        }
        ImageFormat::Avif => img.write_with_encoder(AvifEncoder::new_with_speed_quality(
            &mut buf,
            settings.speed,
            settings.quality,
        ))?,
        other => {
            return Err(OperationError(format!("no encoder for {other:?}")));
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::dispatch;
    use crate::error::Error;
    use crate::image::{BandFormat, Image};
    use crate::options::{OptionSet, OptionValue};
    use crate::runtime::Runtime;
    use crate::value::Slot;
    use crate::blob::Blob;

    fn runtime() -> Runtime {
        Runtime::startup(RuntimeConfig::default()).unwrap()
    }

    fn gradient(rt: &Runtime, width: u32, height: u32) -> Image {
        let bytes: Vec<u8> = (0..height)
            .flat_map(|y| (0..width).flat_map(move |x| [(x % 256) as u8, (y % 256) as u8, 128]))
            .collect();
        Image::from_memory(rt, &bytes, width, height, 3, BandFormat::UChar).unwrap()
    }

    fn save_buffer(rt: &Runtime, op: &str, image: &Image, extra: &[OptionValue<'static>]) -> Vec<u8> {
        let buffer = Slot::new();
        let options = OptionSet::new(extra.iter().cloned()).with([
            OptionValue::input_image("in", image),
            OptionValue::output_blob("buffer", &buffer),
        ]);
        dispatch::call(rt, op, &options).unwrap();
        buffer.take().unwrap().to_vec()
    }

    fn load_buffer(rt: &Runtime, op: &str, bytes: &[u8], extra: &[OptionValue<'static>]) -> Result<Image, Error> {
        let out = Slot::new();
        let options = OptionSet::new(extra.iter().cloned()).with([
            OptionValue::input_blob("buffer", Blob::borrowed(bytes)),
            OptionValue::output_image("out", &out),
        ]);
        dispatch::call(rt, op, &options)?;
        Ok(out.take().unwrap())
    }

    #[test]
    fn every_format_registers_its_operations() {
        let registry = Registry::builtin();
        for name in [
            "jpegload", "jpegload_buffer", "jpegsave", "jpegsave_buffer",
            "pngload", "pngsave_buffer", "webpload_buffer", "tiffsave",
            "gifload_buffer", "heifsave_buffer",
        ] {
            assert!(registry.lookup(name).is_ok(), "missing {name}");
        }
        assert!(registry.lookup("gifsave").is_err());
        assert!(registry.lookup("heifload").is_err());
    }

    #[test]
    fn png_buffer_roundtrip_keeps_pixels() {
        let rt = runtime();
        let image = gradient(&rt, 20, 10);
        let png = save_buffer(&rt, "pngsave_buffer", &image, &[]);
        let loaded = load_buffer(&rt, "pngload_buffer", &png, &[]).unwrap();
        assert_eq!(loaded.to_bytes(), image.to_bytes());
    }

    #[test]
    fn jpeg_shrink_on_load() {
        let rt = runtime();
        let image = gradient(&rt, 64, 32);
        let jpeg = save_buffer(&rt, "jpegsave_buffer", &image, &[OptionValue::input_int("Q", 90)]);
        let loaded = load_buffer(&rt, "jpegload_buffer", &jpeg, &[OptionValue::input_int("shrink", 4)]).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (16, 8));
    }

    #[test]
    fn bad_shrink_is_rejected() {
        let rt = runtime();
        let jpeg = save_buffer(&rt, "jpegsave_buffer", &gradient(&rt, 8, 8), &[]);
        let result = load_buffer(&rt, "jpegload_buffer", &jpeg, &[OptionValue::input_int("shrink", 3)]);
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }

    #[test]
    fn garbage_buffer_fails_to_decode() {
        let rt = runtime();
        let result = load_buffer(&rt, "pngload_buffer", b"definitely not a png", &[]);
        match result {
            Err(Error::OperationFailed { operation, message }) => {
                assert_eq!(operation, "pngload_buffer");
                assert!(message.contains("not a valid"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let rt = runtime();
        let image = gradient(&rt, 4, 4);
        let buffer = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image("in", &image),
            OptionValue::input_int("Q", 0),
            OptionValue::output_blob("buffer", &buffer),
        ]);
        assert!(dispatch::call(&rt, "jpegsave_buffer", &options).is_err());
        assert!(!buffer.is_filled());
    }

    #[test]
    fn file_save_and_load() {
        let rt = runtime();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("out.tiff");
        let path = path.to_str().unwrap();
        let image = gradient(&rt, 12, 9);

        let options = OptionSet::new([
            OptionValue::input_image("in", &image),
            OptionValue::input_string("filename", path),
        ]);
        dispatch::call(&rt, "tiffsave", &options).unwrap();

        let out = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_string("filename", path),
            OptionValue::output_image("out", &out),
        ]);
        dispatch::call(&rt, "tiffload", &options).unwrap();
        let loaded = out.take().unwrap();
        assert_eq!(loaded.to_bytes(), image.to_bytes());
    }

    #[test]
    fn missing_file_reports_path() {
        let rt = runtime();
        let out: Slot<Image> = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_string("filename", "/nonexistent/in.png"),
            OptionValue::output_image("out", &out),
        ]);
        match dispatch::call(&rt, "pngload", &options) {
            Err(Error::OperationFailed { message, .. }) => {
                assert!(message.contains("/nonexistent/in.png"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn encodable_converts_only_when_needed() {
        let rgba = DynamicImage::new_rgba8(2, 2);
        assert!(matches!(encodable(ImageFormat::Png, &rgba), Cow::Borrowed(_)));
        assert_eq!(encodable(ImageFormat::Jpeg, &rgba).color(), ColorType::Rgb8);
        let grey_alpha = DynamicImage::new_luma_a8(2, 2);
        assert_eq!(encodable(ImageFormat::Jpeg, &grey_alpha).color(), ColorType::L8);
        assert_eq!(encodable(ImageFormat::WebP, &grey_alpha).color(), ColorType::Rgba8);
    }

    #[test]
    fn saved_buffer_blob_is_released_once() {
        let rt = runtime();
        let image = gradient(&rt, 4, 4);
        let buffer = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_image("in", &image),
            OptionValue::output_blob("buffer", &buffer),
        ]);
        dispatch::call(&rt, "pngsave_buffer", &options).unwrap();
        assert_eq!(rt.handle_stats().live_blobs, 1);
        drop(options);
        drop(buffer.take());
        let stats = rt.handle_stats();
        assert_eq!(stats.live_blobs, 0);
        assert_eq!(stats.released_blobs, 1);
    }
}
