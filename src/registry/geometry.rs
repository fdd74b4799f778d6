//! Geometric operations: copying, padding, cropping and resampling.
//!
//! Operations that synthesise new pixels (`embed`, `affine`) work on an
//! `Rgba32F` copy of the input and convert back to the input's color type, so
//! every layout the loaders produce is accepted.

use super::{ArgumentSpec, Arguments, Operation, OperationError, Registry};
use crate::image::Header;
use crate::value::{Kind, Value};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, Rgba, Rgba32FImage};

pub(super) fn register(registry: &mut Registry) {
    registry.register(CopyImage);
    registry.register(Embed);
    registry.register(ExtractArea);
    registry.register(Flip);
    registry.register(Rot);
    registry.register(Resize);
    registry.register(Affine);
    registry.register(ThumbnailImage);
}

const IN: ArgumentSpec = ArgumentSpec::required("in", Kind::Image, "input image");
const OUT: ArgumentSpec = ArgumentSpec::output("out", Kind::Image, "output image");

/// Largest width or height an operation will allocate.
const MAX_DIMENSION: i64 = 1 << 16;

/// Largest pixel count of an allocated output.
const MAX_PIXELS: u64 = 1 << 28;

fn dimension(args: &Arguments<'_>, name: &str, value: i64) -> Result<u32, OperationError> {
    if !(1..=MAX_DIMENSION).contains(&value) {
        return Err(OperationError(format!(
            "{}: {name} must be between 1 and {MAX_DIMENSION}, got {value}",
            args.operation()
        )));
    }
    Ok(value as u32)
}

/// Reject outputs whose pixel count exceeds `MAX_PIXELS`.
fn canvas(args: &Arguments<'_>, width: u32, height: u32) -> Result<(u32, u32), OperationError> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > MAX_PIXELS {
        return Err(OperationError(format!(
            "{}: output of {width}x{height} exceeds {MAX_PIXELS} pixels",
            args.operation()
        )));
    }
    Ok((width, height))
}

/// An offset along one axis, limited to `MAX_DIMENSION` either way.
fn offset(args: &Arguments<'_>, name: &str, value: i64) -> Result<i64, OperationError> {
    if !(-MAX_DIMENSION..=MAX_DIMENSION).contains(&value) {
        return Err(OperationError(format!(
            "{}: {name} must be between -{MAX_DIMENSION} and {MAX_DIMENSION}, got {value}",
            args.operation()
        )));
    }
    Ok(value)
}

fn publish(args: &mut Arguments<'_>, pixels: DynamicImage) -> Result<(), OperationError> {
    let out = args.new_image(pixels);
    args.set_output("out", Value::Image(out))
}

/// Convert an `Rgba32F` working copy back to `color`.
fn restore(color: ColorType, work: Rgba32FImage) -> DynamicImage {
    let work = DynamicImage::ImageRgba32F(work);
    match color {
        ColorType::L8 => DynamicImage::ImageLuma8(work.to_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(work.to_luma_alpha8()),
        ColorType::Rgb8 => DynamicImage::ImageRgb8(work.to_rgb8()),
        ColorType::Rgba8 => DynamicImage::ImageRgba8(work.to_rgba8()),
        ColorType::L16 => DynamicImage::ImageLuma16(work.to_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(work.to_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(work.to_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(work.to_rgba16()),
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(work.to_rgb32f()),
        _ => work,
    }
}

/// Largest sample value of `color`, used to scale caller-supplied pixel values.
fn sample_max(color: ColorType) -> f32 {
    match color.bytes_per_pixel() / color.channel_count() {
        1 => 255.0,
        2 => 65535.0,
        _ => 1.0,
    }
}

// ============================================================================
// copy, flip, rot, extract_area
// ============================================================================

struct CopyImage;

impl Operation for CopyImage {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn description(&self) -> &'static str {
        "copy an image"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![IN, OUT]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let pixels = args.image("in")?.pixels().clone();
        publish(args, pixels)
    }
}

struct Flip;

impl Operation for Flip {
    fn name(&self) -> &'static str {
        "flip"
    }

    fn description(&self) -> &'static str {
        "flip an image horizontally or vertically"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::required("direction", Kind::Int, "0 horizontal, 1 vertical"),
            OUT,
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let image = args.image("in")?.pixels();
        let flipped = match args.int("direction")? {
            0 => image.fliph(),
            1 => image.flipv(),
            other => return Err(OperationError(format!("flip: unknown direction {other}"))),
        };
        publish(args, flipped)
    }
}

struct Rot;

impl Operation for Rot {
    fn name(&self) -> &'static str {
        "rot"
    }

    fn description(&self) -> &'static str {
        "rotate an image by a multiple of 90 degrees"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::required("angle", Kind::Int, "0, 1, 2 or 3 quarter turns clockwise"),
            OUT,
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let image = args.image("in")?.pixels();
        let rotated = match args.int("angle")? {
            0 => image.clone(),
            1 => image.rotate90(),
            2 => image.rotate180(),
            3 => image.rotate270(),
            other => return Err(OperationError(format!("rot: unknown angle {other}"))),
        };
        publish(args, rotated)
    }
}

struct ExtractArea;

impl Operation for ExtractArea {
    fn name(&self) -> &'static str {
        "extract_area"
    }

    fn description(&self) -> &'static str {
        "extract a rectangular area from an image"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::required("left", Kind::Int, "left edge of the area"),
            ArgumentSpec::required("top", Kind::Int, "top edge of the area"),
            ArgumentSpec::required("width", Kind::Int, "width of the area"),
            ArgumentSpec::required("height", Kind::Int, "height of the area"),
            OUT,
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let image = args.image("in")?.pixels();
        let (left, top) = (args.int("left")?, args.int("top")?);
        let (width, height) = (args.int("width")?, args.int("height")?);
        let within = |start: i64, len: i64, limit: u32| {
            start >= 0 && len > 0 && start.checked_add(len).is_some_and(|end| end <= i64::from(limit))
        };
        let fits = within(left, width, image.width()) && within(top, height, image.height());
        if !fits {
            return Err(OperationError::new("extract_area: bad extract area"));
        }
        let area = image.crop_imm(left as u32, top as u32, width as u32, height as u32);
        publish(args, area)
    }
}

// ============================================================================
// embed
// ============================================================================

/// How `embed` fills pixels outside the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extend {
    Black,
    Copy,
    Repeat,
    Mirror,
    White,
    Background,
}

impl Extend {
    fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Extend::Black,
            1 => Extend::Copy,
            2 => Extend::Repeat,
            3 => Extend::Mirror,
            4 => Extend::White,
            5 => Extend::Background,
            _ => return None,
        })
    }

    /// Source coordinate for an out-of-range `pos` along an axis of length `len`.
    fn source(self, pos: i64, len: i64) -> Option<i64> {
        match self {
            Extend::Copy => Some(pos.clamp(0, len - 1)),
            Extend::Repeat => Some(pos.rem_euclid(len)),
            Extend::Mirror => {
                let folded = pos.rem_euclid(2 * len);
                Some(if folded >= len { 2 * len - 1 - folded } else { folded })
            }
            Extend::Black | Extend::White | Extend::Background => None,
        }
    }
}

struct Embed;

impl Operation for Embed {
    fn name(&self) -> &'static str {
        "embed"
    }

    fn description(&self) -> &'static str {
        "embed an image in a larger image"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::required("x", Kind::Int, "left edge of input in output"),
            ArgumentSpec::required("y", Kind::Int, "top edge of input in output"),
            ArgumentSpec::required("width", Kind::Int, "output width"),
            ArgumentSpec::required("height", Kind::Int, "output height"),
            ArgumentSpec::optional(
                "extend",
                Kind::Int,
                "0 black, 1 copy, 2 repeat, 3 mirror, 4 white, 5 background",
            ),
            ArgumentSpec::optional("background", Kind::DoubleArray, "pixel value for extend=5"),
            OUT,
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let x = offset(args, "x", args.int("x")?)?;
        let y = offset(args, "y", args.int("y")?)?;
        let width = dimension(args, "width", args.int("width")?)?;
        let height = dimension(args, "height", args.int("height")?)?;
        let (width, height) = canvas(args, width, height)?;
        let code = args.int_or("extend", 0)?;
        let extend = Extend::from_code(code)
            .ok_or_else(|| OperationError(format!("embed: unknown extend mode {code}")))?;

        let source = args.image("in")?.pixels();
        let color = source.color();
        let max = sample_max(color);
        let fill = match extend {
            Extend::White => Rgba([1.0; 4]),
            Extend::Background => {
                background_pixel(args.double_array_opt("background")?.unwrap_or(&[]), max)
            }
            _ => Rgba([0.0; 4]),
        };

        let work = source.to_rgba32f();
        let (src_w, src_h) = (i64::from(work.width()), i64::from(work.height()));
        let embedded = Rgba32FImage::from_fn(width, height, |ox, oy| {
            let sx = i64::from(ox) - x;
            let sy = i64::from(oy) - y;
            let inside = (0..src_w).contains(&sx) && (0..src_h).contains(&sy);
            if inside {
                return *work.get_pixel(sx as u32, sy as u32);
            }
            match (extend.source(sx, src_w), extend.source(sy, src_h)) {
                (Some(sx), Some(sy)) => *work.get_pixel(sx as u32, sy as u32),
                _ => fill,
            }
        });
        let header = Header {
            offset: (x as i32, y as i32),
            ..args.input_header()
        };
        let out = args.new_image_with_header(restore(color, embedded), header);
        args.set_output("out", Value::Image(out))
    }
}

/// Expand a caller-supplied background to four normalised samples.
///
/// One value fills every channel; otherwise missing channels are zero.
fn background_pixel(values: &[f64], max: f32) -> Rgba<f32> {
    let mut pixel = [0.0f32; 4];
    match values {
        [] => {}
        [single] => pixel = [*single as f32 / max; 4],
        many => {
            for (sample, value) in pixel.iter_mut().zip(many) {
                *sample = *value as f32 / max;
            }
        }
    }
    Rgba(pixel)
}

// ============================================================================
// resize, thumbnail_image
// ============================================================================

const KERNELS: &[(&str, FilterType)] = &[
    ("nearest", FilterType::Nearest),
    ("linear", FilterType::Triangle),
    ("cubic", FilterType::CatmullRom),
    ("lanczos3", FilterType::Lanczos3),
];

struct Resize;

impl Operation for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn description(&self) -> &'static str {
        "resize an image by a scale factor"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::required("scale", Kind::Double, "horizontal scale factor"),
            ArgumentSpec::optional("vscale", Kind::Double, "vertical scale factor"),
            ArgumentSpec::optional(
                "kernel",
                Kind::String,
                "nearest, linear, cubic or lanczos3",
            ),
            OUT,
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let hscale = args.double("scale")?;
        let vscale = args.double_opt("vscale")?.unwrap_or(hscale);
        if !(hscale > 0.0 && vscale > 0.0 && hscale.is_finite() && vscale.is_finite()) {
            return Err(OperationError::new("resize: scale factors must be positive"));
        }
        let kernel_name = args.string_opt("kernel")?.unwrap_or("lanczos3");
        let kernel = KERNELS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(kernel_name))
            .map(|(_, filter)| *filter)
            .ok_or_else(|| OperationError(format!("resize: unknown kernel {kernel_name}")))?;

        let image = args.image("in")?.pixels();
        let width = scaled(args, "width", image.width(), hscale)?;
        let height = scaled(args, "height", image.height(), vscale)?;
        let (width, height) = canvas(args, width, height)?;
        let resized = image.resize_exact(width, height, kernel);
        let header = args.input_header();
        let header = Header {
            resolution: (header.resolution.0 * hscale, header.resolution.1 * vscale),
            ..header
        };
        let out = args.new_image_with_header(resized, header);
        args.set_output("out", Value::Image(out))
    }
}

fn scaled(args: &Arguments<'_>, name: &str, len: u32, scale: f64) -> Result<u32, OperationError> {
    let target = (f64::from(len) * scale).round().max(1.0);
    dimension(args, name, target.min(MAX_DIMENSION as f64 + 1.0) as i64)
}

struct ThumbnailImage;

impl Operation for ThumbnailImage {
    fn name(&self) -> &'static str {
        "thumbnail_image"
    }

    fn description(&self) -> &'static str {
        "generate a thumbnail from an image"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::required("width", Kind::Int, "target width"),
            ArgumentSpec::optional("height", Kind::Int, "target height"),
            ArgumentSpec::optional("crop", Kind::Bool, "fill the box and crop the overflow"),
            ArgumentSpec::optional("interpolate", Kind::Interpolator, "resampling kernel"),
            OUT,
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let width = dimension(args, "width", args.int("width")?)?;
        let height = match args.int_opt("height")? {
            Some(height) => Some(dimension(args, "height", height)?),
            None => None,
        };
        let crop = args.bool_or("crop", false)?;
        let filter = args.interpolator_or_default("interpolate")?.filter();

        let image = args.image("in")?.pixels();
        let thumb = match height {
            Some(height) => {
                canvas(args, width, height)?;
                if crop {
                    image.resize_to_fill(width, height, filter)
                } else {
                    image.resize(width, height, filter)
                }
            }
            None => {
                let ratio = f64::from(width) / f64::from(image.width());
                let height = (f64::from(image.height()) * ratio).round().max(1.0);
                let height = dimension(args, "height", height.min(MAX_DIMENSION as f64 + 1.0) as i64)?;
                canvas(args, width, height)?;
                image.resize_exact(width, height, filter)
            }
        };
        publish(args, thumb)
    }
}

// ============================================================================
// affine
// ============================================================================

struct Affine;

impl Operation for Affine {
    fn name(&self) -> &'static str {
        "affine"
    }

    fn description(&self) -> &'static str {
        "transform an image with a 2x2 matrix"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![
            IN,
            ArgumentSpec::required("matrix", Kind::DoubleArray, "[a, b, c, d]"),
            ArgumentSpec::optional("interpolate", Kind::Interpolator, "sampling kernel"),
            OUT,
        ]
    }

    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError> {
        let matrix = match args.double_array("matrix")? {
            [a, b, c, d] => [*a, *b, *c, *d],
            other => {
                return Err(OperationError(format!(
                    "affine: matrix needs 4 elements, got {}",
                    other.len()
                )));
            }
        };
        let transform = Transform::new(matrix)
            .ok_or_else(|| OperationError::new("affine: singular or invalid matrix"))?;
        let nearest = args.interpolator_or_default("interpolate")?.is_nearest();

        let source = args.image("in")?.pixels();
        let color = source.color();
        let work = source.to_rgba32f();
        let (min_x, min_y, max_x, max_y) = transform.bounds(work.width(), work.height());
        let width = dimension(args, "width", (max_x - min_x).ceil().max(1.0) as i64)?;
        let height = dimension(args, "height", (max_y - min_y).ceil().max(1.0) as i64)?;
        let (width, height) = canvas(args, width, height)?;

        let out = Rgba32FImage::from_fn(width, height, |ox, oy| {
            let (sx, sy) = transform.invert(
                f64::from(ox) + 0.5 + min_x,
                f64::from(oy) + 0.5 + min_y,
            );
            if nearest {
                sample_nearest(&work, sx, sy)
            } else {
                sample_bilinear(&work, sx, sy)
            }
        });
        publish(args, restore(color, out))
    }
}

/// `[a, b, c, d]` maps `(x, y)` to `(a*x + b*y, c*x + d*y)`.
#[derive(Debug, Clone, Copy)]
struct Transform {
    forward: [f64; 4],
    inverse: [f64; 4],
}

impl Transform {
    fn new(m: [f64; 4]) -> Option<Self> {
        let det = m[0] * m[3] - m[1] * m[2];
        if !det.is_finite() || det.abs() < 1e-12 {
            return None;
        }
        Some(Self {
            forward: m,
            inverse: [m[3] / det, -m[1] / det, -m[2] / det, m[0] / det],
        })
    }

    fn apply(m: &[f64; 4], x: f64, y: f64) -> (f64, f64) {
        (m[0] * x + m[1] * y, m[2] * x + m[3] * y)
    }

    fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        Self::apply(&self.inverse, x, y)
    }

    /// Bounding box of the transformed `width` x `height` rectangle.
    fn bounds(&self, width: u32, height: u32) -> (f64, f64, f64, f64) {
        let (w, h) = (f64::from(width), f64::from(height));
        [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
            .into_iter()
            .map(|(x, y)| Self::apply(&self.forward, x, y))
            .fold(
                (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                |(x0, y0, x1, y1), (x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            )
    }
}

/// Sample at continuous coordinates where pixel `(i, j)` covers `[i, i+1)`.
fn sample_nearest(img: &Rgba32FImage, x: f64, y: f64) -> Rgba<f32> {
    let (px, py) = (x.floor(), y.floor());
    if px < 0.0 || py < 0.0 || px >= f64::from(img.width()) || py >= f64::from(img.height()) {
        return Rgba([0.0; 4]);
    }
    *img.get_pixel(px as u32, py as u32)
}

fn sample_bilinear(img: &Rgba32FImage, x: f64, y: f64) -> Rgba<f32> {
    let (w, h) = (f64::from(img.width()), f64::from(img.height()));
    if x < 0.0 || y < 0.0 || x >= w || y >= h {
        return Rgba([0.0; 4]);
    }
    // Shift to pixel-centre coordinates and clamp neighbours at the edges.
    let (cx, cy) = (x - 0.5, y - 0.5);
    let (x0, y0) = (cx.floor(), cy.floor());
    let (fx, fy) = ((cx - x0) as f32, (cy - y0) as f32);
    let clamp_x = |v: f64| v.clamp(0.0, w - 1.0) as u32;
    let clamp_y = |v: f64| v.clamp(0.0, h - 1.0) as u32;
    let (xa, xb) = (clamp_x(x0), clamp_x(x0 + 1.0));
    let (ya, yb) = (clamp_y(y0), clamp_y(y0 + 1.0));

    let taps = [
        (img.get_pixel(xa, ya), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(xb, ya), fx * (1.0 - fy)),
        (img.get_pixel(xa, yb), (1.0 - fx) * fy),
        (img.get_pixel(xb, yb), fx * fy),
    ];
    let mut out = [0.0f32; 4];
    for (pixel, weight) in taps {
        for (acc, sample) in out.iter_mut().zip(pixel.0) {
            *acc += sample * weight;
        }
    }
    Rgba(out)
}
