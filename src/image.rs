//! Image handles and the entry points that create or persist them.
//!
//! An [`Image`] is a shared handle to pixels held by the runtime. Cloning the
//! handle shares the pixels and the call history; the pixels are released
//! exactly once, when the last handle is dropped.
//!
//! | Entry point | Operation used |
//! |---|---|
//! | [`Image::from_file`] | loader resolved from the file suffix |
//! | [`Image::from_buffer`] | loader resolved by sniffing the bytes |
//! | [`Image::from_memory`] | none, raw pixels are wrapped directly |
//! | [`Image::write_to_file`] | saver resolved from the file suffix |
//! | [`Image::write_to_buffer`] | buffer saver resolved from an [`ImageType`] |

use crate::blob::Blob;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::events::{CallEvent, EventLog};
use crate::options::{OptionSet, OptionValue};
use crate::resolve;
use crate::runtime::{HandleKind, ReleaseGuard, Runtime};
use crate::value::Slot;
use image::{ColorType, DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use std::fmt;
use std::sync::Arc;

/// Sample format of one band, numbered as in the raw memory interchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandFormat {
    UChar = 0,
    Char = 1,
    UShort = 2,
    Short = 3,
    UInt = 4,
    Int = 5,
    Float = 6,
    Complex = 7,
    Double = 8,
    DpComplex = 9,
}

impl BandFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            BandFormat::UChar | BandFormat::Char => 1,
            BandFormat::UShort | BandFormat::Short => 2,
            BandFormat::UInt | BandFormat::Int | BandFormat::Float => 4,
            BandFormat::Complex | BandFormat::Double => 8,
            BandFormat::DpComplex => 16,
        }
    }
}

/// How the bands of an image should be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpretation {
    Multiband,
    BW,
    Srgb,
    Grey16,
    Rgb16,
    Scrgb,
}

/// Encoded formats that can be written to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Jpeg,
    Webp,
    Png,
    Tiff,
    Gif,
    Avif,
}

impl ImageType {
    /// Suffix used to resolve the buffer saver.
    pub fn suffix(self) -> &'static str {
        match self {
            ImageType::Jpeg => ".jpg",
            ImageType::Webp => ".webp",
            ImageType::Png => ".png",
            ImageType::Tiff => ".tif",
            ImageType::Gif => ".gif",
            ImageType::Avif => ".avif",
        }
    }
}

/// Header fields that travel with the pixels.
///
/// Resolution is in pixels per millimetre. Operations copy the header of
/// their first input image to the images they produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub resolution: (f64, f64),
    pub offset: (i32, i32),
}

impl Default for Header {
    fn default() -> Self {
        Self {
            resolution: (1.0, 1.0),
            offset: (0, 0),
        }
    }
}

#[derive(Clone)]
pub struct Image {
    inner: Arc<ImageInner>,
}

struct ImageInner {
    pixels: DynamicImage,
    header: Header,
    events: EventLog,
    release: ReleaseGuard,
}

impl Image {
    pub(crate) fn wrap(runtime: &Runtime, pixels: DynamicImage, header: Header) -> Self {
        Self {
            inner: Arc::new(ImageInner {
                pixels,
                header,
                events: EventLog::default(),
                release: runtime.handles().acquire(HandleKind::Image),
            }),
        }
    }

    /// Load from disk. A bracketed suffix (`photo.jpg[shrink=2]`) is passed to
    /// the loader as extra arguments.
    pub fn from_file(runtime: &Runtime, path: &str, options: OptionSet<'_>) -> Result<Self> {
        runtime.ensure_running()?;
        let (file_name, option_string) = resolve::split_filename(path);
        let operation = resolve::find_load(runtime, &file_name)?;

        let out = Slot::new();
        let options = options.with([
            OptionValue::input_string("filename", file_name.as_str()),
            OptionValue::output_image("out", &out),
        ]);
        dispatch::call_with_option_string(runtime, operation, &options, &option_string)?;
        take_image(operation, &out)
    }

    /// Decode an encoded buffer. The bytes are borrowed for the call only.
    pub fn from_buffer(runtime: &Runtime, bytes: &[u8], options: OptionSet<'_>) -> Result<Self> {
        runtime.ensure_running()?;
        let operation = resolve::find_load_buffer(runtime, bytes)?;

        let out = Slot::new();
        let options = options.with([
            OptionValue::input_blob("buffer", Blob::borrowed(bytes)),
            OptionValue::output_image("out", &out),
        ]);
        dispatch::call(runtime, operation, &options)?;
        take_image(operation, &out)
    }

    /// Wrap raw band-interleaved pixels, left to right, top to bottom.
    ///
    /// Bytes are copied. Supported: `UChar` and `UShort` with 1-4 bands,
    /// `Float` with 3 or 4 bands. Multi-byte samples are in native byte order.
    pub fn from_memory(
        runtime: &Runtime,
        bytes: &[u8],
        width: u32,
        height: u32,
        bands: u32,
        format: BandFormat,
    ) -> Result<Self> {
        runtime.ensure_running()?;
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(bands as usize))
            .and_then(|n| n.checked_mul(format.bytes_per_sample()))
            .ok_or_else(|| {
                Error::InvalidPixelData(format!("{width}x{height}x{bands} {format:?} is too large"))
            })?;
        if width == 0 || height == 0 || bytes.len() != expected {
            return Err(Error::InvalidPixelData(format!(
                "{width}x{height}x{bands} {format:?} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let pixels = match format {
            BandFormat::UChar => interleaved_u8(width, height, bands, bytes.to_vec()),
            BandFormat::UShort => {
                let samples = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_ne_bytes([c[0], c[1]]))
                    .collect();
                interleaved_u16(width, height, bands, samples)
            }
            BandFormat::Float => {
                let samples = bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                interleaved_f32(width, height, bands, samples)
            }
            _ => None,
        }
        .ok_or_else(|| {
            Error::InvalidPixelData(format!("{bands} bands of {format:?} are not supported"))
        })?;
        Ok(Self::wrap(runtime, pixels, Header::default()))
    }

    /// Encode to `image_type` through the matching buffer saver.
    pub fn write_to_buffer(
        &self,
        runtime: &Runtime,
        image_type: ImageType,
        options: OptionSet<'_>,
    ) -> Result<Vec<u8>> {
        runtime.ensure_running()?;
        let (suffix, option_string) = resolve::split_filename(image_type.suffix());
        let operation = resolve::find_save_buffer(runtime, &suffix)?;

        let buffer = Slot::new();
        let options = options.with([
            OptionValue::input_image("in", self),
            OptionValue::output_blob("buffer", &buffer),
        ]);
        dispatch::call_with_option_string(runtime, operation, &options, &option_string)?;
        buffer
            .take()
            .map(|blob| blob.to_vec())
            .ok_or_else(|| Error::operation_failed(operation, "no data written"))
    }

    /// Save to disk, format chosen by suffix. A bracketed suffix
    /// (`out.jpg[Q=90]`) is passed to the saver.
    pub fn write_to_file(&self, runtime: &Runtime, path: &str, options: OptionSet<'_>) -> Result<()> {
        runtime.ensure_running()?;
        let (file_name, option_string) = resolve::split_filename(path);
        let operation = resolve::find_save(runtime, &file_name)?;

        let options = options.with([
            OptionValue::input_image("in", self),
            OptionValue::input_string("filename", file_name.as_str()),
        ]);
        dispatch::call_with_option_string(runtime, operation, &options, &option_string)
    }

    /// Raw band-interleaved pixels, as accepted by [`Image::from_memory`].
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.pixels.as_bytes().to_vec()
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.inner.pixels
    }

    pub fn width(&self) -> u32 {
        self.inner.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.pixels.height()
    }

    pub fn bands(&self) -> u32 {
        u32::from(self.inner.pixels.color().channel_count())
    }

    pub fn has_alpha(&self) -> bool {
        self.inner.pixels.color().has_alpha()
    }

    pub fn band_format(&self) -> BandFormat {
        match self.inner.pixels.color().bytes_per_pixel() / self.inner.pixels.color().channel_count() {
            1 => BandFormat::UChar,
            2 => BandFormat::UShort,
            _ => BandFormat::Float,
        }
    }

    pub fn interpretation(&self) -> Interpretation {
        match self.inner.pixels.color() {
            ColorType::L8 | ColorType::La8 => Interpretation::BW,
            ColorType::L16 | ColorType::La16 => Interpretation::Grey16,
            ColorType::Rgb8 | ColorType::Rgba8 => Interpretation::Srgb,
            ColorType::Rgb16 | ColorType::Rgba16 => Interpretation::Rgb16,
            ColorType::Rgb32F | ColorType::Rgba32F => Interpretation::Scrgb,
            _ => Interpretation::Multiband,
        }
    }

    pub fn header(&self) -> Header {
        self.inner.header
    }

    /// Horizontal and vertical resolution in pixels per millimetre.
    pub fn resolution(&self) -> (f64, f64) {
        self.inner.header.resolution
    }

    /// Position of this image within a larger one, as set by `embed`.
    pub fn offset(&self) -> (i32, i32) {
        self.inner.header.offset
    }

    /// Runtime-unique handle id, for diagnostics.
    pub fn id(&self) -> u64 {
        self.inner.release.id()
    }

    /// Record a call against this image.
    pub fn log_call_event(&self, operation: &str, options: &OptionSet<'_>) {
        self.push_event(Arc::new(CallEvent::new(operation, options)));
    }

    /// Append another image's history to this one.
    pub fn copy_events(&self, events: &[Arc<CallEvent>]) {
        self.inner.events.extend(events);
    }

    /// Full call history, oldest first.
    pub fn call_event_log(&self) -> Vec<Arc<CallEvent>> {
        self.inner.events.snapshot()
    }

    pub(crate) fn push_event(&self, event: Arc<CallEvent>) {
        self.inner.events.push(event);
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.inner.pixels.color())
            .field("events", &self.inner.events.len())
            .finish()
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = format!("{:?}", self.inner.pixels.color()).to_lowercase();
        write!(f, "<image {}x{} {}>", self.width(), self.height(), color)
    }
}

fn take_image(operation: &str, slot: &Slot<Image>) -> Result<Image> {
    slot.take()
        .ok_or_else(|| Error::operation_failed(operation, "no image produced"))
}

pub(crate) fn interleaved_u8(width: u32, height: u32, bands: u32, data: Vec<u8>) -> Option<DynamicImage> {
    match bands {
        1 => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
        2 => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageLumaA8),
        3 => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
        4 => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
        _ => None,
    }
}

fn interleaved_u16(width: u32, height: u32, bands: u32, data: Vec<u16>) -> Option<DynamicImage> {
    match bands {
        1 => ImageBuffer::<Luma<u16>, _>::from_raw(width, height, data).map(DynamicImage::ImageLuma16),
        2 => ImageBuffer::<LumaA<u16>, _>::from_raw(width, height, data).map(DynamicImage::ImageLumaA16),
        3 => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgb16),
        4 => ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgba16),
        _ => None,
    }
}

fn interleaved_f32(width: u32, height: u32, bands: u32, data: Vec<f32>) -> Option<DynamicImage> {
    match bands {
        3 => ImageBuffer::<Rgb<f32>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgb32F),
        4 => ImageBuffer::<Rgba<f32>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgba32F),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn runtime() -> Runtime {
        Runtime::startup(RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn from_memory_uchar_rgb() {
        let rt = runtime();
        let bytes: Vec<u8> = (0..4 * 3 * 3).map(|v| v as u8).collect();
        let image = Image::from_memory(&rt, &bytes, 4, 3, 3, BandFormat::UChar).unwrap();
        assert_eq!((image.width(), image.height(), image.bands()), (4, 3, 3));
        assert_eq!(image.band_format(), BandFormat::UChar);
        assert_eq!(image.interpretation(), Interpretation::Srgb);
        assert!(!image.has_alpha());
        assert_eq!(image.to_bytes(), bytes);
    }

    #[test]
    fn from_memory_ushort_grey_alpha() {
        let rt = runtime();
        let samples: Vec<u16> = vec![0, 65535, 1000, 2000];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        let image = Image::from_memory(&rt, &bytes, 2, 1, 2, BandFormat::UShort).unwrap();
        assert_eq!(image.band_format(), BandFormat::UShort);
        assert_eq!(image.interpretation(), Interpretation::Grey16);
        assert!(image.has_alpha());
        assert_eq!(image.to_bytes(), bytes);
    }

    #[test]
    fn from_memory_wrong_length_is_rejected() {
        let rt = runtime();
        let result = Image::from_memory(&rt, &[0u8; 5], 2, 1, 3, BandFormat::UChar);
        assert!(matches!(result, Err(Error::InvalidPixelData(_))));
    }

    #[test]
    fn from_memory_unsupported_layouts_are_rejected() {
        let rt = runtime();
        let result = Image::from_memory(&rt, &[0u8; 8], 1, 1, 1, BandFormat::Double);
        assert!(matches!(result, Err(Error::InvalidPixelData(_))));
        let result = Image::from_memory(&rt, &[0u8; 5], 1, 1, 5, BandFormat::UChar);
        assert!(matches!(result, Err(Error::InvalidPixelData(_))));
    }

    #[test]
    fn raw_pixels_start_with_a_default_header() {
        let rt = runtime();
        let image = Image::from_memory(&rt, &[0u8; 4], 2, 2, 1, BandFormat::UChar).unwrap();
        assert_eq!(image.resolution(), (1.0, 1.0));
        assert_eq!(image.offset(), (0, 0));
    }

    #[test]
    fn from_memory_huge_dimensions_are_rejected() {
        let rt = runtime();
        let result = Image::from_memory(&rt, &[0u8; 4], u32::MAX, u32::MAX, u32::MAX, BandFormat::DpComplex);
        assert!(matches!(result, Err(Error::InvalidPixelData(_))));
        let result = Image::from_memory(&rt, &[0u8; 4], u32::MAX, u32::MAX, 4, BandFormat::UChar);
        assert!(matches!(result, Err(Error::InvalidPixelData(_))));
    }

    #[test]
    fn last_handle_drop_releases_pixels() {
        let rt = runtime();
        let image = Image::from_memory(&rt, &[0u8; 4], 2, 2, 1, BandFormat::UChar).unwrap();
        let shared = image.clone();
        assert_eq!(rt.handle_stats().live_images, 1);
        drop(image);
        assert_eq!(rt.handle_stats().live_images, 1);
        drop(shared);
        let stats = rt.handle_stats();
        assert_eq!(stats.live_images, 0);
        assert_eq!(stats.released_images, 1);
    }

    #[test]
    fn event_log_api() {
        let rt = runtime();
        let source = Image::from_memory(&rt, &[0u8; 4], 2, 2, 1, BandFormat::UChar).unwrap();
        let derived = Image::from_memory(&rt, &[0u8; 4], 2, 2, 1, BandFormat::UChar).unwrap();
        source.log_call_event("first", &OptionSet::new([OptionValue::input_int("n", 1)]));
        derived.copy_events(&source.call_event_log());
        derived.log_call_event("second", &OptionSet::default());

        let rendered: Vec<String> = derived
            .call_event_log()
            .iter()
            .map(|e| e.to_string())
            .collect();
        assert_eq!(rendered, vec!["first(n=1)", "second()"]);
        assert_eq!(source.call_event_log().len(), 1);
    }

    #[test]
    fn display_is_stable() {
        let rt = runtime();
        let image = Image::from_memory(&rt, &[0u8; 6], 2, 1, 3, BandFormat::UChar).unwrap();
        assert_eq!(image.to_string(), "<image 2x1 rgb8>");
    }

    #[test]
    fn entry_points_fail_after_shutdown() {
        let rt = runtime();
        rt.shutdown();
        let result = Image::from_memory(&rt, &[0u8; 1], 1, 1, 1, BandFormat::UChar);
        assert!(matches!(result, Err(Error::ShutDown)));
    }
}
