//! Loading and saving through the public entry points: files with bracketed
//! option strings, encoded buffers, and format resolution failures.

use imgcall::{BandFormat, Error, Image, ImageType, OptionSet, OptionValue, Runtime, RuntimeConfig};
use tempfile::TempDir;

fn runtime() -> Runtime {
    Runtime::startup(RuntimeConfig::default()).unwrap()
}

/// RGB gradient: red follows x, green follows y.
fn gradient(rt: &Runtime, width: u32, height: u32) -> Image {
    let bytes: Vec<u8> = (0..height)
        .flat_map(|y| {
            (0..width).flat_map(move |x| {
                [(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 90]
            })
        })
        .collect();
    Image::from_memory(rt, &bytes, width, height, 3, BandFormat::UChar).unwrap()
}

#[test]
fn png_buffer_is_lossless() {
    let rt = runtime();
    let image = gradient(&rt, 32, 16);
    let png = image
        .write_to_buffer(&rt, ImageType::Png, OptionSet::default())
        .unwrap();
    assert_eq!(&png[1..4], b"PNG");

    let decoded = Image::from_buffer(&rt, &png, OptionSet::default()).unwrap();
    assert_eq!((decoded.width(), decoded.height(), decoded.bands()), (32, 16, 3));
    assert_eq!(decoded.to_bytes(), image.to_bytes());
}

#[test]
fn jpeg_buffer_keeps_dimensions() {
    let rt = runtime();
    let image = gradient(&rt, 40, 24);
    let jpeg = image
        .write_to_buffer(&rt, ImageType::Jpeg, OptionSet::default())
        .unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let decoded = Image::from_buffer(&rt, &jpeg, OptionSet::default()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (40, 24));
    assert_eq!(decoded.call_event_log()[0].operation(), "jpegload_buffer");
}

#[test]
fn avif_buffer_is_written() {
    let rt = runtime();
    let image = gradient(&rt, 16, 16);
    let avif = image
        .write_to_buffer(
            &rt,
            ImageType::Avif,
            OptionSet::new([OptionValue::input_int("speed", 10)]),
        )
        .unwrap();
    assert_eq!(&avif[4..8], b"ftyp");
}

#[test]
fn file_roundtrip_with_option_strings() {
    let rt = runtime();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("photo.jpg");
    let path = path.to_str().unwrap();

    let image = gradient(&rt, 64, 32);
    image
        .write_to_file(&rt, &format!("{path}[Q=90]"), OptionSet::default())
        .unwrap();
    assert!(std::path::Path::new(path).exists());

    let loaded = Image::from_file(&rt, &format!("{path}[shrink=2]"), OptionSet::default()).unwrap();
    assert_eq!((loaded.width(), loaded.height()), (32, 16));

    let log = loaded.call_event_log();
    assert_eq!(log.len(), 1);
    let rendered = log[0].to_string();
    assert!(rendered.starts_with("jpegload(filename="), "{rendered}");
    assert!(rendered.ends_with(", shrink=2)"), "{rendered}");
}

#[test]
fn structured_options_override_file_options() {
    let rt = runtime();
    let tmp = TempDir::new().unwrap();
    let image = gradient(&rt, 64, 64);

    let low = tmp.path().join("low.jpg");
    let low = low.to_str().unwrap();
    image
        .write_to_file(&rt, &format!("{low}[Q=5]"), OptionSet::default())
        .unwrap();

    let high = tmp.path().join("high.jpg");
    let high = high.to_str().unwrap();
    image
        .write_to_file(
            &rt,
            &format!("{high}[Q=5]"),
            OptionSet::new([OptionValue::input_int("Q", 95)]),
        )
        .unwrap();

    let low_size = std::fs::metadata(low).unwrap().len();
    let high_size = std::fs::metadata(high).unwrap().len();
    assert!(high_size > low_size, "{high_size} <= {low_size}");
}

#[test]
fn tiff_file_is_lossless() {
    let rt = runtime();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("scan.TIFF");
    let path = path.to_str().unwrap();

    let image = gradient(&rt, 10, 7);
    image.write_to_file(&rt, path, OptionSet::default()).unwrap();
    let loaded = Image::from_file(&rt, path, OptionSet::default()).unwrap();
    assert_eq!(loaded.to_bytes(), image.to_bytes());
}

#[test]
fn webp_roundtrip_keeps_dimensions() {
    let rt = runtime();
    let image = gradient(&rt, 12, 8);
    let webp = image
        .write_to_buffer(&rt, ImageType::Webp, OptionSet::default())
        .unwrap();
    let decoded = Image::from_buffer(&rt, &webp, OptionSet::default()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (12, 8));
}

#[test]
fn unsupported_formats_fail_cleanly() {
    let rt = runtime();
    let tmp = TempDir::new().unwrap();
    let image = gradient(&rt, 4, 4);

    let path = tmp.path().join("notes.xyz");
    assert!(matches!(
        image.write_to_file(&rt, path.to_str().unwrap(), OptionSet::default()),
        Err(Error::UnsupportedFormat(_))
    ));
    assert!(!path.exists());

    assert!(matches!(
        Image::from_buffer(&rt, b"plain text, not pixels", OptionSet::default()),
        Err(Error::UnsupportedFormat(_))
    ));
    assert!(matches!(
        image.write_to_buffer(&rt, ImageType::Gif, OptionSet::default()),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn missing_file_is_an_operation_failure() {
    let rt = runtime();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("absent.png");
    match Image::from_file(&rt, path.to_str().unwrap(), OptionSet::default()) {
        Err(Error::OperationFailed { operation, .. }) => assert_eq!(operation, "pngload"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_option_in_file_name_is_rejected() {
    let rt = runtime();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("out.png");
    let image = gradient(&rt, 4, 4);
    let result = image.write_to_file(
        &rt,
        &format!("{}[Q=90]", path.to_str().unwrap()),
        OptionSet::default(),
    );
    assert!(matches!(
        result,
        Err(Error::UnknownArgument { ref operation, ref argument })
            if operation == "pngsave" && argument == "Q"
    ));
}

#[test]
fn png_buffer_reencoded_as_jpeg_keeps_dimensions() {
    let rt = runtime();
    let png = gradient(&rt, 30, 20)
        .write_to_buffer(&rt, ImageType::Png, OptionSet::default())
        .unwrap();

    let decoded = Image::from_buffer(&rt, &png, OptionSet::default()).unwrap();
    let jpeg = decoded
        .write_to_buffer(&rt, ImageType::Jpeg, OptionSet::default())
        .unwrap();
    let reloaded = Image::from_buffer(&rt, &jpeg, OptionSet::default()).unwrap();
    assert_eq!((reloaded.width(), reloaded.height()), (30, 20));

    let history: Vec<String> = decoded
        .call_event_log()
        .iter()
        .map(|event| event.operation().to_string())
        .collect();
    assert_eq!(history, vec!["pngload_buffer", "jpegsave_buffer"]);
    assert_eq!(reloaded.call_event_log()[0].operation(), "jpegload_buffer");
}

#[test]
fn webp_file_converts_to_tiff() {
    let rt = runtime();
    let tmp = TempDir::new().unwrap();
    let webp = tmp.path().join("source.webp");
    let webp = webp.to_str().unwrap();
    let tiff = tmp.path().join("converted.tif");
    let tiff = tiff.to_str().unwrap();

    gradient(&rt, 17, 9)
        .write_to_file(&rt, webp, OptionSet::default())
        .unwrap();
    let loaded = Image::from_file(&rt, webp, OptionSet::default()).unwrap();
    loaded.write_to_file(&rt, tiff, OptionSet::default()).unwrap();

    let converted = Image::from_file(&rt, tiff, OptionSet::default()).unwrap();
    assert_eq!((converted.width(), converted.height()), (17, 9));
    assert_eq!(converted.to_bytes(), loaded.to_bytes());
}
