//! Mapping file names, suffixes and buffers to loader/saver operation names.
//!
//! File names resolve by suffix only: no file is opened, and a missing or
//! unrecognised suffix is [`Error::UnsupportedFormat`] rather than a guess.
//! Buffers resolve by sniffing their leading bytes. Every lookup goes straight
//! to the registry; nothing is cached here.

use crate::error::{Error, Result};
use crate::image::ImageType;
use crate::registry::{ForeignRole, ForeignTarget};
use crate::runtime::Runtime;

/// Split `photo.jpg[Q=90,strip]` into `("photo.jpg", "Q=90,strip")`.
///
/// Only a trailing bracketed group counts as options; file names that merely
/// contain brackets elsewhere are returned whole with an empty option string.
pub fn split_filename(path: &str) -> (String, String) {
    let trimmed = path.trim_end();
    let split = trimmed
        .strip_suffix(']')
        .and_then(|body| body.rfind('[').map(|open| (&body[..open], &body[open + 1..])))
        .filter(|(file_name, _)| !file_name.is_empty());
    match split {
        Some((file_name, options)) => (file_name.to_string(), options.to_string()),
        None => (path.to_string(), String::new()),
    }
}

/// Lowercase suffix of the last path component, without the dot.
fn suffix_of(file_name: &str) -> Option<String> {
    let last = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    last.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn find_by_suffix(
    runtime: &Runtime,
    file_name: &str,
    role: ForeignRole,
    target: ForeignTarget,
) -> Result<&'static str> {
    runtime.ensure_running()?;
    let unsupported = || Error::UnsupportedFormat(file_name.to_string());
    let suffix = suffix_of(file_name).ok_or_else(unsupported)?;
    runtime
        .registry()
        .foreign(role, target)
        .into_iter()
        .find(|(_, spec)| spec.suffixes.contains(&suffix.as_str()))
        .map(|(name, _)| name)
        .ok_or_else(unsupported)
}

/// Loader for a file, chosen by suffix.
pub fn find_load(runtime: &Runtime, file_name: &str) -> Result<&'static str> {
    find_by_suffix(runtime, file_name, ForeignRole::Load, ForeignTarget::File)
}

/// Loader for an encoded buffer, chosen by its content.
pub fn find_load_buffer(runtime: &Runtime, bytes: &[u8]) -> Result<&'static str> {
    runtime.ensure_running()?;
    let unsupported = || Error::UnsupportedFormat(format!("buffer of {} bytes", bytes.len()));
    let format = image::guess_format(bytes).map_err(|_| unsupported())?;
    runtime
        .registry()
        .foreign(ForeignRole::Load, ForeignTarget::Buffer)
        .into_iter()
        .find(|(_, spec)| spec.format == format)
        .map(|(name, _)| name)
        .ok_or_else(unsupported)
}

/// File saver for a file name, chosen by suffix.
pub fn find_save(runtime: &Runtime, file_name: &str) -> Result<&'static str> {
    find_by_suffix(runtime, file_name, ForeignRole::Save, ForeignTarget::File)
}

/// Buffer saver for a suffix such as `.png` (or any file name carrying one).
pub fn find_save_buffer(runtime: &Runtime, suffix: &str) -> Result<&'static str> {
    find_by_suffix(runtime, suffix, ForeignRole::Save, ForeignTarget::Buffer)
}

/// Buffer saver for a format tag.
pub fn find_save_buffer_for(runtime: &Runtime, image_type: ImageType) -> Result<&'static str> {
    find_save_buffer(runtime, image_type.suffix())
}
