//! Intake validation: media type allowlist, size ceiling, id assignment

use crate::error::{Error, Result};
use crate::record::{normalize_mime, ImageId, ImageRecord, MediaType};
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;

/// Default per-file size ceiling (5 MiB)
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// Declared type used when nothing better is known
pub const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

/// Limits applied to every incoming file
#[derive(Debug, Clone, Copy)]
pub struct IntakePolicy {
    pub max_bytes: u64,
}

impl Default for IntakePolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// A file read wholly into memory, not yet validated
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub declared_type: String,
    pub data: Vec<u8>,
}

/// A file that was refused at intake
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// File or source name
    pub name: String,
    /// User-facing reason
    pub reason: String,
}

/// Outcome of one intake batch
#[derive(Debug, Default)]
pub struct IntakeReport {
    pub accepted: Vec<ImageRecord>,
    pub rejected: Vec<Rejection>,
}

impl IntakeReport {
    /// Record a refused file, logging the full error
    pub fn reject(&mut self, name: &str, error: &Error) {
        tracing::warn!(file = %name, error = %error, "image rejected at intake");
        self.rejected.push(Rejection {
            name: name.to_string(),
            reason: error.client_message(),
        });
    }

    /// Validate a file and add it to either list
    pub fn absorb(&mut self, file: IncomingFile, policy: &IntakePolicy) {
        let name = file.name.clone();
        match accept(file, policy) {
            Ok(record) => self.accepted.push(record),
            Err(e) => self.reject(&name, &e),
        }
    }
}

/// Check declared type, then size. Usable before the content is read.
pub fn validate_declared(
    name: &str,
    declared_type: &str,
    size: u64,
    policy: &IntakePolicy,
) -> Result<MediaType> {
    let media_type =
        MediaType::from_mime(declared_type).ok_or_else(|| Error::UnsupportedMediaType {
            name: name.to_string(),
            media_type: normalize_mime(declared_type),
        })?;

    if size > policy.max_bytes {
        return Err(Error::FileTooLarge {
            name: name.to_string(),
            size,
            max_size: policy.max_bytes,
        });
    }

    Ok(media_type)
}

/// Validate a file and turn it into a record with a fresh id
pub fn accept(file: IncomingFile, policy: &IntakePolicy) -> Result<ImageRecord> {
    let media_type = validate_declared(
        &file.name,
        &file.declared_type,
        file.data.len() as u64,
        policy,
    )?;

    if file.data.is_empty() {
        return Err(Error::EmptyFile { name: file.name });
    }

    let dimensions = probe_dimensions(&file.data, media_type);

    Ok(ImageRecord {
        id: ImageId::new(),
        name: file.name,
        media_type,
        data: file.data.into(),
        dimensions,
    })
}

/// Validate a batch. Each file is wholly accepted or wholly rejected.
pub fn intake_files(files: Vec<IncomingFile>, policy: &IntakePolicy) -> IntakeReport {
    let mut report = IntakeReport::default();
    for file in files {
        report.absorb(file, policy);
    }
    report
}

/// Read width and height from the image header without a full decode
fn probe_dimensions(data: &[u8], media_type: MediaType) -> Option<(u32, u32)> {
    image::ImageReader::with_format(Cursor::new(data), media_type.image_format())
        .into_dimensions()
        .ok()
}

/// Declared media type for a file name, the way a browser infers it
pub fn media_type_from_extension(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") | Some("jpe") | Some("jfif") => "image/jpeg".to_string(),
        Some("png") => "image/png".to_string(),
        Some("gif") => "image/gif".to_string(),
        Some("webp") => "image/webp".to_string(),
        Some("bmp") => "image/bmp".to_string(),
        Some("tif") | Some("tiff") => "image/tiff".to_string(),
        Some("svg") => "image/svg+xml".to_string(),
        _ => UNKNOWN_MEDIA_TYPE.to_string(),
    }
}

/// Declared media type from magic bytes, for input with no type attached
pub fn media_type_from_content(data: &[u8]) -> String {
    image::guess_format(data)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| UNKNOWN_MEDIA_TYPE.to_string())
}
