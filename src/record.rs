//! Image records held in the ordered list

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Opaque unique identifier of an image record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ImageId(uuid::Uuid);

impl ImageId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ImageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        uuid::Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::InvalidImageId { id: s.to_string() })
    }
}

/// Media types accepted at intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Jpeg,
    Png,
    Gif,
}

impl MediaType {
    /// Every accepted media type, in display order
    pub const ACCEPTED: [MediaType; 3] = [MediaType::Jpeg, MediaType::Png, MediaType::Gif];

    /// MIME string, e.g. `image/png`
    pub fn as_mime(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Gif => "image/gif",
        }
    }

    /// Parse a declared MIME type. Case and parameters are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match normalize_mime(mime).as_str() {
            "image/jpeg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            "image/gif" => Some(MediaType::Gif),
            _ => None,
        }
    }

    /// Whether the PDF assembler can place this format as a raster image
    pub fn is_embeddable(&self) -> bool {
        matches!(self, MediaType::Jpeg | MediaType::Png)
    }

    /// Format hint for the `image` decoder
    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            MediaType::Jpeg => image::ImageFormat::Jpeg,
            MediaType::Png => image::ImageFormat::Png,
            MediaType::Gif => image::ImageFormat::Gif,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_mime())
    }
}

/// Lowercase a MIME type and drop any `;` parameters
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// A validated image held in memory
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: ImageId,
    pub name: String,
    pub media_type: MediaType,
    /// Encoded file contents, shared between the list and conversion snapshots
    pub data: Arc<[u8]>,
    /// Pixel dimensions read from the header, if readable
    pub dimensions: Option<(u32, u32)>,
}

impl ImageRecord {
    /// Size of the encoded file in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_id_roundtrip_string() {
        let id = ImageId::new();
        let parsed: ImageId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_image_id_invalid() {
        let result = "not-a-uuid".parse::<ImageId>();
        assert!(matches!(result, Err(Error::InvalidImageId { .. })));
    }

    #[test]
    fn test_image_id_serializes_as_hyphenated_string() {
        let id: ImageId = "67e55044-10b1-426f-9247-bb680e5fe0c8".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"67e55044-10b1-426f-9247-bb680e5fe0c8\"");
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_image_ids_are_unique() {
        assert_ne!(ImageId::new(), ImageId::new());
    }

    #[test]
    fn test_media_type_from_mime() {
        assert_eq!(MediaType::from_mime("image/png"), Some(MediaType::Png));
        assert_eq!(MediaType::from_mime("IMAGE/JPEG"), Some(MediaType::Jpeg));
        assert_eq!(
            MediaType::from_mime("image/gif; charset=binary"),
            Some(MediaType::Gif)
        );
        assert_eq!(MediaType::from_mime("image/jpg"), None);
        assert_eq!(MediaType::from_mime("image/webp"), None);
        assert_eq!(MediaType::from_mime(""), None);
    }

    #[test]
    fn test_embeddable_formats() {
        assert!(MediaType::Jpeg.is_embeddable());
        assert!(MediaType::Png.is_embeddable());
        assert!(!MediaType::Gif.is_embeddable());
    }

    #[test]
    fn test_media_type_serializes_as_mime() {
        let json = serde_json::to_string(&MediaType::Png).unwrap();
        assert_eq!(json, "\"image/png\"");
    }
}
