//! Error types for the image-to-PDF MCP server

use thiserror::Error;

/// Result type alias for the image-to-PDF MCP server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the image-to-PDF MCP server
#[derive(Error, Debug)]
pub enum Error {
    /// Image file not found
    #[error("Image not found: {path}")]
    ImageNotFound { path: String },

    /// Declared media type is outside the accepted allowlist
    #[error("File \"{name}\" is not a supported image type ({media_type})")]
    UnsupportedMediaType { name: String, media_type: String },

    /// File exceeds the per-image size ceiling
    #[error("File \"{name}\" is too large: {size} bytes (max: {max_size} bytes)")]
    FileTooLarge {
        name: String,
        size: u64,
        max_size: u64,
    },

    /// File has no content
    #[error("File \"{name}\" is empty")]
    EmptyFile { name: String },

    /// Malformed `data:` URL
    #[error("Invalid data URL: {reason}")]
    InvalidDataUrl { reason: String },

    /// Image id could not be parsed
    #[error("Invalid image id: {id}")]
    InvalidImageId { id: String },

    /// Glob pattern could not be parsed or matched nothing
    #[error("Invalid path pattern: {pattern}")]
    InvalidPattern { pattern: String },

    /// Source resolution error
    #[error("Failed to resolve source: {reason}")]
    SourceResolution { reason: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Conversion requested with no images
    #[error("At least one image is required to create a PDF")]
    EmptySubmission,

    /// Another conversion is still running
    #[error("A conversion is already in progress")]
    ConversionInProgress,

    /// Conversion request failed validation
    #[error("Invalid data format: {details}")]
    InvalidRequest { details: String },

    /// PDF writer failure
    #[error("PDF assembly failed: {reason}")]
    PdfAssembly { reason: String },

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// No artifact is available for download
    #[error("No PDF available: {reason}")]
    NoArtifact { reason: String },

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// SSRF blocked (URL resolves to private/reserved IP)
    #[error("SSRF blocked: {url}")]
    SsrfBlocked { url: String },
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Error::PdfAssembly {
            reason: e.to_string(),
        }
    }
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::ImageNotFound { .. } => "Image not found".to_string(),
            Error::UnsupportedMediaType { name, .. } => format!(
                "File \"{}\" is not a supported image type (JPG, PNG, GIF)",
                name
            ),
            Error::FileTooLarge { name, max_size, .. } => format!(
                "File \"{}\" exceeds the {} size limit",
                name,
                format_size_limit(*max_size)
            ),
            Error::EmptyFile { name } => format!("File \"{}\" is empty", name),
            Error::InvalidDataUrl { reason } => format!("Invalid data URL: {}", reason),
            Error::InvalidImageId { id } => format!("Invalid image id: {}", id),
            Error::InvalidPattern { pattern } => format!("Invalid path pattern: {}", pattern),
            Error::SourceResolution { .. } => "Failed to resolve image source".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::HttpRequest(_) => "HTTP request failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::EmptySubmission => {
                "Please add images before converting to PDF".to_string()
            }
            Error::ConversionInProgress => "A conversion is already in progress".to_string(),
            Error::InvalidRequest { details } => format!("Invalid data format: {}", details),
            Error::PdfAssembly { .. } => "PDF conversion failed".to_string(),
            Error::QpdfError { .. } => "PDF conversion failed".to_string(),
            Error::NoArtifact { reason } => format!("No PDF available: {}", reason),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::SsrfBlocked { .. } => "URL not allowed".to_string(),
        }
    }
}

/// Human-readable size limit, e.g. `5MB` for 5 MiB.
fn format_size_limit(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{} bytes", bytes)
    }
}
