//! Conversion orchestration
//!
//! Validates a request, runs the assembler on a blocking worker, checks the
//! output and names the artifact. Only one conversion runs at a time per
//! [`Converter`]; a second request while one is running is refused.

use crate::error::Error;
use crate::pdf::{
    assemble, AssemblyOptions, ImageInput, PageLayout, PageReport, PageSize, QpdfWrapper,
    DEFAULT_MARGIN,
};
use crate::record::ImageRecord;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use thiserror::Error as ThisError;

/// Prefix of every generated file name
pub const FILE_NAME_PREFIX: &str = "converted-images-";

/// Per-conversion settings
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub page_size: PageSize,
    pub margin: f32,
    pub title: Option<String>,
    /// Rewrite the output through qpdf with object streams
    pub optimize: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            margin: DEFAULT_MARGIN,
            title: None,
            optimize: false,
        }
    }
}

/// Ordered images plus options
#[derive(Debug, Clone, Default)]
pub struct ConversionRequest {
    pub images: Vec<ImageInput>,
    pub options: ConversionOptions,
}

impl ConversionRequest {
    /// Build a request from list records, in list order
    pub fn from_records(records: &[ImageRecord], options: ConversionOptions) -> Self {
        let images = records
            .iter()
            .map(|r| ImageInput {
                name: r.name.clone(),
                media_type: r.media_type.as_mime().to_string(),
                data: r.data.clone(),
            })
            .collect();
        Self { images, options }
    }

    /// Check every entry, collecting all problems into one message
    pub fn validate(&self) -> Result<(), ConversionFailure> {
        if self.images.is_empty() {
            return Err(ConversionFailure::EmptySubmission);
        }

        let mut issues = Vec::new();
        for (i, image) in self.images.iter().enumerate() {
            if image.data.is_empty() {
                issues.push(format!("images[{}].data: must not be empty", i));
            }
            if image.name.trim().is_empty() {
                issues.push(format!("images[{}].name: must not be blank", i));
            }
            if !image
                .media_type
                .trim()
                .to_ascii_lowercase()
                .starts_with("image/")
            {
                issues.push(format!("images[{}].type: must start with 'image/'", i));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConversionFailure::InvalidRequest {
                details: issues.join(", "),
            })
        }
    }
}

/// Finished PDF ready for download
#[derive(Debug, Clone)]
pub struct ConversionArtifact {
    pub pdf: Vec<u8>,
    pub file_name: String,
    pub page_count: u32,
    pub pages: Vec<PageReport>,
}

/// Why a conversion produced no artifact
#[derive(Debug, ThisError)]
pub enum ConversionFailure {
    #[error("At least one image is required to create a PDF")]
    EmptySubmission,

    #[error("A conversion is already in progress")]
    InProgress,

    #[error("Invalid data format: {details}")]
    InvalidRequest { details: String },

    #[error(transparent)]
    Assembly(#[from] Error),
}

impl ConversionFailure {
    /// Single consolidated message for the user
    pub fn client_message(&self) -> String {
        match self {
            ConversionFailure::EmptySubmission => Error::EmptySubmission.client_message(),
            ConversionFailure::InProgress => Error::ConversionInProgress.client_message(),
            ConversionFailure::InvalidRequest { details } => {
                format!("Invalid data format: {}", details)
            }
            ConversionFailure::Assembly(e) => e.client_message(),
        }
    }
}

impl From<ConversionFailure> for Error {
    fn from(failure: ConversionFailure) -> Self {
        match failure {
            ConversionFailure::EmptySubmission => Error::EmptySubmission,
            ConversionFailure::InProgress => Error::ConversionInProgress,
            ConversionFailure::InvalidRequest { details } => Error::InvalidRequest { details },
            ConversionFailure::Assembly(e) => e,
        }
    }
}

/// Runs conversions one at a time and hands out unique file names
#[derive(Debug, Default)]
pub struct Converter {
    in_flight: AtomicBool,
    last_stamp: AtomicI64,
}

/// Clears the in-flight flag when the conversion ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Converter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a conversion is currently running
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Convert the request into a PDF artifact
    pub async fn convert(
        &self,
        request: ConversionRequest,
    ) -> Result<ConversionArtifact, ConversionFailure> {
        if request.images.is_empty() {
            return Err(ConversionFailure::EmptySubmission);
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConversionFailure::InProgress);
        }
        let _guard = InFlight(&self.in_flight);

        request.validate()?;

        let image_count = request.images.len();
        tracing::info!(images = image_count, page_size = ?request.options.page_size, "starting conversion");

        let (pdf, pages) = tokio::task::spawn_blocking(move || {
            let options = AssemblyOptions {
                layout: PageLayout::new(request.options.page_size, request.options.margin),
                title: request.options.title.clone(),
            };
            let assembled = assemble(&request.images, &options)?;
            let pdf = if request.options.optimize {
                QpdfWrapper::optimize(&assembled.bytes)?
            } else {
                assembled.bytes
            };
            Ok::<_, Error>((pdf, assembled.pages))
        })
        .await
        .map_err(|e| Error::PdfAssembly {
            reason: format!("Task join error: {}", e),
        })??;

        let artifact = ConversionArtifact {
            pdf,
            file_name: self.next_file_name(),
            page_count: pages.len() as u32,
            pages,
        };
        verify_artifact(&artifact, image_count)?;

        tracing::info!(
            file_name = %artifact.file_name,
            pages = artifact.page_count,
            bytes = artifact.pdf.len(),
            "conversion finished"
        );
        Ok(artifact)
    }

    /// `converted-images-<millis>.pdf`, strictly increasing per converter
    pub fn next_file_name(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_stamp.load(Ordering::Acquire);
        let stamp = loop {
            let candidate = now.max(last + 1);
            match self.last_stamp.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break candidate,
                Err(actual) => last = actual,
            }
        };
        format!("{}{}.pdf", FILE_NAME_PREFIX, stamp)
    }
}

/// Output checks: PDF header, page count as seen by qpdf, file name
fn verify_artifact(artifact: &ConversionArtifact, expected_pages: usize) -> Result<(), Error> {
    if !artifact.pdf.starts_with(b"%PDF-") {
        return Err(Error::PdfAssembly {
            reason: "output is not a PDF document".to_string(),
        });
    }

    let counted = QpdfWrapper::page_count(&artifact.pdf)?;
    if counted as usize != expected_pages {
        return Err(Error::PdfAssembly {
            reason: format!(
                "output has {} pages, expected {}",
                counted, expected_pages
            ),
        });
    }

    if !artifact.file_name.ends_with(".pdf") {
        return Err(Error::PdfAssembly {
            reason: format!("unexpected file name: {}", artifact.file_name),
        });
    }

    Ok(())
}
