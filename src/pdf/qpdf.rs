//! qpdf FFI wrapper for post-processing assembled PDFs
//!
//! The assembler writes a plain document; qpdf verifies it independently and
//! optionally rewrites it with object streams and compressed streams.

use crate::error::{Error, Result};
use qpdf::{ObjectStreamMode, QPdf};

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    Error::QpdfError {
        reason: e.to_string(),
    }
}

impl QpdfWrapper {
    /// Count pages as qpdf sees them
    pub fn page_count(data: &[u8]) -> Result<u32> {
        let qpdf = QPdf::read_from_memory(data).map_err(map_qpdf_error)?;
        qpdf.get_num_pages().map_err(map_qpdf_error)
    }

    /// Rewrite a PDF with generated object streams and compressed content
    /// streams. Image streams keep their own filters.
    pub fn optimize(data: &[u8]) -> Result<Vec<u8>> {
        let qpdf = QPdf::read_from_memory(data).map_err(map_qpdf_error)?;

        let mut writer = qpdf.writer();
        writer
            .object_stream_mode(ObjectStreamMode::Generate)
            .compress_streams(true)
            .preserve_unreferenced_objects(false);
        writer.write_to_memory().map_err(map_qpdf_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::assembler::{assemble, AssemblyOptions, ImageInput};

    fn text_only_pdf(pages: usize) -> Vec<u8> {
        let inputs: Vec<ImageInput> = (0..pages)
            .map(|i| ImageInput {
                name: format!("img{}.gif", i),
                media_type: "image/gif".to_string(),
                data: vec![0u8; 4].into(),
            })
            .collect();
        assemble(&inputs, &AssemblyOptions::default())
            .unwrap()
            .bytes
    }

    #[test]
    fn test_page_count() {
        let pdf = text_only_pdf(3);
        assert_eq!(QpdfWrapper::page_count(&pdf).unwrap(), 3);
    }

    #[test]
    fn test_optimize_keeps_pages() {
        let pdf = text_only_pdf(2);
        let optimized = QpdfWrapper::optimize(&pdf).unwrap();
        assert!(optimized.starts_with(b"%PDF-"));
        assert_eq!(QpdfWrapper::page_count(&optimized).unwrap(), 2);
    }

    #[test]
    fn test_invalid_input() {
        let result = QpdfWrapper::page_count(b"not a pdf");
        assert!(matches!(result, Err(Error::QpdfError { .. })));
    }
}
