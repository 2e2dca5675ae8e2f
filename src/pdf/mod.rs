//! PDF processing layer
//!
//! Documents are written with lopdf and verified or optimized with qpdf.

pub mod assembler;
pub mod layout;
mod qpdf;

pub use assembler::{assemble, AssembledPdf, AssemblyOptions, ImageInput, PageOutcome, PageReport};
pub use layout::{PageLayout, PageSize, Placement, DEFAULT_MARGIN};
pub use qpdf::QpdfWrapper;
