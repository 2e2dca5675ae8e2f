//! Image to PDF MCP Server Library
//!
//! This crate keeps an ordered list of images and assembles them into a
//! single PDF, one page per image. MCP tools:
//! - `add_images`: Intake JPG/PNG/GIF images from paths, base64 or URLs
//! - `list_images`: Show the list in page order
//! - `remove_image` / `move_image` / `clear_images`: Edit the list
//! - `convert_to_pdf`: Build the PDF
//! - `download_pdf`: Fetch the PDF built from the current list

pub mod convert;
pub mod error;
pub mod intake;
pub mod pdf;
pub mod record;
pub mod server;
pub mod session;

pub use convert::{ConversionArtifact, ConversionFailure, ConversionOptions, ConversionRequest, Converter};
pub use error::{Error, Result};
pub use record::{ImageId, ImageRecord, MediaType};
pub use server::{
    run_server, run_server_with_config, ImageServer, ImageSource, ServerConfig,
};
