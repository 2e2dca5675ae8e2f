//! Image intake: source resolution and validation

pub mod resolver;
pub mod validate;

pub use resolver::{
    expand_pattern, is_glob_pattern, parse_data_url, resolve_base64, resolve_path, resolve_url,
};
pub use validate::{
    accept, intake_files, validate_declared, IncomingFile, IntakePolicy, IntakeReport, Rejection,
    DEFAULT_MAX_IMAGE_BYTES,
};
