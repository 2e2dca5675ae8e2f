//! MCP Server implementation using rmcp

use crate::convert::{ConversionArtifact, ConversionOptions, ConversionRequest, Converter};
use crate::error::Error;
use crate::intake::{
    expand_pattern, is_glob_pattern, resolve_base64, resolve_path, resolve_url, IncomingFile,
    IntakePolicy, IntakeReport, Rejection, DEFAULT_MAX_IMAGE_BYTES,
};
use crate::pdf::{PageReport, PageSize, DEFAULT_MARGIN};
use crate::record::{ImageId, ImageRecord};
use crate::session::{ArtifactRef, ArtifactStore, ListAction, Placement, Session};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Image source specification
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum ImageSource {
    /// File path or glob pattern
    Path {
        /// Path to the image file, or a glob such as `/scans/*.png`
        path: String,
    },
    /// Base64 encoded image data or a `data:` URL
    Base64 {
        /// Base64 content, optionally as `data:image/png;base64,...`
        base64: String,
        /// Display name for the image
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Declared media type (e.g. `image/png`)
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    /// URL to download the image from
    Url {
        /// URL of the image
        url: String,
        /// Display name for the image
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

fn optional_string<E: serde::de::Error>(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> std::result::Result<Option<String>, E> {
    match obj.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(E::custom(format!("\"{}\" must be a string", key))),
    }
}

impl<'de> serde::Deserialize<'de> for ImageSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        if let Some(obj) = value.as_object() {
            if let Some(v) = obj.get("path") {
                if let Some(s) = v.as_str() {
                    return Ok(ImageSource::Path {
                        path: s.to_string(),
                    });
                }
                return Err(serde::de::Error::custom("\"path\" must be a string"));
            }
            if let Some(v) = obj.get("base64") {
                if let Some(s) = v.as_str() {
                    return Ok(ImageSource::Base64 {
                        base64: s.to_string(),
                        name: optional_string::<D::Error>(obj, "name")?,
                        media_type: optional_string::<D::Error>(obj, "media_type")?,
                    });
                }
                return Err(serde::de::Error::custom("\"base64\" must be a string"));
            }
            if let Some(v) = obj.get("url") {
                if let Some(s) = v.as_str() {
                    return Ok(ImageSource::Url {
                        url: s.to_string(),
                        name: optional_string::<D::Error>(obj, "name")?,
                    });
                }
                return Err(serde::de::Error::custom("\"url\" must be a string"));
            }
            let keys: Vec<&String> = obj.keys().collect();
            Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with one of \"path\", \"base64\", or \"url\", but got keys: {:?}",
                keys
            )))
        } else {
            Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with one of \"path\", \"base64\", or \"url\", but got {}",
                match &value {
                    serde_json::Value::Array(_) => "an array",
                    serde_json::Value::String(_) => "a string",
                    serde_json::Value::Number(_) => "a number",
                    serde_json::Value::Bool(_) => "a boolean",
                    serde_json::Value::Null => "null",
                    _ => "unknown type",
                }
            )))
        }
    }
}

/// Security and resource configuration for the image-to-PDF server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories path sources are confined to (empty: no restriction)
    pub resource_dirs: Vec<String>,
    /// Allow URLs that resolve to private/reserved IPs (default: false)
    pub allow_private_urls: bool,
    /// Per-image size ceiling in bytes (default: 5MB)
    pub max_image_bytes: u64,
    /// Maximum total bytes of cached PDFs (default: 256MB)
    pub artifact_max_bytes: usize,
    /// Maximum number of cached PDFs (default: 16)
    pub artifact_max_entries: usize,
    /// Page size when a conversion does not name one
    pub page_size: PageSize,
    /// Margin in points when a conversion does not name one
    pub margin: f32,
    /// Longest edge of list_images thumbnails, in pixels
    pub thumbnail_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            allow_private_urls: false,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            artifact_max_bytes: 256 * 1024 * 1024, // 256MB
            artifact_max_entries: 16,
            page_size: PageSize::A4,
            margin: DEFAULT_MARGIN,
            thumbnail_size: 150,
        }
    }
}

impl ServerConfig {
    /// Read overrides from `IMAGE_PDF_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unparseable values keep the
    /// default and are logged.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dirs) = lookup("IMAGE_PDF_RESOURCE_DIRS") {
            config.resource_dirs = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().to_string())
                .collect();
        }

        if let Some(raw) = lookup("IMAGE_PDF_ALLOW_PRIVATE_URLS") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.allow_private_urls = true,
                "0" | "false" | "no" | "" => config.allow_private_urls = false,
                _ => tracing::warn!(value = %raw, "ignoring invalid IMAGE_PDF_ALLOW_PRIVATE_URLS"),
            }
        }

        config.max_image_bytes = parse_or_default(
            &lookup,
            "IMAGE_PDF_MAX_IMAGE_BYTES",
            config.max_image_bytes,
        );
        config.page_size = parse_or_default(&lookup, "IMAGE_PDF_PAGE_SIZE", config.page_size);

        let margin: f32 = parse_or_default(&lookup, "IMAGE_PDF_MARGIN", config.margin);
        if margin.is_finite() && margin >= 0.0 {
            config.margin = margin;
        } else {
            tracing::warn!(margin, "ignoring invalid IMAGE_PDF_MARGIN");
        }

        config
    }

    fn intake_policy(&self) -> IntakePolicy {
        IntakePolicy {
            max_bytes: self.max_image_bytes,
        }
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring invalid configuration value");
            default
        }),
        None => default,
    }
}

/// Image-to-PDF MCP Server
#[derive(Clone)]
pub struct ImageServer {
    session: Arc<RwLock<Session>>,
    artifacts: Arc<ArtifactStore>,
    converter: Arc<Converter>,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Shared response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ImageSummary {
    /// Stable id used by remove_image and move_image
    pub id: String,
    /// 1-based position, equal to the page number in the PDF
    pub position: u32,
    pub name: String,
    pub media_type: String,
    /// Size in bytes
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// PNG thumbnail as a data URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl ImageSummary {
    fn from_record(record: &ImageRecord, position: usize) -> Self {
        Self {
            id: record.id.to_string(),
            position: position as u32 + 1,
            name: record.name.clone(),
            media_type: record.media_type.to_string(),
            size: record.size(),
            width: record.dimensions.map(|(w, _)| w),
            height: record.dimensions.map(|(_, h)| h),
            thumbnail: None,
        }
    }
}

// ============================================================================
// Request/Response types for add_images
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddImagesParams {
    /// Image sources, appended in this order
    pub sources: Vec<ImageSource>,
}

#[derive(Debug, Serialize)]
pub struct AddImagesResult {
    /// Images appended to the list
    pub added: Vec<ImageSummary>,
    /// Files that were not accepted, with the reason
    pub rejected: Vec<Rejection>,
    /// List length after the append
    pub total_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for list_images
// ============================================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListImagesParams {
    /// Include PNG thumbnails (data URLs)
    #[serde(default)]
    pub include_thumbnails: bool,
}

#[derive(Debug, Serialize)]
pub struct ListImagesResult {
    pub images: Vec<ImageSummary>,
    pub total_count: u32,
    /// File name of the PDF built from the current list, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_pdf: Option<String>,
}

// ============================================================================
// Request/Response types for remove_image
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RemoveImageParams {
    /// Id of the image to remove
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveImageResult {
    pub id: String,
    /// False when no image had this id
    pub removed: bool,
    pub total_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for move_image
// ============================================================================

/// How a moved image is placed relative to its target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MovePlacement {
    Before,
    After,
    /// Drag-and-drop: take the target's index
    #[default]
    Onto,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveImageParams {
    /// Id of the image to move
    pub id: String,
    /// Id of the image to move next to. Omitted: nothing moves.
    #[serde(default)]
    pub target: Option<String>,
    /// "before", "after" or "onto" (default)
    #[serde(default)]
    pub placement: MovePlacement,
}

#[derive(Debug, Serialize)]
pub struct MoveImageResult {
    pub id: String,
    /// False when the move was a no-op
    pub moved: bool,
    /// Ids in list order after the move
    pub order: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for clear_images
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ClearImagesResult {
    pub removed: u32,
}

// ============================================================================
// Request/Response types for convert_to_pdf
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConvertToPdfParams {
    /// Page size: "a4", "letter" or "legal" (default: server setting)
    #[serde(default)]
    pub page_size: Option<PageSize>,
    /// Margin on every side, in points (default: server setting)
    #[serde(default)]
    pub margin: Option<f32>,
    /// Document title stored in the PDF metadata
    #[serde(default)]
    pub title: Option<String>,
    /// Rewrite the output with object streams (smaller file)
    #[serde(default)]
    pub optimize: bool,
    /// Also write the PDF to this path
    #[serde(default)]
    pub output_path: Option<String>,
    /// Return the PDF as a data URL (default: true)
    #[serde(default = "default_true")]
    pub include_data: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct ConvertToPdfResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub page_count: u32,
    /// What was placed on each page
    pub pages: Vec<PageReport>,
    /// Key of the cached PDF. Absent when the list changed during conversion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_data_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for download_pdf
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadPdfParams {
    /// Write the PDF to this path
    #[serde(default)]
    pub output_path: Option<String>,
    /// Return the PDF as a data URL (default: true)
    #[serde(default = "default_true")]
    pub include_data: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct DownloadPdfResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub page_count: u32,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_data_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl ImageServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new ImageServer with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let artifacts = ArtifactStore::new(config.artifact_max_entries, config.artifact_max_bytes);
        Self {
            session: Arc::new(RwLock::new(Session::new())),
            artifacts: Arc::new(artifacts),
            converter: Arc::new(Converter::new()),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Add images to the end of the list
    #[tool(
        description = "Add images to the end of the ordered list. Accepts JPG, PNG and GIF up to the size limit; other files are reported as rejected and the rest are still added.

Source format: each element must be one of {\"path\": \"/abs/a.png\"} (glob patterns allowed), {\"base64\": \"...\", \"name\": \"a.png\", \"media_type\": \"image/png\"} (data URLs allowed), or {\"url\": \"https://...\"}"
    )]
    async fn add_images(&self, Parameters(params): Parameters<AddImagesParams>) -> String {
        let result = self.process_add_images(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "add_images failed");
            AddImagesResult {
                added: vec![],
                rejected: vec![],
                total_count: 0,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// List images in page order
    #[tool(
        description = "List the images in page order with their ids, names, types, sizes and pixel dimensions. Set include_thumbnails to get small PNG previews."
    )]
    async fn list_images(&self, Parameters(params): Parameters<ListImagesParams>) -> String {
        let result = self.process_list_images(&params).await;

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Remove an image by id
    #[tool(description = "Remove one image from the list by id. Unknown ids leave the list unchanged.")]
    async fn remove_image(&self, Parameters(params): Parameters<RemoveImageParams>) -> String {
        let result = self.process_remove_image(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "remove_image failed");
            RemoveImageResult {
                id: params.id.clone(),
                removed: false,
                total_count: 0,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Reorder an image
    #[tool(
        description = "Move an image relative to another one. Placement \"before\" or \"after\" puts it next to the target; \"onto\" (default) behaves like drag-and-drop and gives it the target's position. Without a valid target nothing moves."
    )]
    async fn move_image(&self, Parameters(params): Parameters<MoveImageParams>) -> String {
        let result = self.process_move_image(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "move_image failed");
            MoveImageResult {
                id: params.id.clone(),
                moved: false,
                order: vec![],
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Empty the list
    #[tool(description = "Remove every image from the list.")]
    async fn clear_images(&self) -> String {
        let result = self.process_clear_images().await;

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Build a PDF from the list
    #[tool(
        description = "Convert the images into one PDF, one page per image in list order. Images are scaled down to fit inside the page margins and centered; they are never enlarged. Images that cannot be embedded get a page with an explanatory message instead.

Returns the file name, a per-page report and the PDF as a data URL. Optionally writes the PDF to output_path."
    )]
    async fn convert_to_pdf(&self, Parameters(params): Parameters<ConvertToPdfParams>) -> String {
        let result = self.process_convert(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "convert_to_pdf failed");
            ConvertToPdfResult {
                error: Some(e.client_message()),
                ..Default::default()
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Fetch the current PDF
    #[tool(
        description = "Return the PDF built from the current list, as a data URL and/or written to output_path. Fails if the list changed since the last conversion."
    )]
    async fn download_pdf(&self, Parameters(params): Parameters<DownloadPdfParams>) -> String {
        let result = self.process_download(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "download_pdf failed");
            DownloadPdfResult {
                error: Some(e.client_message()),
                ..Default::default()
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }
}

impl ImageServer {
    fn source_name(source: &ImageSource) -> String {
        match source {
            ImageSource::Path { path } => path.clone(),
            ImageSource::Base64 { name, .. } => {
                name.clone().unwrap_or_else(|| "<base64>".to_string())
            }
            ImageSource::Url { url, name } => name.clone().unwrap_or_else(|| url.clone()),
        }
    }

    /// Resolve one source into raw files. A glob may yield several, and each
    /// match succeeds or fails on its own.
    async fn resolve_source(
        &self,
        source: &ImageSource,
    ) -> Vec<(String, crate::error::Result<IncomingFile>)> {
        let policy = self.config.intake_policy();
        match source {
            ImageSource::Path { path } if is_glob_pattern(path) => match expand_pattern(path) {
                Ok(matches) => matches
                    .into_iter()
                    .map(|matched| {
                        let name = matched
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_else(|| matched.to_string_lossy().to_string());
                        let file = self
                            .validate_path_access(&matched.to_string_lossy())
                            .and_then(|allowed| resolve_path(allowed, &policy));
                        (name, file)
                    })
                    .collect(),
                Err(e) => vec![(Self::source_name(source), Err(e))],
            },
            ImageSource::Path { path } => {
                let file = self
                    .validate_path_access(path)
                    .and_then(|allowed| resolve_path(allowed, &policy));
                vec![(Self::source_name(source), file)]
            }
            ImageSource::Base64 {
                base64,
                name,
                media_type,
            } => vec![(
                Self::source_name(source),
                resolve_base64(base64, name.as_deref(), media_type.as_deref(), &policy),
            )],
            ImageSource::Url { url, name } => vec![(
                Self::source_name(source),
                resolve_url(
                    url,
                    name.as_deref(),
                    self.config.allow_private_urls,
                    &policy,
                )
                .await,
            )],
        }
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let canonical =
            std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
                path: path.to_string(),
            })?;

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical.starts_with(&canonical_dir) {
                    return Ok(canonical);
                }
            }
        }

        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Validate that an output path is within allowed resource directories.
    /// Canonicalizes the parent directory since the output file may not exist yet.
    fn validate_output_path_access(&self, path: &str) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let path_obj = Path::new(path);
        let parent = path_obj.parent().unwrap_or(Path::new("."));

        let canonical_parent =
            std::fs::canonicalize(parent).map_err(|_| Error::PathAccessDenied {
                path: path.to_string(),
            })?;

        let canonical_target =
            canonical_parent.join(path_obj.file_name().unwrap_or(std::ffi::OsStr::new("")));

        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical_target.starts_with(&canonical_dir) {
                    return Ok(canonical_target);
                }
            }
        }

        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Write output data to a file path, with sandbox validation.
    fn write_output(
        &self,
        output_path: &Option<String>,
        data: &[u8],
    ) -> crate::error::Result<Option<String>> {
        if let Some(ref path_str) = output_path {
            self.validate_output_path_access(path_str)?;

            let path = Path::new(path_str);

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            std::fs::write(path, data)?;
            Ok(Some(path_str.clone()))
        } else {
            Ok(None)
        }
    }

    /// Apply a list action and evict whatever artifact it invalidated
    async fn dispatch(&self, action: &ListAction) -> bool {
        let dispatched = self.session.write().await.dispatch(action);
        if let Some(stale) = dispatched.invalidated {
            self.artifacts.remove(&stale.key);
        }
        dispatched.changed
    }

    fn parse_id(id: &str) -> crate::error::Result<ImageId> {
        ImageId::from_str(id.trim())
    }

    async fn process_add_images(
        &self,
        params: &AddImagesParams,
    ) -> crate::error::Result<AddImagesResult> {
        let policy = self.config.intake_policy();
        let mut report = IntakeReport::default();

        for source in &params.sources {
            for (name, file) in self.resolve_source(source).await {
                match file {
                    Ok(file) => report.absorb(file, &policy),
                    Err(e) => report.reject(&name, &e),
                }
            }
        }

        let accepted = report.accepted;
        let ids: Vec<ImageId> = accepted.iter().map(|r| r.id).collect();

        // positions are read under the same guard that appends the batch
        let (added, total_count, invalidated) = {
            let mut session = self.session.write().await;
            let invalidated = if accepted.is_empty() {
                None
            } else {
                session.dispatch(&ListAction::Append(accepted)).invalidated
            };
            let images = session.images();
            let added: Vec<ImageSummary> = ids
                .iter()
                .filter_map(|id| {
                    let position = images.position(*id)?;
                    images
                        .get(*id)
                        .map(|record| ImageSummary::from_record(record, position))
                })
                .collect();
            (added, images.len() as u32, invalidated)
        };
        if let Some(stale) = invalidated {
            self.artifacts.remove(&stale.key);
        }

        tracing::info!(
            added = added.len(),
            rejected = report.rejected.len(),
            total = total_count,
            "images added"
        );

        Ok(AddImagesResult {
            added,
            rejected: report.rejected,
            total_count,
            error: None,
        })
    }

    async fn process_list_images(&self, params: &ListImagesParams) -> ListImagesResult {
        let (records, current_pdf) = {
            let session = self.session.read().await;
            (
                session.images().records().to_vec(),
                session.artifact().map(|a| a.file_name.clone()),
            )
        };

        let mut images: Vec<ImageSummary> = records
            .iter()
            .enumerate()
            .map(|(i, record)| ImageSummary::from_record(record, i))
            .collect();

        if params.include_thumbnails && !records.is_empty() {
            let edge = self.config.thumbnail_size;
            let thumbnails = tokio::task::spawn_blocking(move || {
                records
                    .iter()
                    .map(|record| thumbnail_data_url(record, edge))
                    .collect::<Vec<_>>()
            })
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "thumbnail task failed");
                Vec::new()
            });

            for (summary, thumbnail) in images.iter_mut().zip(thumbnails) {
                summary.thumbnail = thumbnail;
            }
        }

        ListImagesResult {
            total_count: images.len() as u32,
            images,
            current_pdf,
        }
    }

    async fn process_remove_image(
        &self,
        params: &RemoveImageParams,
    ) -> crate::error::Result<RemoveImageResult> {
        let id = Self::parse_id(&params.id)?;
        let removed = self.dispatch(&ListAction::Remove(id)).await;
        let total_count = self.session.read().await.images().len() as u32;

        Ok(RemoveImageResult {
            id: id.to_string(),
            removed,
            total_count,
            error: None,
        })
    }

    async fn process_move_image(
        &self,
        params: &MoveImageParams,
    ) -> crate::error::Result<MoveImageResult> {
        let id = Self::parse_id(&params.id)?;
        let target = params.target.as_deref().map(Self::parse_id).transpose()?;

        let action = match (params.placement, target) {
            (MovePlacement::Onto, target) => ListAction::DropOnto { source: id, target },
            (_, None) => ListAction::DropOnto {
                source: id,
                target: None,
            },
            (MovePlacement::Before, Some(target)) => ListAction::Move {
                id,
                target,
                placement: Placement::Before,
            },
            (MovePlacement::After, Some(target)) => ListAction::Move {
                id,
                target,
                placement: Placement::After,
            },
        };

        let moved = self.dispatch(&action).await;
        let order = self
            .session
            .read()
            .await
            .images()
            .ids()
            .iter()
            .map(ImageId::to_string)
            .collect();

        Ok(MoveImageResult {
            id: id.to_string(),
            moved,
            order,
            error: None,
        })
    }

    async fn process_clear_images(&self) -> ClearImagesResult {
        let removed = self.session.read().await.images().len() as u32;
        self.dispatch(&ListAction::Clear).await;
        ClearImagesResult { removed }
    }

    async fn process_convert(
        &self,
        params: &ConvertToPdfParams,
    ) -> crate::error::Result<ConvertToPdfResult> {
        let snapshot = self.session.read().await.snapshot();
        if snapshot.records.is_empty() {
            return Err(Error::EmptySubmission);
        }
        if let Some(path) = &params.output_path {
            self.validate_output_path_access(path)?;
        }

        let options = ConversionOptions {
            page_size: params.page_size.unwrap_or(self.config.page_size),
            margin: params.margin.unwrap_or(self.config.margin),
            title: params.title.clone(),
            optimize: params.optimize,
        };
        let request = ConversionRequest::from_records(&snapshot.records, options);
        let artifact = Arc::new(self.converter.convert(request).await?);

        let output_path = self.write_output(&params.output_path, &artifact.pdf)?;
        let artifact_key = self.register_artifact(&artifact, snapshot.revision).await;
        let pdf_data_url = params.include_data.then(|| pdf_data_url(&artifact.pdf));

        Ok(ConvertToPdfResult {
            file_name: Some(artifact.file_name.clone()),
            page_count: artifact.page_count,
            pages: artifact.pages.clone(),
            artifact_key,
            pdf_data_url,
            output_path,
            error: None,
        })
    }

    /// Cache the artifact and make it the session's current PDF, unless the
    /// list moved on while it was being built.
    async fn register_artifact(
        &self,
        artifact: &Arc<ConversionArtifact>,
        revision: u64,
    ) -> Option<String> {
        let mut session = self.session.write().await;
        if session.revision() != revision {
            tracing::info!(
                file_name = %artifact.file_name,
                "list changed during conversion, artifact not registered"
            );
            return None;
        }

        let key = self.artifacts.put(artifact.clone())?;
        let reference = ArtifactRef {
            key: key.clone(),
            file_name: artifact.file_name.clone(),
            revision,
        };
        match session.set_artifact(reference) {
            Ok(Some(previous)) => {
                self.artifacts.remove(&previous.key);
                Some(key)
            }
            Ok(None) => Some(key),
            Err(rejected) => {
                self.artifacts.remove(&rejected.key);
                None
            }
        }
    }

    async fn process_download(
        &self,
        params: &DownloadPdfParams,
    ) -> crate::error::Result<DownloadPdfResult> {
        let reference = self
            .session
            .read()
            .await
            .artifact()
            .cloned()
            .ok_or_else(|| Error::NoArtifact {
                reason: "convert the current images first".to_string(),
            })?;

        let artifact = self
            .artifacts
            .get(&reference.key)
            .ok_or_else(|| Error::NoArtifact {
                reason: "the PDF is no longer cached, convert again".to_string(),
            })?;

        let output_path = self.write_output(&params.output_path, &artifact.pdf)?;
        let pdf_data_url = params.include_data.then(|| pdf_data_url(&artifact.pdf));

        Ok(DownloadPdfResult {
            file_name: Some(artifact.file_name.clone()),
            page_count: artifact.page_count,
            size: artifact.pdf.len() as u64,
            pdf_data_url,
            output_path,
            error: None,
        })
    }
}

fn pdf_data_url(pdf: &[u8]) -> String {
    let engine = base64::engine::general_purpose::STANDARD;
    format!("data:application/pdf;base64,{}", engine.encode(pdf))
}

/// PNG preview no larger than `edge` on either side
fn thumbnail_data_url(record: &ImageRecord, edge: u32) -> Option<String> {
    let decoded = image::load_from_memory_with_format(&record.data, record.media_type.image_format())
        .map_err(|e| tracing::warn!(name = %record.name, error = %e, "thumbnail decode failed"))
        .ok()?;

    let mut buf = Vec::new();
    decoded
        .thumbnail(edge, edge)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| tracing::warn!(name = %record.name, error = %e, "thumbnail encode failed"))
        .ok()?;

    let engine = base64::engine::general_purpose::STANDARD;
    Some(format!("data:image/png;base64,{}", engine.encode(&buf)))
}

impl Default for ImageServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for ImageServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Image to PDF server. Add JPG, PNG or GIF images with add_images, arrange them \
                 with move_image and remove_image, then call convert_to_pdf to get one PDF page \
                 per image in list order."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    tracing::info!(
        resource_dirs = ?config.resource_dirs,
        page_size = ?config.page_size,
        max_image_bytes = config.max_image_bytes,
        "configuration loaded"
    );

    let server = ImageServer::with_config(config);

    tracing::info!("Image PDF MCP Server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
