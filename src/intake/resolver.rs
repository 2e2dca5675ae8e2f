//! Source resolution for incoming images

use crate::error::{Error, Result};
use crate::intake::validate::{
    media_type_from_content, media_type_from_extension, validate_declared, IncomingFile,
    IntakePolicy, UNKNOWN_MEDIA_TYPE,
};
use base64::Engine;
use futures_util::StreamExt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Whether a path string should be expanded as a glob pattern
pub fn is_glob_pattern(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Expand a glob pattern into the matching files, sorted by path
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern).map_err(|_| Error::InvalidPattern {
        pattern: pattern.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(Error::InvalidPattern {
            pattern: pattern.to_string(),
        });
    }

    Ok(paths)
}

/// Display name for a path: its final component
fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read one image file. Type and size are checked before the content is read.
pub fn resolve_path<P: AsRef<Path>>(path: P, policy: &IntakePolicy) -> Result<IncomingFile> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(Error::ImageNotFound {
            path: path.display().to_string(),
        });
    }

    let name = file_name(path);
    let declared_type = media_type_from_extension(path);
    let size = std::fs::metadata(path)?.len();
    validate_declared(&name, &declared_type, size, policy)?;

    let data = std::fs::read(path)?;

    Ok(IncomingFile {
        name,
        declared_type,
        data,
    })
}

/// Split a `data:<type>;base64,<payload>` URL into declared type and payload
pub fn parse_data_url(data_url: &str) -> Result<(String, &str)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| Error::InvalidDataUrl {
            reason: "must start with 'data:'".to_string(),
        })?;

    let (header, payload) = rest.split_once(',').ok_or_else(|| Error::InvalidDataUrl {
        reason: "missing ',' separator".to_string(),
    })?;

    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| Error::InvalidDataUrl {
            reason: "only base64 data URLs are supported".to_string(),
        })?;

    let mime = if mime.is_empty() {
        UNKNOWN_MEDIA_TYPE.to_string()
    } else {
        mime.to_string()
    };

    Ok((mime, payload))
}

/// Resolve base64 data or a base64 `data:` URL
///
/// Declared type precedence: explicit `media_type`, then the data URL
/// header, then magic-byte sniffing.
pub fn resolve_base64(
    base64_data: &str,
    name: Option<&str>,
    media_type: Option<&str>,
    policy: &IntakePolicy,
) -> Result<IncomingFile> {
    let (url_type, payload) = if base64_data.starts_with("data:") {
        let (mime, payload) = parse_data_url(base64_data)?;
        (Some(mime), payload)
    } else {
        (None, base64_data)
    };

    let name = name
        .map(|n| n.to_string())
        .unwrap_or_else(|| "<base64>".to_string());

    // base64 expands 3 bytes to 4 chars, so the decoded size is known up front
    let approx_size = (payload.trim().len() as u64 / 4) * 3;
    if let Some(declared) = media_type.map(str::to_string).or_else(|| url_type.clone()) {
        validate_declared(&name, &declared, approx_size.saturating_sub(2), policy)?;
    }

    let engine = base64::engine::general_purpose::STANDARD;
    let data = engine.decode(payload.trim())?;

    let declared_type = media_type
        .map(|m| m.to_string())
        .or(url_type)
        .unwrap_or_else(|| media_type_from_content(&data));

    Ok(IncomingFile {
        name,
        declared_type,
        data,
    })
}

/// Check if an IP address is private/reserved (loopback, link-local, private ranges, etc.)
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // CGNAT 100.64/10
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || {
                let segments = v6.segments();
                // fc00::/7 (unique local)
                (segments[0] & 0xFE00) == 0xFC00
                    // fe80::/10 (link-local)
                    || (segments[0] & 0xFFC0) == 0xFE80
            }
        }
    }
}

/// Check URL for SSRF by resolving DNS and verifying IPs are public
async fn check_ssrf(parsed: &url::Url) -> Result<()> {
    let host = parsed.host_str().ok_or_else(|| Error::SourceResolution {
        reason: "URL has no host".to_string(),
    })?;

    let port = parsed.port_or_known_default().unwrap_or(443);
    let addr_str = format!("{}:{}", host, port);

    let addrs = tokio::net::lookup_host(&addr_str)
        .await
        .map_err(|e| Error::SourceResolution {
            reason: format!("DNS resolution failed for {}: {}", host, e),
        })?;

    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            return Err(Error::SsrfBlocked {
                url: parsed.to_string(),
            });
        }
    }

    Ok(())
}

/// Name for a downloaded image: last non-empty path segment of the URL
fn url_file_name(parsed: &url::Url) -> String {
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string())
        .unwrap_or_else(|| parsed.host_str().unwrap_or("download").to_string())
}

/// Download an image with SSRF protection and an incremental size check
pub async fn resolve_url(
    url: &str,
    name: Option<&str>,
    allow_private_urls: bool,
    policy: &IntakePolicy,
) -> Result<IncomingFile> {
    let parsed = url::Url::parse(url).map_err(|e| Error::SourceResolution {
        reason: format!("Invalid URL: {}", e),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::SourceResolution {
            reason: format!("Unsupported URL scheme: {}", parsed.scheme()),
        });
    }

    if !allow_private_urls {
        check_ssrf(&parsed).await?;
    }

    let name = name
        .map(|n| n.to_string())
        .unwrap_or_else(|| url_file_name(&parsed));

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(Error::HttpRequest)?;

    let response = client.get(parsed.clone()).send().await?;

    if !response.status().is_success() {
        return Err(Error::SourceResolution {
            reason: format!("HTTP request failed with status: {}", response.status()),
        });
    }

    let declared_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .filter(|v| v.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or_else(|| media_type_from_extension(Path::new(parsed.path())));

    let content_length = response.content_length().unwrap_or(0);
    validate_declared(&name, &declared_type, content_length, policy)?;

    // Stream the body so an oversized response is cut off early
    let mut data = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Error::HttpRequest)?;
        data.extend_from_slice(&chunk);
        if data.len() as u64 > policy.max_bytes {
            return Err(Error::FileTooLarge {
                name,
                size: data.len() as u64,
                max_size: policy.max_bytes,
            });
        }
    }

    Ok(IncomingFile {
        name,
        declared_type,
        data,
    })
}
