//! Content-type detection and upload-group resolution.
//!
//! Classification tries the sniffed type against the configured groups
//! first, then the type implied by the filename extension, and finally the
//! default policy when one is enabled.

use std::path::Path;

use crate::config::UploadConfig;

/// How many leading bytes the sniffer looks at.
pub const SNIFF_LEN: usize = 512;

/// Policy resolved for one upload: a configured group, or a single-use
/// policy synthesized from the default section (`name` is `None` then).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPolicy {
    pub name: Option<String>,
    pub max_upload_size: u64,
    pub folder: String,
}

/// Outcome of classifying an upload.
#[derive(Debug, Clone)]
pub struct Classification {
    /// The negotiated content type; the sniffed type unless the extension
    /// fallback produced the match.
    pub content_type: String,
    /// `None` when no group accepts the type and no default policy applies.
    pub group: Option<GroupPolicy>,
}

/// Sniff a content type from the leading bytes of a payload.
///
/// Magic-byte detection via `infer`; plain text has no magic bytes, so
/// NUL-free valid UTF-8 falls back to `text/plain` and anything else to
/// `application/octet-stream`.
pub fn detect_content_type(head: &[u8]) -> String {
    let head = &head[..head.len().min(SNIFF_LEN)];
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    if std::str::from_utf8(head).is_ok() && !head.contains(&0) {
        return "text/plain".to_string();
    }
    "application/octet-stream".to_string()
}

/// Classify a payload against the configured groups.
pub fn classify(config: &UploadConfig, head: &[u8], filename: &str) -> Classification {
    let sniffed = detect_content_type(head);
    if let Some(group) = configured_group(config, &sniffed) {
        return Classification {
            content_type: sniffed,
            group: Some(group),
        };
    }
    // Second chance: the extension table may know the file better than its
    // magic bytes do.
    if let Some(by_extension) = mime_guess::from_path(filename).first_raw() {
        if let Some(group) = configured_group(config, by_extension) {
            return Classification {
                content_type: by_extension.to_string(),
                group: Some(group),
            };
        }
    }
    // The default policy applies regardless of the actual type.
    let group = default_policy(config);
    Classification {
        content_type: sniffed,
        group,
    }
}

/// First configured group accepting `content_type`, in declaration order.
fn configured_group(config: &UploadConfig, content_type: &str) -> Option<GroupPolicy> {
    config
        .groups
        .iter()
        .find(|group| group.mime_types.iter().any(|mime| mime == content_type))
        .map(|group| GroupPolicy {
            name: Some(group.name.clone()),
            max_upload_size: group.max_upload_size,
            folder: group.folder.clone(),
        })
}

fn default_policy(config: &UploadConfig) -> Option<GroupPolicy> {
    let defaults = &config.defaults;
    defaults.allow_any_mime_type.then(|| GroupPolicy {
        name: None,
        max_upload_size: defaults.max_upload_size,
        folder: defaults.folder.clone(),
    })
}

/// Extension the object is stored under: the platform's first extension for
/// the negotiated type, else whatever the client's filename carried.
pub fn storage_extension(content_type: &str, filename: &str) -> Option<String> {
    if let Some(extensions) = mime_guess::get_mime_extensions_str(content_type) {
        if let Some(extension) = extensions.first() {
            return Some((*extension).to_string());
        }
    }
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
