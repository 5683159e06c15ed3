//! On-disk layout for payloads and artifacts.
//!
//! Single source of truth - build paths through these helpers instead of
//! joining strings by hand.
//!
//! ## Layout
//!
//! | Location | Owner | Purpose |
//! |----------|-------|---------|
//! | `<downloads>/<collection>/<id>.<ext>` | Fetch stage | Temporary payloads (quota managed) |
//! | `<output>/<collection>/<title>_<id>/` | Artifact sink | Transcription artifacts |
//! | `<home>/tubescribe.db` | Item store | Work items and results |
//! | `<home>/journal.jsonl` | Journal | Pipeline events |

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Longest sanitized path component we produce
const MAX_COMPONENT_LEN: usize = 80;

/// Titles are truncated to this many characters in directory names
const MAX_TITLE_LEN: usize = 50;

/// Turn an arbitrary id into a single safe path component.
///
/// Keeps ASCII alphanumerics, `-` and `_`. When anything had to be replaced
/// or dropped, a short hash of the raw value is appended so distinct ids
/// never collide.
pub fn sanitize_component(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_COMPONENT_LEN)
        .collect();

    if cleaned != raw || cleaned.is_empty() {
        let digest = hex::encode(Sha256::digest(raw.as_bytes()));
        if !cleaned.is_empty() {
            cleaned.push('-');
        }
        cleaned.push_str(&digest[..8]);
    }

    cleaned
}

/// Human-readable directory fragment for a title
pub fn safe_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();

    let truncated: String = kept.trim().chars().take(MAX_TITLE_LEN).collect();
    let truncated = truncated.trim_end().to_string();

    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated
    }
}

/// Deterministic payload location, so a retried fetch overwrites its own file
pub fn payload_path(temp_root: &Path, collection_id: &str, external_id: &str, ext: &str) -> PathBuf {
    temp_root
        .join(sanitize_component(collection_id))
        .join(format!("{}.{}", sanitize_component(external_id), ext))
}

/// Directory holding the artifacts of one completed item
pub fn artifact_dir(
    output_root: &Path,
    collection_name: &str,
    title: &str,
    external_id: &str,
) -> PathBuf {
    output_root
        .join(sanitize_component(collection_name))
        .join(format!("{}_{}", safe_title(title), sanitize_component(external_id)))
}
