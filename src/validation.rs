//! Checks applied to uploaded files and request parameters before anything
//! is written to the stash.

use app_config::uploads::UploadsConfig;
use std::path::Path;
use tracing::{info, warn};

/// The event identifier used when none, or only invalid characters, were given.
pub const DEFAULT_EVENT_ID: &str = "default";

/// The maximum length of a sanitized event identifier.
const MAX_EVENT_ID_LEN: usize = 50;

/// HEIF container brands announced in the `ftyp` box at offset 4.
const HEIF_BRANDS: &[(&[u8], &str)] = &[
    (b"ftypheic", "image/heic"),
    (b"ftypheix", "image/heic"),
    (b"ftyphevc", "image/heic"),
    (b"ftypmif1", "image/heif"),
    (b"ftypmsf1", "image/heif"),
];

/// An image type recognized from the file content.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DetectedImage {
    pub mime_type: &'static str,
}

/// Why an uploaded file was refused.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum RejectReason {
    #[error("Empty file")]
    Empty,
    #[error("File too large ({size} bytes), the maximum is {limit_mb} MB")]
    TooLarge { size: usize, limit_mb: u64 },
    #[error("Invalid extension '{extension}', allowed are {allowed}")]
    InvalidExtension { extension: String, allowed: String },
    #[error("File is not a valid image")]
    NotAnImage,
}

/// Validates one uploaded file.
///
/// ## Arguments
/// * `config` - The upload limits.
/// * `file_name` - The client-supplied file name.
/// * `content` - The file content.
///
/// ## Returns
/// The detected image type. A file whose extension does not match its
/// content is accepted; the mismatch is only logged.
pub fn validate_file(
    config: &UploadsConfig,
    file_name: &str,
    content: &[u8],
) -> Result<DetectedImage, RejectReason> {
    if content.is_empty() {
        return Err(RejectReason::Empty);
    }

    if content.len() > config.max_file_size_bytes() {
        return Err(RejectReason::TooLarge {
            size: content.len(),
            limit_mb: config.max_file_size_mb,
        });
    }

    let extension = extension_of(file_name);
    if !config.is_allowed_extension(&extension) {
        return Err(RejectReason::InvalidExtension {
            extension,
            allowed: config.allowed_extensions.join(", "),
        });
    }

    let detected = detect_image(content).ok_or(RejectReason::NotAnImage)?;
    match expected_mime_type(&extension) {
        Some(expected) if expected_matches(expected, detected.mime_type) => {}
        Some(expected) => warn!(
            "Content of {file_name} looks like {detected} but its extension suggests {expected}",
            detected = detected.mime_type
        ),
        None => info!(
            "No known MIME type for extension {extension} of {file_name}, content is {detected}",
            detected = detected.mime_type
        ),
    }

    Ok(detected)
}

/// Sniffs the image type from the leading bytes.
pub fn detect_image(content: &[u8]) -> Option<DetectedImage> {
    if content.starts_with(b"\xFF\xD8\xFF") {
        return Some(DetectedImage {
            mime_type: "image/jpeg",
        });
    }

    if content.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(DetectedImage {
            mime_type: "image/png",
        });
    }

    let brand = content.get(4..12)?;
    HEIF_BRANDS
        .iter()
        .find(|(magic, _)| brand == *magic)
        .map(|(_, mime_type)| DetectedImage { mime_type })
}

/// Keeps ASCII letters, digits, `-` and `_`, truncated to 50 characters.
pub fn sanitize_event_id(event_id: &str) -> String {
    let sanitized: String = event_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_EVENT_ID_LEN)
        .collect();

    if sanitized.is_empty() {
        String::from(DEFAULT_EVENT_ID)
    } else {
        sanitized
    }
}

/// Compares the presented token with the expected one in constant time.
pub fn token_matches(presented: Option<&str>, expected: &str) -> bool {
    let Some(presented) = presented else {
        return false;
    };

    if presented.is_empty() || presented.len() != expected.len() {
        return false;
    }

    presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

fn expected_mime_type(extension: &str) -> Option<&'static str> {
    let extension = extension.trim_start_matches('.');
    match extension {
        // Not every MIME database knows the HEIF family.
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => mime_db::lookup(extension),
    }
}

fn expected_matches(expected: &str, detected: &str) -> bool {
    let heif_family = |mime: &str| mime == "image/heic" || mime == "image/heif";
    expected == detected || (heif_family(expected) && heif_family(detected))
}
