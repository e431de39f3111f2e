use chrono::{DateTime, Local};
use std::path::Path;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// The extension used when the suggested one is not accepted.
pub const FALLBACK_EXTENSION: &str = ".jpg";

/// The maximum length of a normalized uploader name.
const MAX_NAME_LENGTH: usize = 30;

/// Normalizes a person's name for use in file names.
///
/// `"Ana López García"` becomes `"ana-lopez-garcia"`.
pub fn normalize_name(name: &str) -> String {
    let decomposed: String = name
        .trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect();

    let mut normalized = String::with_capacity(decomposed.len());
    for c in decomposed.chars() {
        if c == '-' && normalized.ends_with('-') {
            continue;
        }
        normalized.push(c);
    }

    normalized
        .trim_matches('-')
        .chars()
        .take(MAX_NAME_LENGTH)
        .collect()
}

/// Generates a file name of the form `[uploader_]YYYYMMDD_HHMMSS_<token>.<ext>`.
///
/// Only the first eight characters of `token` are used. The extension of
/// `original_name` is kept when it is in `allowed_extensions`.
pub fn generate_file_name(
    original_name: &str,
    uploader_name: &str,
    allowed_extensions: &[String],
    now: DateTime<Local>,
    token: &str,
) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .filter(|ext| allowed_extensions.iter().any(|allowed| allowed == ext))
        .unwrap_or_else(|| String::from(FALLBACK_EXTENSION));

    let timestamp = now.format("%Y%m%d_%H%M%S");
    let token: String = token.chars().take(8).collect();

    match normalize_name(uploader_name) {
        name if name.is_empty() => format!("{timestamp}_{token}{extension}"),
        name => format!("{name}_{timestamp}_{token}{extension}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn allowed() -> Vec<String> {
        vec![".jpg".into(), ".jpeg".into(), ".png".into(), ".heic".into()]
    }

    #[test]
    fn normalize_strips_diacritics_and_spaces() {
        assert_eq!(normalize_name("Ana López García"), "ana-lopez-garcia");
        assert_eq!(normalize_name("  José  María "), "jose-maria");
        assert_eq!(normalize_name("O'Brien & Co."), "obrien-co");
        assert_eq!(normalize_name("---"), "");
    }

    #[test]
    fn normalize_limits_length() {
        let long = "a".repeat(50);
        assert_eq!(normalize_name(&long).len(), 30);
    }

    #[test]
    fn file_name_includes_uploader_timestamp_and_token() {
        let now = Local.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap();
        let name = generate_file_name("Foto.JPG", "Ana López", &allowed(), now, "abc12345ffff");
        assert_eq!(name, "ana-lopez_20241209_120000_abc12345.jpg");
    }

    #[test]
    fn file_name_without_uploader() {
        let now = Local.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap();
        let name = generate_file_name("img.png", "", &allowed(), now, "abc12345");
        assert_eq!(name, "20241209_120000_abc12345.png");
    }

    #[test]
    fn file_name_falls_back_to_jpg() {
        let now = Local.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap();
        let name = generate_file_name("../../etc/passwd", "", &allowed(), now, "abc12345");
        assert_eq!(name, "20241209_120000_abc12345.jpg");
    }
}
