//! Input sanitization and parsing helpers.

use crate::{Result, VaultError};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_CATEGORY_LEN: usize = 50;
pub const MAX_USERNAME_LEN: usize = 256;
pub const MAX_URL_LEN: usize = 2048;
pub const MAX_NOTES_LEN: usize = 5000;
pub const MAX_SECRET_LEN: usize = 10_000;
pub const MAX_TAG_NAME_LEN: usize = 32;

fn too_long(field: &str, max: usize) -> VaultError {
    VaultError::InvalidInput(format!("{} must be at most {} characters", field, max))
}

/// Trim a required single-line text field.
pub fn clean_required(value: &str, field: &str, max: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(VaultError::InvalidInput(format!("{} is required", field)));
    }
    if trimmed.chars().count() > max {
        return Err(too_long(field, max));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(VaultError::InvalidInput(format!(
            "{} must not contain control characters",
            field
        )));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional text field; blank becomes `None`.
pub fn clean_optional(value: Option<&str>, field: &str, max: usize) -> Result<Option<String>> {
    let Some(trimmed) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > max {
        return Err(too_long(field, max));
    }
    Ok(Some(trimmed.to_string()))
}

/// Validate a secret value.
///
/// API keys are trimmed (they are usually pasted); passwords are kept
/// byte-for-byte.
pub fn clean_secret(value: &str, field: &str, trim: bool) -> Result<String> {
    let value = if trim { value.trim() } else { value };
    if value.trim().is_empty() {
        return Err(VaultError::InvalidInput(format!("{} is required", field)));
    }
    if value.chars().count() > MAX_SECRET_LEN {
        return Err(too_long(field, MAX_SECRET_LEN));
    }
    Ok(value.to_string())
}

/// Normalize a URL: blank becomes `None`, a missing scheme becomes
/// `https://`, and only http(s) schemes are accepted.
pub fn normalize_url(value: Option<&str>) -> Result<Option<String>> {
    let Some(url) = clean_optional(value, "URL", MAX_URL_LEN)? else {
        return Ok(None);
    };
    if url.chars().any(char::is_whitespace) {
        return Err(VaultError::InvalidInput(
            "URL must not contain whitespace".to_string(),
        ));
    }

    match url.split_once("://") {
        Some((scheme, rest)) => {
            let scheme = scheme.to_ascii_lowercase();
            if scheme != "http" && scheme != "https" {
                return Err(VaultError::InvalidInput(format!(
                    "Unsupported URL scheme: {}",
                    scheme
                )));
            }
            if rest.is_empty() {
                return Err(VaultError::InvalidInput("URL has no host".to_string()));
            }
            Ok(Some(format!("{}://{}", scheme, rest)))
        }
        None if url.contains(':') && !url.contains('.') => Err(VaultError::InvalidInput(format!(
            "Unsupported URL: {}",
            url
        ))),
        None => Ok(Some(format!("https://{}", url))),
    }
}

/// Normalized tag name used for uniqueness: trimmed, inner whitespace
/// collapsed, lowercased.
pub fn normalize_tag_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Validate a `#rrggbb` color, returning it lowercased.
pub fn validate_color(color: &str) -> Result<String> {
    let color = color.trim();
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(VaultError::InvalidInput(format!(
            "Color must look like #rrggbb, got {:?}",
            color
        )));
    }
    Ok(color.to_ascii_lowercase())
}

/// Remove duplicate ids, keeping first occurrence order.
pub fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}
