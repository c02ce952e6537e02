//! Data URL <-> raw image bytes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{AppError, Result};

fn prefix_regex() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| Regex::new(r"^data:(image/\w+);base64,").expect("static regex"))
}

/// Strip an optional `data:image/<fmt>;base64,` prefix and decode the payload.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let payload = match prefix_regex().find(data_url) {
        Some(m) => &data_url[m.end()..],
        None => data_url,
    };

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| AppError::InvalidImageData(e.to_string()))?;

    if bytes.is_empty() {
        return Err(AppError::InvalidImageData("decoded image is empty".to_string()));
    }

    Ok(bytes)
}

/// Build a data URL for `bytes` with the given MIME type.
pub fn encode_data_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// MIME type named by the data URL prefix, if there is one.
pub fn mime_type(data_url: &str) -> Option<&str> {
    prefix_regex()
        .captures(data_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}
