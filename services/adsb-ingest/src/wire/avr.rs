//! AVR hex line decoding
//!
//! Grammar: `[*@]?[0-9A-Fa-f]{14,28};?` — 14 hex chars for a short
//! squitter, 28 for a long one.

use crate::modes::DecodeError;

/// Parse one AVR line into a Mode S payload.
pub fn parse_line(line: &str) -> Result<Vec<u8>, DecodeError> {
    let mut body = line.trim();
    if let Some(stripped) = body.strip_prefix('*').or_else(|| body.strip_prefix('@')) {
        body = stripped;
    }
    if let Some(stripped) = body.strip_suffix(';') {
        body = stripped;
    }

    if body.len() != 14 && body.len() != 28 {
        return Err(DecodeError::MalformedFrame("AVR line is not 14 or 28 hex chars"));
    }

    hex::decode(body).map_err(|_| DecodeError::MalformedFrame("AVR line is not valid hex"))
}
