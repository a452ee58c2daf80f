//! Out-of-band header encoding: base64 (standard alphabet) of compact JSON

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ProtocolError, Result};

pub fn encode_header<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| ProtocolError::Encoding {
        message: e.to_string(),
    })?;
    Ok(STANDARD.encode(json))
}

pub fn decode_header<T: DeserializeOwned>(value: &str) -> Result<T> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| ProtocolError::Encoding {
            message: format!("invalid base64: {e}"),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| ProtocolError::Encoding {
        message: format!("invalid JSON: {e}"),
    })
}
