use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("expected 3 token segments, found {0}")]
    Segments(usize),
    #[error("base64 decode error: {0}")]
    Base64(String),
    #[error("invalid token payload: {0}")]
    Payload(String),
}

#[derive(Debug, Deserialize)]
struct ExpClaim {
    exp: f64,
}

/// Expiry (unix seconds) carried in the `exp` claim of a JWT-shaped token.
///
/// Only the structure is checked, the signature is the server's business.
pub fn decode_expiry(token: &str) -> Result<i64, ClaimsError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(ClaimsError::Segments(parts.len()));
    }

    // some issuers keep the padding
    let payload = parts[1].trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ClaimsError::Base64(e.to_string()))?;

    let claims = serde_json::from_slice::<ExpClaim>(&decoded)
        .map_err(|e| ClaimsError::Payload(e.to_string()))?;

    if !claims.exp.is_finite() || claims.exp < 0.0 {
        return Err(ClaimsError::Payload(format!("exp out of range: {}", claims.exp)));
    }
    Ok(claims.exp as i64)
}

/// Cheap structural check used before attempting to decode.
pub fn has_jwt_shape(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3 && !parts[0].is_empty() && !parts[1].is_empty()
}
