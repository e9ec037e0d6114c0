//! Shared-secret checks for inbound HTTP deliveries.

use mimic_core::error::MimicError;

/// Constant-time string comparison to prevent timing attacks on token validation.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check a push delivery token.
///
/// Accepts `Authorization: Bearer <token>` or a `token` query parameter. An
/// empty `expected` disables the check.
pub fn verify_push_token(
    authorization: Option<&str>,
    query_token: Option<&str>,
    expected: &str,
) -> Result<(), MimicError> {
    if expected.is_empty() {
        return Ok(());
    }

    let bearer = authorization.and_then(|v| v.strip_prefix("Bearer "));
    let presented = bearer.or(query_token);
    match presented {
        Some(token) if constant_time_eq(token.trim(), expected) => Ok(()),
        Some(_) => Err(MimicError::Unauthorized("invalid push token".into())),
        None => Err(MimicError::Unauthorized("missing push token".into())),
    }
}
