//! Cryptographically secure random token generation.
//!
//! All security-relevant identifiers in the application (session identifiers,
//! OAuth2 state, OIDC nonce, display correlation ids) come from here. Bytes
//! are read from the operating system CSPRNG via `getrandom`; there is no
//! fallback source, a failing entropy source is surfaced as `EntropyError`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// The system entropy source could not supply the requested bytes.
#[derive(Debug, thiserror::Error)]
#[error("entropy source failed: {0}")]
pub struct EntropyError(#[from] getrandom::Error);

/// Generate a random string from `n_bytes` of OS entropy.
///
/// Encoded as URL-safe base64 without padding when `url_safe` is true
/// (suitable for query parameters), lowercase hex otherwise.
pub fn random_string(n_bytes: usize, url_safe: bool) -> Result<String, EntropyError> {
    let mut buf = vec![0u8; n_bytes];
    getrandom::getrandom(&mut buf)?;

    if url_safe {
        Ok(URL_SAFE_NO_PAD.encode(&buf))
    } else {
        Ok(hex::encode(&buf))
    }
}
