use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Fields a gateway signs for one forwarded request.
///
/// `target` is the path plus query string and `identity` the forwarded
/// caller id (empty for anonymous requests), so neither can be swapped on a
/// signed request.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub timestamp: i64,
    pub nonce: &'a str,
    pub identity: &'a str,
    pub body: &'a [u8],
}

/// HMAC-SHA256 over `method|target|timestamp|nonce|identity|sha256(body)`, hex encoded.
pub fn generate_signature(secret: &str, request: &SignedRequest<'_>) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    let body_hash = hex::encode(Sha256::digest(request.body));
    let payload = format!(
        "{}|{}|{}|{}|{}|{}",
        request.method, request.target, request.timestamp, request.nonce, request.identity, body_hash
    );

    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a presented signature.
pub fn verify_signature(
    secret: &str,
    request: &SignedRequest<'_>,
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = generate_signature(secret, request)?;
    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.trim().as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
