//! GitHub webhook signature verification (`X-Hub-Signature-256`).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the header value GitHub would send for `body`: `sha256=<hex>`.
///
/// # Panics
///
/// Never in practice: HMAC pads or hashes the key, so `new_from_slice`
/// accepts every key length and its error branch is unreachable.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take a key of any size");
    mac.update(body);
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Verifies the signature header against the raw, unmodified request body.
///
/// Returns false when the header is absent, lacks the `sha256=` prefix or is
/// not valid hex. The digest comparison is constant-time
/// (`Mac::verify_slice`).
pub fn verify_signature(body: &[u8], secret: &str, signature_header: Option<&str>) -> bool {
    let Some(header) = signature_header else {
        warn!("{} header is missing", SIGNATURE_HEADER);
        return false;
    };

    let Some(hex_signature) = header.strip_prefix(SIGNATURE_PREFIX) else {
        warn!("Signature header does not start with '{}'", SIGNATURE_PREFIX);
        return false;
    };

    // GitHub always sends lowercase hex
    if !hex_signature
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        warn!("Signature header is not lowercase hex");
        return false;
    }

    let Ok(expected) = hex::decode(hex_signature) else {
        warn!("Signature header is not valid hex");
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    if mac.verify_slice(&expected).is_err() {
        warn!("Signature mismatch");
        return false;
    }
    true
}
