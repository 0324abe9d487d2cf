//! Request-signature verification.
//!
//! Wallet-mutating endpoints carry an httpsig-style Ed25519 signature over
//! `(request-target)` and `digest`, keyed by the wallet's payment id and
//! verified against its registered public key. In the `local` environment an
//! unsigned request falls back to the wallet named in the request, which
//! keeps development and smoke tests unencumbered.

use axum::http::HeaderMap;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use grantd_core::WalletId;
use grantd_engine::Service;
use sha2::{Digest, Sha256};

use crate::ApiError;

struct ParsedSignature {
    key_id: String,
    headers: Vec<String>,
    signature: Vec<u8>,
}

fn unauthorized(message: &str) -> ApiError {
    ApiError::Unauthorized(message.to_string())
}

/// Parse `keyId="...",algorithm="...",headers="...",signature="..."`.
fn parse_signature_header(raw: &str) -> Option<ParsedSignature> {
    let mut key_id = None;
    let mut headers = None;
    let mut signature = None;
    for part in raw.split(',') {
        let (name, value) = part.trim().split_once('=')?;
        let value = value.trim_matches('"');
        match name {
            "keyId" => key_id = Some(value.to_string()),
            "headers" => {
                headers = Some(value.split(' ').map(str::to_string).collect::<Vec<_>>())
            }
            "signature" => {
                signature = base64::engine::general_purpose::STANDARD.decode(value).ok()
            }
            _ => {}
        }
    }
    Some(ParsedSignature {
        key_id: key_id?,
        headers: headers?,
        signature: signature?,
    })
}

pub fn body_digest(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!(
        "SHA-256={}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    )
}

/// The canonical string both sides sign.
pub fn signing_string(method: &str, path: &str, digest: &str, signed_headers: &[String]) -> String {
    signed_headers
        .iter()
        .map(|h| match h.as_str() {
            "(request-target)" => {
                format!("(request-target): {} {path}", method.to_lowercase())
            }
            "digest" => format!("digest: {digest}"),
            other => format!("{other}: "),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Verify the request signature and return the signing wallet.
///
/// `expected_wallet` is the wallet the request claims to act on (from its
/// path or body); when present it must match the signature's key id.
pub fn verify_wallet_signature(
    service: &Service,
    expected_wallet: Option<WalletId>,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WalletId, ApiError> {
    let raw = headers
        .get("signature")
        .and_then(|v| v.to_str().ok());
    let Some(raw) = raw else {
        if service.config.environment == "local" {
            return expected_wallet.ok_or_else(|| unauthorized("missing signature"));
        }
        return Err(unauthorized("missing signature"));
    };

    let parsed = parse_signature_header(raw).ok_or_else(|| unauthorized("malformed signature"))?;
    let wallet_id: WalletId = parsed
        .key_id
        .parse()
        .map_err(|_| unauthorized("signature keyId is not a wallet id"))?;
    if expected_wallet.is_some_and(|expected| expected != wallet_id) {
        return Err(unauthorized("signature keyId does not match the wallet"));
    }

    if !parsed.headers.iter().any(|h| h == "(request-target)")
        || !parsed.headers.iter().any(|h| h == "digest")
    {
        return Err(unauthorized("signature must cover (request-target) and digest"));
    }

    let claimed_digest = headers
        .get("digest")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing digest"))?;
    let computed_digest = body_digest(body);
    if claimed_digest != computed_digest {
        return Err(unauthorized("digest does not match the body"));
    }

    let wallet = service
        .store
        .get_wallet(&wallet_id)
        .map_err(ApiError::Grant)?
        .ok_or_else(|| unauthorized("unknown wallet"))?;

    let key_bytes: [u8; 32] = hex::decode(&wallet.public_key)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| unauthorized("wallet has no usable public key"))?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| unauthorized("bad public key"))?;
    let signature = Signature::from_slice(&parsed.signature)
        .map_err(|_| unauthorized("malformed signature bytes"))?;

    let message = signing_string(method, path, &computed_digest, &parsed.headers);
    verifying_key
        .verify(message.as_bytes(), &signature)
        .map_err(|_| unauthorized("signature verification failed"))?;
    Ok(wallet_id)
}
