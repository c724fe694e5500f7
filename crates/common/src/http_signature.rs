//! HTTP Signatures for outbound federation requests.
//!
//! Implements the draft-cavage HTTP Signatures scheme (rsa-sha256) used by
//! `ActivityPub` servers to authenticate inbox pushes.
//! See: <https://datatracker.ietf.org/doc/html/draft-cavage-http-signatures>

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::DecodePublicKey,
    sha2::Sha256,
    signature::{SignatureEncoding, Signer, Verifier},
};
use sha2::{Digest, Sha256 as Sha256Hasher};
use std::collections::HashMap;

use crate::{AppError, AppResult};

/// Parsed `Signature` header.
#[derive(Debug, Clone)]
pub struct HttpSignature {
    /// Key ID (the actor's public key URL).
    pub key_id: String,
    /// Algorithm name, `rsa-sha256` unless stated otherwise.
    pub algorithm: String,
    /// Header names covered by the signature, in signing order.
    pub headers: Vec<String>,
    /// Base64 signature value.
    pub signature: String,
}

impl HttpSignature {
    /// Parse a `Signature` header value.
    ///
    /// Format: `keyId="...",algorithm="...",headers="...",signature="..."`
    pub fn parse(header: &str) -> AppResult<Self> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;

        for part in header.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                let value = value.trim_matches('"').to_string();
                match key.trim() {
                    "keyId" => key_id = Some(value),
                    "algorithm" => algorithm = Some(value),
                    "headers" => headers = Some(value),
                    "signature" => signature = Some(value),
                    _ => {}
                }
            }
        }

        Ok(Self {
            key_id: key_id
                .ok_or_else(|| AppError::Signature("missing keyId".to_string()))?,
            algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
            headers: headers
                .unwrap_or_else(|| "date".to_string())
                .split(' ')
                .map(str::to_string)
                .collect(),
            signature: signature
                .ok_or_else(|| AppError::Signature("missing signature".to_string()))?,
        })
    }
}

/// Build the signing string for the given request components.
///
/// `headers` must be keyed by lowercase header name.
pub fn build_signature_string(
    method: &str,
    target: &str,
    headers: &HashMap<String, String>,
    signed_headers: &[String],
) -> AppResult<String> {
    let mut lines = Vec::with_capacity(signed_headers.len());

    for name in signed_headers {
        let value = if name == "(request-target)" {
            format!("{} {target}", method.to_lowercase())
        } else {
            headers
                .get(&name.to_lowercase())
                .cloned()
                .ok_or_else(|| AppError::Signature(format!("missing header: {name}")))?
        };
        lines.push(format!("{name}: {value}"));
    }

    Ok(lines.join("\n"))
}

/// Sign a request and return the `Signature` header value.
///
/// `target` is the path plus query string of the request URL.
pub fn sign_request(
    private_key: &RsaPrivateKey,
    key_id: &str,
    method: &str,
    target: &str,
    headers: &HashMap<String, String>,
    signed_header_names: &[&str],
) -> AppResult<String> {
    let names: Vec<String> = signed_header_names
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    let signing_string = build_signature_string(method, target, headers, &names)?;

    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key
        .try_sign(signing_string.as_bytes())
        .map_err(|e| AppError::Signature(format!("signing failed: {e}")))?;

    Ok(format!(
        r#"keyId="{key_id}",algorithm="rsa-sha256",headers="{}",signature="{}""#,
        signed_header_names.join(" "),
        BASE64.encode(signature.to_bytes())
    ))
}

/// Verify a parsed signature against a PEM public key.
pub fn verify_signature(
    signature: &HttpSignature,
    public_key_pem: &str,
    method: &str,
    target: &str,
    headers: &HashMap<String, String>,
) -> AppResult<bool> {
    let signing_string = build_signature_string(method, target, headers, &signature.headers)?;

    let sig_bytes = BASE64
        .decode(&signature.signature)
        .map_err(|e| AppError::Signature(format!("invalid signature encoding: {e}")))?;
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AppError::Signature(format!("invalid public key: {e}")))?;
    let signature = Signature::try_from(sig_bytes.as_slice())
        .map_err(|e| AppError::Signature(format!("invalid signature format: {e}")))?;

    Ok(VerifyingKey::<Sha256>::new(public_key)
        .verify(signing_string.as_bytes(), &signature)
        .is_ok())
}

/// `Digest` header value for a request body.
#[must_use]
pub fn calculate_digest(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(Sha256Hasher::digest(body)))
}

/// RFC 7231 date as used in the `Date` header.
#[must_use]
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
