//! Request signing for outbound deliveries.

use chrono::Utc;
use herald_common::{
    AppError, AppResult, calculate_digest, crypto::parse_private_key, http_date, sign_request,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rsa::RsaPrivateKey;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

const SIGNED_HEADERS: [&str; 4] = ["(request-target)", "host", "date", "digest"];

/// HTTP Signature signer for one actor key.
#[derive(Clone)]
pub struct HttpSigner {
    private_key: RsaPrivateKey,
    key_id: String,
}

impl HttpSigner {
    /// Create a signer from a PKCS#8 PEM private key.
    pub fn new(private_key_pem: &str, key_id: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            private_key: parse_private_key(private_key_pem)?,
            key_id: key_id.into(),
        })
    }

    /// Key id placed in the `Signature` header.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign a request and return `Host`, `Date`, `Digest` and `Signature`.
    pub fn sign_request(&self, method: &str, url: &Url, body: &[u8]) -> AppResult<HeaderMap> {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(AppError::Signature(format!("no host in {url}"))),
        };
        let target = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };

        let mut values = HashMap::new();
        values.insert("host".to_string(), host);
        values.insert("date".to_string(), http_date(Utc::now()));
        values.insert("digest".to_string(), calculate_digest(body));

        let signature = sign_request(
            &self.private_key,
            &self.key_id,
            method,
            &target,
            &values,
            &SIGNED_HEADERS,
        )?;
        values.insert("signature".to_string(), signature);

        debug!(key_id = %self.key_id, target = %target, "Signed request");

        let mut headers = HeaderMap::new();
        for (name, value) in values {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::Signature(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| AppError::Signature(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use herald_common::{HttpSignature, generate_rsa_keypair, verify_signature};

    #[test]
    fn test_signed_headers_verify() {
        let keypair = generate_rsa_keypair().unwrap();
        let signer =
            HttpSigner::new(&keypair.private_key_pem, "https://local.example/users/a#main-key")
                .unwrap();
        let url = Url::parse("https://remote.example/inbox").unwrap();

        let headers = signer.sign_request("POST", &url, b"{}").unwrap();

        let to_map = |names: &[&str]| -> HashMap<String, String> {
            names
                .iter()
                .map(|n| {
                    (
                        (*n).to_string(),
                        headers.get(*n).unwrap().to_str().unwrap().to_string(),
                    )
                })
                .collect()
        };
        let values = to_map(&["host", "date", "digest"]);
        assert_eq!(values["host"], "remote.example");
        assert_eq!(values["digest"], calculate_digest(b"{}"));

        let parsed =
            HttpSignature::parse(headers.get("signature").unwrap().to_str().unwrap()).unwrap();
        assert_eq!(parsed.headers, SIGNED_HEADERS);
        assert!(
            verify_signature(&parsed, &keypair.public_key_pem, "POST", "/inbox", &values).unwrap()
        );
    }

    #[test]
    fn test_bad_key_is_signature_error() {
        assert!(matches!(
            HttpSigner::new("garbage", "k"),
            Err(AppError::Signature(_))
        ));
    }
}
