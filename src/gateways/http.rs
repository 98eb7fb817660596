use crate::gateways::error::{GatewayError, GatewayResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Authentication scheme for an outbound processor request
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    Bearer(&'a str),
    Basic(&'a str, &'a str),
    None,
}

/// Body encoding of an outbound processor request
#[derive(Debug, Clone)]
pub enum Body<'a> {
    Json(&'a JsonValue),
    /// Form-encoded key/value pairs (Stripe-style APIs)
    Form(&'a [(String, String)]),
    Empty,
}

/// Shared HTTP client for gateway adapters: per-call timeout plus bounded
/// retry with exponential backoff on 429 and 5xx.
#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        body: Body<'_>,
        additional_headers: &[(&str, &str)],
    ) -> GatewayResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            match auth {
                Auth::Bearer(token) => request = request.bearer_auth(token),
                Auth::Basic(user, pass) => request = request.basic_auth(user, Some(pass)),
                Auth::None => {}
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            match &body {
                Body::Json(payload) => request = request.json(payload),
                Body::Form(fields) => request = request.form(fields),
                Body::Empty => {}
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Network {
                        message: "timeout".to_string(),
                    }
                } else {
                    GatewayError::Network {
                        message: format!("processor request failed: {}", e),
                    }
                }
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::Provider {
                                provider: "http".to_string(),
                                message: format!("invalid processor JSON response: {}", e),
                                code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimited {
                            message: "processor rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "processor server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(GatewayError::Provider {
                        provider: "http".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::Network {
            message: "processor request failed".to_string(),
        }))
    }
}

pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

pub fn hmac_sha256_base64(secret: &str, message: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message);
    STANDARD.encode(mac.finalize().into_bytes())
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha256_hex(secret, payload);
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn verify_hmac_sha256_base64(payload: &[u8], secret: &str, signature: &str) -> bool {
    let computed = hmac_sha256_base64(secret, payload);
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_verification_accepts_matching_signature() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let signature = hmac_sha256_hex("whsec_test", payload);
        assert!(verify_hmac_sha256_hex(payload, "whsec_test", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "whsec_test", "deadbeef"));
    }

    #[test]
    fn base64_hmac_round_trips() {
        let payload = b"payload";
        let signature = hmac_sha256_base64("secret", payload);
        assert!(verify_hmac_sha256_base64(payload, "secret", &signature));
        assert!(!verify_hmac_sha256_base64(payload, "other", &signature));
    }
}
