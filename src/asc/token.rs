//! ES256 bearer-token signing for the App Store Connect API.
//!
//! App Store Connect authenticates with a short-lived JWT signed by a
//! team-scoped ECDSA P-256 key. The signer owns the key and a cached token;
//! the token is reused while more than [`REFRESH_MARGIN`] of validity
//! remains and regenerated otherwise, so a token can never be handed out
//! with less than `TOKEN_LIFETIME - REFRESH_MARGIN` of its window already
//! spent at issue time.

use anyhow::anyhow;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use serde::Serialize;

use crate::errors::ApiError;

/// Validity window of a freshly signed token.
pub const TOKEN_LIFETIME: Duration = Duration::seconds(1200);

/// Remaining validity below which the cached token is regenerated.
pub const REFRESH_MARGIN: Duration = Duration::seconds(60);

const AUDIENCE: &str = "appstoreconnect-v1";

#[derive(Serialize)]
struct Header<'a> {
    alg: &'static str,
    kid: &'a str,
    typ: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: i64,
    exp: i64,
    aud: &'static str,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Produces signed bearer credentials. Pure computation, no I/O.
pub struct TokenSigner {
    key_id: String,
    issuer_id: String,
    signing_key: SigningKey,
    cached: Option<CachedToken>,
}

impl TokenSigner {
    /// `private_key_pem` is the PKCS#8 PEM content of the `.p8` key file.
    pub fn new(key_id: &str, issuer_id: &str, private_key_pem: &str) -> Result<Self, ApiError> {
        let signing_key = SigningKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| ApiError::Other(anyhow!("Failed to parse ASC private key: {}", e)))?;
        Ok(Self {
            key_id: key_id.to_string(),
            issuer_id: issuer_id.to_string(),
            signing_key,
            cached: None,
        })
    }

    /// The current bearer token, reusing the cache while it has more than
    /// [`REFRESH_MARGIN`] of validity left.
    pub fn current_token(&mut self) -> Result<String, ApiError> {
        let now = Utc::now();
        if let Some(cached) = &self.cached
            && cached.expires_at.signed_duration_since(now) > REFRESH_MARGIN
        {
            return Ok(cached.token.clone());
        }
        self.generate(now)
    }

    fn generate(&mut self, now: DateTime<Utc>) -> Result<String, ApiError> {
        let expires_at = now + TOKEN_LIFETIME;
        let header = Header {
            alg: "ES256",
            kid: &self.key_id,
            typ: "JWT",
        };
        let claims = Claims {
            iss: &self.issuer_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            aud: AUDIENCE,
        };

        let signing_input = format!(
            "{}.{}",
            encode_part(&header)?,
            encode_part(&claims)?
        );
        let signature: Signature = self.signing_key.sign(signing_input.as_bytes());
        let raw = der_to_raw(signature.to_der().as_bytes())?;
        let token = format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(raw));

        self.cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

fn encode_part<T: Serialize>(value: &T) -> Result<String, ApiError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| ApiError::Other(anyhow!("Failed to serialize JWT part: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Convert a DER-encoded ECDSA signature (`SEQUENCE { INTEGER r, INTEGER s }`)
/// to the fixed 64-byte `r || s` form JWTs require. Each integer is
/// right-aligned into 32 bytes: short values are left-zero-padded, leading
/// zero bytes beyond 32 are trimmed.
pub fn der_to_raw(der: &[u8]) -> Result<[u8; 64], ApiError> {
    let malformed = |msg: &str| ApiError::MalformedSignature(msg.to_string());

    if der.len() < 2 || der[0] != 0x30 {
        return Err(malformed("not a DER sequence"));
    }
    // Content length: short form, or one-byte long form (0x81).
    let (seq_len, mut pos) = match der[1] {
        0x81 => {
            if der.len() < 3 {
                return Err(malformed("truncated sequence length"));
            }
            (der[2] as usize, 3)
        }
        len if len < 0x80 => (len as usize, 2),
        _ => return Err(malformed("unsupported sequence length encoding")),
    };
    if der.len() != pos + seq_len {
        return Err(malformed("sequence length does not match input"));
    }

    let mut out = [0u8; 64];
    for half in 0..2 {
        if pos + 2 > der.len() || der[pos] != 0x02 {
            return Err(malformed("expected DER integer"));
        }
        let int_len = der[pos + 1] as usize;
        pos += 2;
        if pos + int_len > der.len() || int_len == 0 {
            return Err(malformed("truncated DER integer"));
        }
        let mut bytes = &der[pos..pos + int_len];
        pos += int_len;

        // Trim sign-padding zeros, then require the value to fit 32 bytes.
        while bytes.len() > 32 && bytes[0] == 0 {
            bytes = &bytes[1..];
        }
        if bytes.len() > 32 {
            return Err(malformed("integer wider than 32 bytes"));
        }
        let offset = half * 32 + (32 - bytes.len());
        out[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
    if pos != der.len() {
        return Err(malformed("trailing bytes after signature"));
    }
    Ok(out)
}
