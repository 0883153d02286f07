//! Access token codec (§4.2). Hand-rolled compact HMAC-SHA256 tokens
//! instead of a JWT library so the signature-before-claims ordering
//! guarantee and the numeric-claim coercion rule are owned directly.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use cp_core::clock::Clock;
use cp_core::error::{CoreError, CoreResult};
use cp_core::model::Identity;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Algorithms a [`TokenCodec`] is permitted to accept. Kept as an
/// enumerated whitelist (rather than a string) so "reject non-HS256" can't
/// be relaxed by a typo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Hs256,
}

impl Algorithm {
    fn header_name(self) -> &'static str {
        match self {
            Algorithm::Hs256 => "HS256",
        }
    }

    fn from_header_name(name: &str) -> Option<Self> {
        match name {
            "HS256" => Some(Algorithm::Hs256),
            _ => None,
        }
    }
}

/// Signs and verifies access tokens for one `(issuer, audience)` pair.
pub struct TokenCodec {
    signing_key: Vec<u8>,
    issuer: String,
    audience: Vec<String>,
    allowed_algorithms: Vec<Algorithm>,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(
        signing_key: &[u8],
        issuer: impl Into<String>,
        audience: Vec<String>,
        allowed_algorithms: Vec<Algorithm>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            // Defensive copy: the caller's buffer may be zeroized after
            // construction.
            signing_key: signing_key.to_vec(),
            issuer: issuer.into(),
            audience,
            allowed_algorithms,
            clock,
        }
    }

    /// Issues a compact token carrying `identity`.
    pub fn issue(&self, identity: &Identity) -> CoreResult<String> {
        if identity.issuer.is_empty()
            || identity.subject.is_empty()
            || identity.user_id.is_empty()
            || identity.audience.is_empty()
            || self.signing_key.is_empty()
        {
            return Err(CoreError::InvalidToken);
        }

        let header = serde_json::json!({ "alg": Algorithm::Hs256.header_name(), "typ": "JWT" });
        let mut claims = Map::new();
        claims.insert("iss".into(), Value::String(identity.issuer.clone()));
        claims.insert("sub".into(), Value::String(identity.subject.clone()));
        if !identity.token_id.is_empty() {
            claims.insert("jti".into(), Value::String(identity.token_id.clone()));
        }
        claims.insert("iat".into(), Value::from(identity.issued_at.timestamp()));
        claims.insert("nbf".into(), Value::from(identity.not_before.timestamp()));
        claims.insert("exp".into(), Value::from(identity.expires_at.timestamp()));
        claims.insert(
            "aud".into(),
            if identity.audience.len() == 1 {
                Value::String(identity.audience[0].clone())
            } else {
                Value::Array(
                    identity
                        .audience
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                )
            },
        );
        if !identity.user_id.is_empty() {
            claims.insert("uid".into(), Value::String(identity.user_id.clone()));
        }
        if !identity.session_id.is_empty() {
            claims.insert("sid".into(), Value::String(identity.session_id.clone()));
        }
        let perms: Vec<Value> = identity
            .permissions
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .map(Value::String)
            .collect();
        claims.insert("perms".into(), Value::Array(perms));

        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = self.sign(signing_input.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature);
        Ok(format!("{signing_input}.{sig_b64}"))
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.signing_key).expect("HMAC accepts keys of any length");
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }

    /// Verifies `token`, returning the carried [`Identity`]. Signature
    /// verification always precedes claim interpretation: a bad signature
    /// never causes claim contents to leak into the returned error.
    pub fn verify(&self, token: &str) -> CoreResult<Identity> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(CoreError::InvalidToken);
        }
        let [header_b64, claims_b64, sig_b64]: [&str; 3] = parts.try_into().unwrap();

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| CoreError::InvalidToken)?;
        let header: Value =
            serde_json::from_slice(&header_bytes).map_err(|_| CoreError::InvalidToken)?;
        let alg_name = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or(CoreError::InvalidToken)?;
        let alg = Algorithm::from_header_name(alg_name).ok_or(CoreError::InvalidToken)?;
        if !self.allowed_algorithms.contains(&alg) {
            return Err(CoreError::InvalidToken);
        }

        let signing_input = format!("{header_b64}.{claims_b64}");
        let expected_sig = self.sign(signing_input.as_bytes());
        let given_sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| CoreError::InvalidToken)?;
        if !bool::from(subtle::ConstantTimeEq::ct_eq(
            expected_sig.as_slice(),
            given_sig.as_slice(),
        )) {
            return Err(CoreError::InvalidToken);
        }

        // Only now do we interpret claims.
        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| CoreError::InvalidToken)?;
        let claims: Map<String, Value> =
            serde_json::from_slice(&claims_bytes).map_err(|_| CoreError::InvalidToken)?;

        let sub = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(CoreError::InvalidToken)?;
        let uid = claims
            .get("uid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(CoreError::InvalidToken)?;
        let iss = claims
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if iss != self.issuer {
            return Err(CoreError::InvalidToken);
        }
        let token_audience = claim_audience(&claims)?;
        let configured: BTreeSet<&str> = self.audience.iter().map(String::as_str).collect();
        let given: BTreeSet<&str> = token_audience.iter().map(String::as_str).collect();
        if configured != given {
            return Err(CoreError::InvalidToken);
        }

        let exp = claims
            .get("exp")
            .and_then(coerce_i64)
            .filter(|v| *v != 0)
            .ok_or(CoreError::InvalidToken)?;
        let nbf = claims.get("nbf").and_then(coerce_i64).unwrap_or(0);
        let now = self.clock.now();
        let exp_at = seconds_to_datetime(exp)?;
        let nbf_at = seconds_to_datetime(nbf)?;
        if !(exp_at > now) {
            return Err(CoreError::ExpiredToken);
        }
        if nbf_at > now {
            return Err(CoreError::ExpiredToken);
        }

        let iat = claims
            .get("iat")
            .and_then(coerce_i64)
            .map(seconds_to_datetime)
            .transpose()?
            .unwrap_or(nbf_at);
        let token_id = claims
            .get("jti")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let session_id = claims
            .get("sid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut permissions: Vec<String> = claims
            .get("perms")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        permissions.sort();
        permissions.dedup();

        Ok(Identity {
            issued_at: iat,
            not_before: nbf_at,
            expires_at: exp_at,
            subject: sub.to_string(),
            user_id: uid.to_string(),
            name: String::new(),
            email: String::new(),
            // Filled from the verifier's own configuration, never from the
            // token, to prevent aliasing.
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            token_id,
            session_id,
            permissions,
        })
    }
}

fn claim_audience(claims: &Map<String, Value>) -> CoreResult<Vec<String>> {
    match claims.get("aud") {
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// Coerces a numeric claim that may have arrived as a float, integer, or
/// arbitrary-precision number into `i64` seconds.
fn coerce_i64(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    if let Some(u) = value.as_u64() {
        return i64::try_from(u).ok();
    }
    if let Some(f) = value.as_f64() {
        return Some(f.round() as i64);
    }
    None
}

fn seconds_to_datetime(seconds: i64) -> CoreResult<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or(CoreError::InvalidToken)
}
