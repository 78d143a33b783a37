//! Google ID-token verification.
//!
//! `IdentityVerifier` is the seam the `/google` handler depends on;
//! `GoogleVerifier` checks the token signature against Google's published
//! JWKS, plus expiry and audience. Issuer and email checks stay in the handler.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use jsonwebtoken::{
    decode, decode_header,
    jwk::{Jwk, JwkSet},
    Algorithm, DecodingKey, Validation,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::GoogleConfig;

pub const ACCEPTED_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Minimum gap between two key downloads triggered by unknown key ids.
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// Claims of a verified third-party ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalClaims {
    pub iss: String,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),
    #[error("token header has no key id")]
    MissingKeyId,
    #[error("no signing key with id {0}")]
    UnknownKey(String),
    #[error("token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),
    #[error("could not fetch signing keys: {0:#}")]
    KeyFetch(#[source] anyhow::Error),
}

impl VerifyError {
    /// True when the failure says nothing about the token itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, VerifyError::KeyFetch(_))
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str, audience: &str) -> Result<ExternalClaims, VerifyError>;
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

pub struct GoogleVerifier {
    http: reqwest::Client,
    certs_url: String,
    ttl: Duration,
    cache: RwLock<Option<CachedKeys>>,
}

impl GoogleVerifier {
    pub fn new(cfg: &GoogleConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            certs_url: cfg.certs_url.clone(),
            ttl: Duration::from_secs(cfg.certs_ttl_secs),
            cache: RwLock::new(None),
        })
    }

    #[cfg(test)]
    fn with_keys(cfg: &GoogleConfig, set: JwkSet) -> Self {
        let v = Self::new(cfg).expect("client");
        Self {
            cache: RwLock::new(Some(CachedKeys {
                set,
                fetched_at: Instant::now(),
            })),
            ..v
        }
    }

    async fn fetch_keys(&self) -> anyhow::Result<JwkSet> {
        let set = self
            .http
            .get(&self.certs_url)
            .send()
            .await
            .context("request certs")?
            .error_for_status()
            .context("certs endpoint status")?
            .json::<JwkSet>()
            .await
            .context("decode certs")?;
        info!(keys = set.keys.len(), url = %self.certs_url, "google signing keys refreshed");
        Ok(set)
    }

    async fn key_for(&self, kid: &str) -> Result<Jwk, VerifyError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                let age = cached.fetched_at.elapsed();
                if age < self.ttl {
                    if let Some(k) = cached.set.find(kid) {
                        return Ok(k.clone());
                    }
                    if age < MIN_REFETCH_INTERVAL {
                        return Err(VerifyError::UnknownKey(kid.to_string()));
                    }
                }
            }
        }

        let set = self.fetch_keys().await.map_err(VerifyError::KeyFetch)?;
        let key = set.find(kid).cloned();
        *self.cache.write().await = Some(CachedKeys {
            set,
            fetched_at: Instant::now(),
        });
        key.ok_or_else(|| VerifyError::UnknownKey(kid.to_string()))
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, credential: &str, audience: &str) -> Result<ExternalClaims, VerifyError> {
        let header = decode_header(credential).map_err(VerifyError::Malformed)?;
        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;
        let jwk = self.key_for(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(VerifyError::Rejected)?;
        let claims = verify_signed(credential, &key, audience)?;
        debug!(kid = %kid, iss = %claims.iss, "google id token verified");
        Ok(claims)
    }
}

fn verify_signed(
    credential: &str,
    key: &DecodingKey,
    audience: &str,
) -> Result<ExternalClaims, VerifyError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);
    decode::<ExternalClaims>(credential, key, &validation)
        .map(|data| data.claims)
        .map_err(VerifyError::Rejected)
}
