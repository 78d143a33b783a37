use axum::extract::FromRef;
use cookie::Cookie;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::claims::Claims,
    config::{CookieConfig, JwtConfig, TokenLocation},
    state::AppState,
};

pub const ACCESS_COOKIE_NAME: &str = "access_token";
pub const ACCESS_TOKEN_TTL: TimeDuration = TimeDuration::hours(1);
const ACCESS_TOKEN_TYPE: &str = "access";

/// Signing/verification keys plus the cookie settings that carry the token.
/// Built once at start-up and shared through `AppState`.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: TimeDuration,
    pub location: TokenLocation,
    cookie: CookieConfig,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl JwtKeys {
    pub fn new(jwt: &JwtConfig, cookie: &CookieConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(jwt.secret.as_bytes()),
            decoding: DecodingKey::from_secret(jwt.secret.as_bytes()),
            ttl: ACCESS_TOKEN_TTL,
            location: jwt.location,
            cookie: cookie.clone(),
        }
    }

    #[cfg(test)]
    pub fn with_ttl(mut self, ttl: TimeDuration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn sign(&self, user_id: i64) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: ACCESS_TOKEN_TYPE.into(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        if data.claims.token_type != ACCESS_TOKEN_TYPE {
            anyhow::bail!("not an access token");
        }
        debug!(sub = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }

    /// `Set-Cookie` value carrying a freshly signed token.
    pub fn access_cookie(&self, token: &str) -> Cookie<'static> {
        Cookie::build((ACCESS_COOKIE_NAME, token.to_owned()))
            .path("/")
            .http_only(true)
            .secure(self.cookie.secure)
            .same_site(self.cookie.same_site)
            .max_age(cookie::time::Duration::seconds(self.ttl.whole_seconds()))
            .build()
    }

    /// `Set-Cookie` value instructing the browser to drop the token.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut c = Cookie::build((ACCESS_COOKIE_NAME, ""))
            .path("/")
            .http_only(true)
            .secure(self.cookie.secure)
            .same_site(self.cookie.same_site)
            .build();
        c.make_removal();
        c
    }
}
