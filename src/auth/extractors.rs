use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use cookie::Cookie;
use tracing::warn;

use super::jwt::{JwtKeys, ACCESS_COOKIE_NAME};
use crate::error::AppError;

/// Validates the access token and yields the user id it was issued for.
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);

        let token = keys
            .location
            .cookies
            .then(|| token_from_cookie(&parts.headers))
            .flatten()
            .or_else(|| {
                keys.location
                    .headers
                    .then(|| token_from_authorization(&parts.headers))
                    .flatten()
            })
            .ok_or_else(|| AppError::unauthorized("Missing access token"))?;

        let claims = keys.verify(&token).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            AppError::unauthorized("Invalid or expired token")
        })?;

        let user_id = claims.user_id().ok_or_else(|| {
            warn!(sub = %claims.sub, "token subject is not a user id");
            AppError::unauthorized("Invalid or expired token")
        })?;

        Ok(AuthUser(user_id))
    }
}

fn token_from_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| Cookie::parse(pair.trim()).ok())
        .find(|c| c.name() == ACCESS_COOKIE_NAME && !c.value().is_empty())
        .map(|c| c.value().to_string())
}

fn token_from_authorization(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
}
