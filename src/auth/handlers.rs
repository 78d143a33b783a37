use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, GoogleLoginRequest, LoginRequest, MeResponse, MessageResponse,
            RegisterRequest, RegisterResponse,
        },
        extractors::AuthUser,
        google::ACCEPTED_ISSUERS,
        jwt::JwtKeys,
        password::{hash_password, random_password, verify_password},
        repo::{CreateUserError, UniqueField},
        repo_types::{NewUser, PublicUser, User},
    },
    error::{AppError, AppResult},
    state::AppState,
};

const REGISTER_FAILED: &str = "Registration failed";
const LOGIN_FAILED: &str = "Login failed";
const GOOGLE_LOGIN_FAILED: &str = "Google login failed";
const ME_FAILED: &str = "Failed to get user info";

const USERNAME_TAKEN: &str = "Username already exists";
const EMAIL_TAKEN: &str = "Email already exists";
const ACCOUNT_DEACTIVATED: &str = "Account is deactivated";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/google", post(google_login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

fn present(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.is_empty())
}

fn duplicate_message(field: UniqueField) -> &'static str {
    match field {
        UniqueField::Username => USERNAME_TAKEN,
        UniqueField::Email => EMAIL_TAKEN,
    }
}

/// Signs a token for `user` and answers with it both in the body and in the
/// `access_token` cookie.
fn session_response(
    keys: &JwtKeys,
    user: &User,
    message: &'static str,
    context: &'static str,
) -> AppResult<Response> {
    let access_token = keys.sign(user.id).map_err(AppError::internal(context))?;
    let cookie = keys.access_cookie(&access_token);
    Ok((
        [(header::SET_COOKIE, cookie.to_string())],
        Json(AuthResponse {
            message,
            user: PublicUser::from(user),
            access_token,
        }),
    )
        .into_response())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Option<Json<RegisterRequest>>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let required = || AppError::validation("Username, email, and password are required");
    let Json(req) = payload.ok_or_else(required)?;
    let (Some(username), Some(email), Some(password)) = (
        present(req.username),
        present(req.email),
        present(req.password),
    ) else {
        return Err(required());
    };

    // Fast path for a readable error; the unique constraints decide races.
    if state
        .store
        .find_by_username(&username)
        .await
        .map_err(AppError::internal(REGISTER_FAILED))?
        .is_some()
    {
        warn!(%username, "username already registered");
        return Err(AppError::conflict(USERNAME_TAKEN));
    }
    if state
        .store
        .find_by_email(&email)
        .await
        .map_err(AppError::internal(REGISTER_FAILED))?
        .is_some()
    {
        warn!(%email, "email already registered");
        return Err(AppError::conflict(EMAIL_TAKEN));
    }

    let hash = hash_password(&password).map_err(AppError::internal(REGISTER_FAILED))?;

    let user = state
        .store
        .create(NewUser {
            username: &username,
            email: &email,
            password_hash: &hash,
        })
        .await
        .map_err(|e| match e {
            CreateUserError::Duplicate(field) => {
                warn!(?field, "concurrent registration lost the unique constraint");
                AppError::conflict(duplicate_message(field))
            }
            CreateUserError::Other(e) => AppError::internal(REGISTER_FAILED)(e),
        })?;

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration successful! Please login with your credentials.",
            user: PublicUser::from(&user),
        }),
    ))
}

/// Unknown usernames get a different message than wrong passwords, which
/// reveals whether an account exists. Kept for client compatibility.
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Option<Json<LoginRequest>>,
) -> AppResult<Response> {
    let required = || AppError::validation("Username and password are required");
    let Json(req) = payload.ok_or_else(required)?;
    let (Some(username), Some(password)) = (present(req.username), present(req.password)) else {
        return Err(required());
    };

    let Some(user) = state
        .store
        .find_by_username(&username)
        .await
        .map_err(AppError::internal(LOGIN_FAILED))?
    else {
        warn!(%username, "login unknown username");
        return Err(AppError::unauthorized(
            "Login first - Please register your account",
        ));
    };

    let ok = verify_password(&password, &user.password_hash)
        .map_err(AppError::internal(LOGIN_FAILED))?;
    if !ok {
        warn!(user_id = user.id, "login invalid password");
        return Err(AppError::unauthorized("Invalid password"));
    }

    if !user.is_active {
        warn!(user_id = user.id, "login on deactivated account");
        return Err(AppError::unauthorized(ACCOUNT_DEACTIVATED));
    }

    info!(user_id = user.id, "user logged in");
    session_response(&state.keys, &user, "Login successful", LOGIN_FAILED)
}

#[instrument(skip(state, payload))]
pub async fn google_login(
    State(state): State<AppState>,
    payload: Option<Json<GoogleLoginRequest>>,
) -> AppResult<Response> {
    let credential = payload
        .and_then(|Json(req)| present(req.credential))
        .ok_or_else(|| AppError::validation("Missing Google ID token"))?;

    let client_id = state.config.google.client_id.as_deref().ok_or_else(|| {
        AppError::internal(GOOGLE_LOGIN_FAILED)(anyhow::anyhow!(
            "GOOGLE_CLIENT_ID is not configured"
        ))
    })?;

    let claims = state
        .identity
        .verify(&credential, client_id)
        .await
        .map_err(|e| {
            if e.is_transport() {
                AppError::internal(GOOGLE_LOGIN_FAILED)(e)
            } else {
                warn!(error = %e, "google token rejected");
                AppError::ExternalVerification {
                    message: "Invalid Google token".into(),
                    details: e.to_string(),
                }
            }
        })?;

    if !ACCEPTED_ISSUERS.contains(&claims.iss.as_str()) {
        warn!(iss = %claims.iss, "google token from unexpected issuer");
        return Err(AppError::validation("Invalid token issuer"));
    }
    debug!(sub = ?claims.sub, "google identity accepted");

    let email = present(claims.email)
        .ok_or_else(|| AppError::validation("Email not available from Google account"))?;
    let username = present(claims.name).unwrap_or_else(|| fallback_username(&email));

    let existing = state
        .store
        .find_by_email(&email)
        .await
        .map_err(AppError::internal(GOOGLE_LOGIN_FAILED))?;
    let user = match existing {
        Some(u) => u,
        None => provision_google_user(&state, &username, &email).await?,
    };

    if !user.is_active {
        warn!(user_id = user.id, "google login on deactivated account");
        return Err(AppError::unauthorized(ACCOUNT_DEACTIVATED));
    }

    info!(user_id = user.id, "google login");
    session_response(
        &state.keys,
        &user,
        "Google login successful",
        GOOGLE_LOGIN_FAILED,
    )
}

/// Local part of the email, or the whole address when that part is empty.
fn fallback_username(email: &str) -> String {
    match email.split('@').next() {
        Some(local) if !local.is_empty() => local.to_string(),
        _ => email.to_string(),
    }
}

/// First Google sign-in for an email: create the account with a password
/// nobody knows. A concurrent first sign-in for the same email may win the
/// insert; its row is then used.
async fn provision_google_user(state: &AppState, username: &str, email: &str) -> AppResult<User> {
    let hash = hash_password(&random_password()).map_err(AppError::internal(GOOGLE_LOGIN_FAILED))?;
    let created = state
        .store
        .create(NewUser {
            username,
            email,
            password_hash: &hash,
        })
        .await;

    match created {
        Ok(user) => {
            info!(user_id = user.id, %email, "user provisioned from google");
            Ok(user)
        }
        Err(CreateUserError::Duplicate(UniqueField::Email)) => state
            .store
            .find_by_email(email)
            .await
            .map_err(AppError::internal(GOOGLE_LOGIN_FAILED))?
            .ok_or_else(|| {
                AppError::internal(GOOGLE_LOGIN_FAILED)(anyhow::anyhow!(
                    "email {email} reported taken but not found"
                ))
            }),
        Err(CreateUserError::Duplicate(UniqueField::Username)) => {
            warn!(%username, %email, "google display name collides with an existing username");
            Err(AppError::conflict(USERNAME_TAKEN))
        }
        Err(CreateUserError::Other(e)) => Err(AppError::internal(GOOGLE_LOGIN_FAILED)(e)),
    }
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<MeResponse>> {
    let user = state
        .store
        .find_by_id(user_id)
        .await
        .map_err(AppError::internal(ME_FAILED))?
        .ok_or_else(|| {
            warn!(user_id, "token for a user that no longer exists");
            AppError::not_found("User not found")
        })?;

    Ok(Json(MeResponse {
        user: PublicUser::from(&user),
    }))
}

/// Tokens are stateless: this only tells the browser to drop the cookie.
pub async fn logout(State(keys): State<JwtKeys>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, keys.removal_cookie().to_string())],
        Json(MessageResponse {
            message: "Logout successful",
        }),
    )
}
