use serde::{Deserialize, Serialize};

use super::repo_types::PublicUser;

// Request fields are optional so that an absent field becomes a 400 with a
// readable message instead of a JSON rejection.

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Request body for Google sign-in; `credential` is the ID token handed to
/// the frontend by Google Identity Services.
#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub credential: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: &'static str,
    pub user: PublicUser,
}

/// Response returned after password or Google login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub user: PublicUser,
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
