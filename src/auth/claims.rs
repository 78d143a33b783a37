use serde::{Deserialize, Serialize};

/// JWT payload carried by the `access_token` cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,    // user ID, decimal
    pub iat: i64,       // issued at (unix timestamp)
    pub nbf: i64,       // not before
    pub exp: i64,       // expires at
    pub jti: String,    // unique token id
    #[serde(rename = "type")]
    pub token_type: String, // always "access"
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}
