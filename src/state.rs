use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::{
    google::{GoogleVerifier, IdentityVerifier},
    jwt::JwtKeys,
    repo::{PgUserStore, UserStore},
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub keys: JwtKeys,
}

impl AppState {
    pub fn init(db: PgPool, config: AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;
        let identity = Arc::new(GoogleVerifier::new(&config.google)?) as Arc<dyn IdentityVerifier>;
        Ok(Self::from_parts(Arc::new(config), store, identity))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let keys = JwtKeys::new(&config.jwt, &config.cookie);
        Self {
            config,
            store,
            identity,
            keys,
        }
    }

    #[cfg(test)]
    pub fn fake(store: Arc<dyn UserStore>, identity: Arc<dyn IdentityVerifier>) -> Self {
        Self::fake_with_env(store, identity, &[])
    }

    /// Test state with extra environment entries layered over the defaults.
    #[cfg(test)]
    pub fn fake_with_env(
        store: Arc<dyn UserStore>,
        identity: Arc<dyn IdentityVerifier>,
        env: &[(&str, &str)],
    ) -> Self {
        let config = AppConfig::from_lookup(|key| {
            if let Some((_, v)) = env.iter().find(|(k, _)| *k == key) {
                return Some(v.to_string());
            }
            match key {
                "JWT_SECRET_KEY" => Some("test-secret".into()),
                "GOOGLE_CLIENT_ID" => Some("test-client.apps.googleusercontent.com".into()),
                _ => None,
            }
        })
        .expect("test config");
        Self::from_parts(Arc::new(config), store, identity)
    }
}
