//! Auth API collaborator consumed by the session store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ApiError};

/// Successful login answer; the session token itself travels in a cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub username: String,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Session validity as reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateResponse {
    pub valid: bool,
    pub username: Option<String>,
    pub is_root: bool,
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Server-side authentication operations
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError>;
    async fn logout(&self) -> Result<(), ApiError>;
    async fn validate(&self) -> Result<ValidateResponse, ApiError>;
}

/// [`AuthApi`] over the dashboard's `/auth/*` endpoints
#[derive(Clone)]
pub struct HttpAuthApi {
    api: ApiClient,
}

impl HttpAuthApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = LoginRequest { username, password };
        self.api.post("/auth/login", Some(&body)).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        // Body is a status blob nobody reads
        let _: serde_json::Value = self.api.post::<_, ()>("/auth/logout", None).await?;
        Ok(())
    }

    async fn validate(&self) -> Result<ValidateResponse, ApiError> {
        self.api.get("/auth/validate").await
    }
}
