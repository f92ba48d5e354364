// HTTP middleware

use axum::{extract::FromRequestParts, http::request::Parts};

use super::AppError;
use crate::runtime::AppState;

/// Operator authenticated by a Bearer JWT signed with the cluster secret.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub subject: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let auth_str = auth_header
            .to_str()
            .map_err(|e| AppError::unauthorized(format!("Invalid Authorization header: {e}")))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("Authorization header must use the Bearer scheme"))?;

        let claims = state
            .jwt
            .verify_token(token.trim())
            .map_err(|e| AppError::unauthorized(e.to_string()))?;

        Ok(Self { subject: claims.sub })
    }
}
