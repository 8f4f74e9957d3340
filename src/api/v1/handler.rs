use super::error::*;
use crate::application_port::*;
use crate::domain_model::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{self, reject};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }
}

// Credentials are never echoed by `Debug`.
#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: UserId,
}

pub async fn register(
    body: CredentialsRequest,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let signup_input = SignupInput {
        username: body.username,
        password: body.password,
    };
    let user_id = auth_service
        .signup(signup_input)
        .await
        .map_err(ApiRejection::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::ok(RegisterResponse { user_id })),
        StatusCode::CREATED,
    ))
}

/// Token bodies are sent bare, without the `ApiResponse` envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user_id: UserId,
    #[serde(flatten)]
    pub tokens: AuthTokens,
}

pub async fn login(
    body: CredentialsRequest,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let login_input = LoginInput {
        username: body.username,
        password: body.password,
    };
    let login_result = auth_service
        .login(login_input)
        .await
        .map_err(ApiRejection::from)
        .map_err(reject::custom)?;

    let login_response = LoginResponse {
        user_id: login_result.user_id,
        tokens: login_result.tokens,
    };
    Ok(warp::reply::json(&login_response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(
    body: RefreshRequest,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let tokens = auth_service
        .refresh_token(&body.refresh_token)
        .await
        .map_err(ApiRejection::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&tokens))
}

pub async fn logout(
    body: RefreshRequest,
    access: VerifiedAccess,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    auth_service
        .logout(&access, &body.refresh_token)
        .await
        .map_err(ApiRejection::from)
        .map_err(reject::custom)?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub user_id: UserId,
}

pub async fn revoke(
    body: RevokeRequest,
    auth_service: Arc<dyn AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    auth_service
        .revoke_all_for_user(body.user_id)
        .await
        .map_err(ApiRejection::from)
        .map_err(reject::custom)?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&ApiResponse::ok(HealthResponse { status: "ok" })))
}
