use crate::api::v1::handler::ApiResponse;
use crate::application_port::*;
use crate::logger::*;
use crate::rate_limit::RateLimited;
use nanoid::nanoid;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::StatusCode;
use warp::{Rejection, reject};

/// Every authentication failure carries this message, whatever the cause.
const AUTH_FAILED: &str = "authentication failed";

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, message) = if let Some(rejection) = err.find::<ApiRejection>() {
        (rejection.code, rejection.message.clone())
    } else if err.is_not_found() {
        (ApiErrorCode::NotFound, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (ApiErrorCode::InvalidRequest, e.to_string())
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        (ApiErrorCode::MethodNotAllowed, "method not allowed".to_string())
    } else if err.find::<reject::PayloadTooLarge>().is_some() {
        (ApiErrorCode::InvalidRequest, "payload too large".to_string())
    } else if err.find::<reject::UnsupportedMediaType>().is_some() {
        (ApiErrorCode::InvalidRequest, "expected a JSON body".to_string())
    } else if err.find::<reject::LengthRequired>().is_some() {
        (ApiErrorCode::InvalidRequest, "content length required".to_string())
    } else {
        let rejection = ApiRejection::internal(format!("unhandled rejection: {err:?}"));
        (rejection.code, rejection.message)
    };

    let json = warp::reply::json(&ApiResponse::<()>::err(code, message));
    Ok(warp::reply::with_status(json, code.status()))
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Token is not valid")]
    InvalidToken,
    #[error("Refresh token is not valid")]
    InvalidRefreshToken,
    #[error("Refresh token has expired")]
    RefreshTokenExpired,
    #[error("Admin key is not valid")]
    Forbidden,
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Too many requests")]
    RateLimited,
    #[error("Service unavailable")]
    ServiceUnavailable,
    #[error("Internal error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::InvalidCredentials
            | ApiErrorCode::InvalidToken
            | ApiErrorCode::InvalidRefreshToken
            | ApiErrorCode::RefreshTokenExpired => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiErrorCode::UsernameTaken => StatusCode::CONFLICT,
            ApiErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Rejection carried through warp to [`recover_error`].
#[derive(Debug, Clone)]
pub struct ApiRejection {
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiRejection {
    pub fn new(code: ApiErrorCode) -> Self {
        Self {
            code,
            message: code.to_string(),
        }
    }

    /// The cause is logged under a fresh correlation id; the client only sees
    /// the id.
    pub fn internal<E: std::fmt::Display>(error: E) -> Self {
        let correlation_id = nanoid!(12);
        error!(%correlation_id, "internal error: {}", error);
        Self {
            code: ApiErrorCode::InternalError,
            message: format!("internal error (ref {correlation_id})"),
        }
    }
}

impl reject::Reject for ApiRejection {}

impl From<AuthError> for ApiRejection {
    fn from(error: AuthError) -> Self {
        let auth_failed = |code| ApiRejection {
            code,
            message: AUTH_FAILED.to_string(),
        };
        match error {
            AuthError::Validation(message) => ApiRejection {
                code: ApiErrorCode::InvalidRequest,
                message,
            },
            AuthError::InvalidCredentials => auth_failed(ApiErrorCode::InvalidCredentials),
            AuthError::InvalidRefreshToken => auth_failed(ApiErrorCode::InvalidRefreshToken),
            AuthError::RefreshTokenExpired => auth_failed(ApiErrorCode::RefreshTokenExpired),
            AuthError::InvalidAccessToken
            | AuthError::AccessTokenExpired
            | AuthError::AccessTokenRevoked => auth_failed(ApiErrorCode::InvalidToken),
            AuthError::UsernameTaken => ApiRejection::new(ApiErrorCode::UsernameTaken),
            AuthError::ServiceUnavailable => ApiRejection::new(ApiErrorCode::ServiceUnavailable),
            e @ (AuthError::Store(_) | AuthError::InternalError(_)) => ApiRejection::internal(e),
        }
    }
}

impl From<RateLimited> for ApiRejection {
    fn from(_: RateLimited) -> Self {
        ApiRejection::new(ApiErrorCode::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_port::StoreError;

    #[test]
    fn auth_failures_share_one_message() {
        let errors = [
            AuthError::InvalidCredentials,
            AuthError::InvalidRefreshToken,
            AuthError::RefreshTokenExpired,
            AuthError::AccessTokenRevoked,
        ];
        for e in errors {
            let r = ApiRejection::from(e);
            assert_eq!(r.message, AUTH_FAILED);
            assert_eq!(r.code.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn refresh_failures_keep_distinct_codes() {
        let invalid = ApiRejection::from(AuthError::InvalidRefreshToken);
        let expired = ApiRejection::from(AuthError::RefreshTokenExpired);
        assert_eq!(invalid.code, ApiErrorCode::InvalidRefreshToken);
        assert_eq!(expired.code, ApiErrorCode::RefreshTokenExpired);
        assert_eq!(invalid.message, expired.message);

        let json = serde_json::to_value(expired.code).unwrap();
        assert_eq!(json, "REFRESH_TOKEN_EXPIRED");
    }

    #[test]
    fn store_faults_hide_their_cause() {
        let r = ApiRejection::from(AuthError::Store(StoreError::Database(
            "Table 'refresh_tokens' doesn't exist".into(),
        )));
        assert_eq!(r.code, ApiErrorCode::InternalError);
        assert!(r.message.starts_with("internal error (ref "));
        assert!(!r.message.contains("refresh_tokens"));
    }

    #[test]
    fn open_circuit_is_503() {
        let r = ApiRejection::from(AuthError::from(StoreError::CircuitOpen));
        assert_eq!(r.code.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
