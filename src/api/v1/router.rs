use super::error::*;
use super::handler;
use crate::application_port::AuthService;
use crate::domain_model::VerifiedAccess;
use crate::rate_limit::*;
use crate::server::*;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use warp::{Filter, http, reject};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// `/api/auth/...` with error recovery applied.
pub fn app(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    warp::path("api")
        .and(warp::path("auth"))
        .and(routes(server))
        .recover(recover_error)
}

/// Path before method, so an unknown path is a 404 rather than a 405.
pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let limit = |endpoint| {
        rate_limited(
            endpoint,
            server.rate_limiter.clone(),
            server.trust_forwarded_for,
        )
    };

    let register = warp::path("register")
        .and(warp::path::end())
        .and(warp::post())
        .and(limit(Endpoint::Register))
        .and(json_body())
        .and(with(server.auth_service.clone()))
        .and_then(handler::register);

    let login = warp::path("login")
        .and(warp::path::end())
        .and(warp::post())
        .and(limit(Endpoint::Login))
        .and(json_body())
        .and(with(server.auth_service.clone()))
        .and_then(handler::login);

    let refresh = warp::path("refresh")
        .and(warp::path::end())
        .and(warp::post())
        .and(limit(Endpoint::Refresh))
        .and(json_body())
        .and(with(server.auth_service.clone()))
        .and_then(handler::refresh);

    let logout = warp::path("logout")
        .and(warp::path::end())
        .and(warp::post())
        .and(limit(Endpoint::Logout))
        .and(json_body())
        .and(with_verification(server.auth_service.clone()))
        .and(with(server.auth_service.clone()))
        .and_then(handler::logout);

    let revoke = warp::path("revoke")
        .and(warp::path::end())
        .and(warp::post())
        .and(limit(Endpoint::Revoke))
        .and(with_admin_key(server.clone()))
        .and(json_body())
        .and(with(server.auth_service.clone()))
        .and_then(handler::revoke);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(limit(Endpoint::Default))
        .and_then(handler::health);

    register
        .or(login)
        .or(refresh)
        .or(logout)
        .or(revoke)
        .or(health)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Peer address, or the first `X-Forwarded-For` hop when the proxy in front
/// is trusted.
fn client_ip(
    trust_forwarded_for: bool,
) -> impl Filter<Extract = (IpAddr,), Error = warp::Rejection> + Clone {
    warp::addr::remote()
        .and(warp::header::optional::<String>("x-forwarded-for"))
        .map(move |remote: Option<SocketAddr>, forwarded: Option<String>| {
            let forwarded_ip = forwarded
                .filter(|_| trust_forwarded_for)
                .and_then(|v| v.split(',').next().and_then(|hop| hop.trim().parse().ok()));
            forwarded_ip
                .or(remote.map(|addr| addr.ip()))
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        })
}

fn rate_limited(
    endpoint: Endpoint,
    rate_limiter: Arc<EndpointRateLimiter>,
    trust_forwarded_for: bool,
) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    client_ip(trust_forwarded_for)
        .and_then(move |ip: IpAddr| {
            let rate_limiter = rate_limiter.clone();
            async move {
                rate_limiter
                    .check(endpoint, ip)
                    .map_err(ApiRejection::from)
                    .map_err(reject::custom)
            }
        })
        .untuple_one()
}

fn with_verification(
    auth_service: Arc<dyn AuthService>,
) -> impl Filter<Extract = (VerifiedAccess,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>(http::header::AUTHORIZATION.as_ref()).and_then(
        move |header: Option<String>| {
            let auth_service = auth_service.clone();
            async move {
                let Some(token) = header.as_deref().and_then(|h| h.strip_prefix("Bearer ")) else {
                    return Err(reject::custom(ApiRejection::from(
                        crate::application_port::AuthError::InvalidAccessToken,
                    )));
                };
                auth_service
                    .verify_token(token)
                    .await
                    .map_err(ApiRejection::from)
                    .map_err(reject::custom)
            }
        },
    )
}

fn with_admin_key(
    server: Arc<Server>,
) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("x-admin-key")
        .and_then(move |presented: Option<String>| {
            let server = server.clone();
            async move {
                match presented {
                    Some(key) if server.admin_key.verify(&key) => Ok(()),
                    _ => Err(reject::custom(ApiRejection::new(ApiErrorCode::Forbidden))),
                }
            }
        })
        .untuple_one()
}
