//! Authentication Middleware
//! Mission: Protect API endpoints with JWT validation and live identity lookup

use crate::auth::{
    gate::{AllowList, RoleGate},
    jwt::{parse_bearer, JwtHandler, TokenError},
    models::Identity,
    resolver::{IdentityResolver, ResolveError},
};
use crate::models::MessageResponse;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

/// Everything the auth pipeline needs: the token codec and the resolver.
#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<JwtHandler>,
    pub resolver: IdentityResolver,
}

impl AuthState {
    pub fn new(jwt: Arc<JwtHandler>, resolver: IdentityResolver) -> Self {
        Self { jwt, resolver }
    }

    /// Authenticate a raw `Authorization` header value as of `now`.
    pub async fn verify_request_token(
        &self,
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        let header = header.ok_or(AuthError::MissingToken)?;
        let token = parse_bearer(header)?;
        let verified = self.jwt.verify(token, now)?;
        Ok(self.resolver.resolve(verified.subject_id).await?)
    }
}

/// Auth middleware: validates the bearer token, resolves the caller and
/// stores the `Identity` in request extensions for `Authorized<P>`.
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = match req.headers().get(AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| TokenError::Malformed)?),
        None => None,
    };

    let identity = match auth.verify_request_token(header, Utc::now()).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!("❌ Rejected {} {}: {}", req.method(), req.uri().path(), err);
            return Err(err);
        }
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Extractor proving the caller is authenticated and holds one of `P::ROLES`.
pub struct Authorized<P: AllowList> {
    pub identity: Identity,
    _policy: PhantomData<fn() -> P>,
}

impl<P: AllowList> Authorized<P> {
    pub fn id(&self) -> i64 {
        self.identity.id
    }
}

#[async_trait]
impl<S, P> FromRequestParts<S> for Authorized<P>
where
    S: Send + Sync,
    P: AllowList,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<Identity>()
            .copied()
            .ok_or(AuthError::MissingToken)?;

        RoleGate::of::<P>().check(&identity)?;

        Ok(Self {
            identity,
            _policy: PhantomData,
        })
    }
}

/// Auth error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),
    #[error("account not found")]
    UnknownAccount,
    #[error("account is banned")]
    Banned,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("identity lookup failed: {0}")]
    Internal(String),
}

impl From<ResolveError> for AuthError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => AuthError::UnknownAccount,
            ResolveError::Banned => AuthError::Banned,
            ResolveError::Store(e) => AuthError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidToken(TokenError::Expired) => {
                (StatusCode::UNAUTHORIZED, "Token expired")
            }
            // A vanished account looks exactly like a bad token to the caller.
            AuthError::InvalidToken(_) | AuthError::UnknownAccount => {
                (StatusCode::UNAUTHORIZED, "Invalid or expired token")
            }
            AuthError::Banned => (StatusCode::FORBIDDEN, "Account is banned"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
            AuthError::Internal(detail) => {
                error!("Auth pipeline failure: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, Json(MessageResponse::new(message))).into_response()
    }
}
