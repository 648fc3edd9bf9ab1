use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::models::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

/// Identity attached to the request after token verification. Handlers pull
/// it back out with `Extension<AuthUser>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

fn authenticate(req: &Request) -> Result<AuthUser, Error> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| Error::Unauthorized("missing authorization header".into()))?;
    let value = header
        .to_str()
        .map_err(|_| Error::Unauthorized("malformed authorization header".into()))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::Unauthorized("unsupported authorization scheme".into()))?;

    let config = crate::config::get_config();
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| Error::Unauthorized("invalid token".into()))?;

    let id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| Error::Unauthorized("invalid subject claim".into()))?;
    let role = match data.claims.role.as_deref() {
        Some(value) => value
            .parse()
            .map_err(|_| Error::Unauthorized("unknown role claim".into()))?,
        None => Role::Student,
    };
    Ok(AuthUser { id, role })
}

pub async fn require_auth(mut req: Request, next: Next) -> Response {
    match authenticate(&req) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

pub async fn require_elevated(mut req: Request, next: Next) -> Response {
    match authenticate(&req) {
        Ok(user) if user.role.is_elevated() => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Ok(_) => Error::Forbidden("instructor or admin role required".into()).into_response(),
        Err(err) => err.into_response(),
    }
}
