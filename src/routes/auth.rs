use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::routes::ApiError;

/// Owner id of the authenticated caller, attached to the request by
/// `require_auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub i64);

/// Claims carried by tokens from the external auth service. Minting lives
/// there; this side only validates.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
}

/// Bearer-token middleware for the protected API routes.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    let claims = decode_claims(token, state.jwt_secret.as_bytes())?;

    request.extensions_mut().insert(Owner(claims.sub));
    Ok(next.run(request).await)
}

pub fn decode_claims(token: &str, secret: &[u8]) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Owner>()
            .copied()
            .ok_or(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(sub: i64, secret: &[u8]) -> String {
        let claims = Claims {
            sub,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn test_valid_token_yields_owner_id() {
        let token = token_for(42, b"test-secret");
        let claims = decode_claims(&token, b"test-secret").unwrap();
        assert_eq!(claims.sub, 42);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = token_for(42, b"test-secret");
        assert!(decode_claims(&token, b"other-secret").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let claims = Claims {
            sub: 42,
            exp: (chrono::Utc::now().timestamp() - 3600) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(decode_claims(&token, b"test-secret").is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(decode_claims("not-a-token", b"test-secret").is_err());
    }
}
