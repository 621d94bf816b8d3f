use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use folderhost_core::Account;

use super::YamlAccountStore;

/// Resolves request tokens to accounts; installed as a router extension.
#[derive(Clone)]
pub struct AuthExtractor {
    pub store: Arc<YamlAccountStore>,
}

/// Extractor for required authentication
///
/// Use this for protected endpoints - returns 401 if not authenticated
#[derive(Debug, Clone)]
pub struct RequireAuth(pub Account);

impl AuthExtractor {
    pub fn new(store: Arc<YamlAccountStore>) -> Self {
        Self { store }
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let extractor = parts
            .extensions
            .get::<AuthExtractor>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Auth not configured"))?;

        // Try Authorization header first, then the query (browsers cannot set
        // headers on WebSocket upgrades)
        let token = match TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await
        {
            Ok(TypedHeader(Authorization(bearer))) => Some(bearer.token().to_string()),
            Err(_) => extract_token_from_query(parts.uri.query()),
        };

        token
            .and_then(|token| extractor.store.authenticate(&token))
            .map(RequireAuth)
            .ok_or((StatusCode::UNAUTHORIZED, "Authentication required"))
    }
}

/// Extract token from request query parameters
pub fn extract_token_from_query(query: Option<&str>) -> Option<String> {
    query.and_then(|q| {
        q.split('&')
            .find(|p| p.starts_with("token="))
            .map(|p| p.strip_prefix("token=").unwrap_or("").to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_from_query() {
        assert_eq!(
            extract_token_from_query(Some("mode=x&token=abc")),
            Some("abc".to_string())
        );
        assert_eq!(extract_token_from_query(Some("mode=x")), None);
        assert_eq!(extract_token_from_query(None), None);
    }
}
