use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

/// The opaque account identifier the external auth layer attaches to every
/// request. This core never sees credentials or sessions, only the id.
pub struct AccountContext {
    pub account_id: Uuid,
}

pub const ACCOUNT_HEADER: &str = "x-account-id";

#[async_trait]
impl<S> FromRequestParts<S> for AccountContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing account header".into()))?;
        let account_id = Uuid::parse_str(raw.trim())
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid account header".into()))?;
        Ok(AccountContext { account_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn account_id_parsed_from_header() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header("X-Account-Id", id.to_string())
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let ctx = AccountContext::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(ctx.account_id, id);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let request = Request::builder()
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let res = AccountContext::from_request_parts(&mut parts, &()).await;
        assert_eq!(res.err().map(|(status, _)| status), Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn malformed_id_is_unauthorized() {
        let request = Request::builder()
            .header("X-Account-Id", "not-a-uuid")
            .body(axum::body::Body::empty())
            .unwrap();
        let mut parts = request.into_parts().0;
        let res = AccountContext::from_request_parts(&mut parts, &()).await;
        assert!(res.is_err());
    }
}
