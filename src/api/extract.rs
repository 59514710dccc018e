/// Request extractors shared by the handlers
use crate::error::{missing_field, NotifyError, NotifyResult};
use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

/// JSON body whose rejections surface as 400 `{error}` responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = NotifyError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(NotifyError::Validation(rejection.body_text())),
        }
    }
}

/// A required string field; blank counts as missing
pub fn required(value: Option<String>, name: &str) -> NotifyResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing_field(name))
}

/// Optional string field with blanks folded to `None`
pub fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Rating on the 1 to 10 scale
pub fn rating(value: Option<i64>) -> NotifyResult<u8> {
    let value = value.ok_or_else(|| missing_field("rating"))?;
    u8::try_from(value)
        .ok()
        .filter(|r| (1..=10).contains(r))
        .ok_or_else(|| NotifyError::Validation("Rating must be between 1 and 10".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_treats_blank_as_missing() {
        assert_eq!(required(Some(" T1 ".into()), "token").unwrap(), "T1");
        match required(Some("   ".into()), "token") {
            Err(NotifyError::Validation(msg)) => assert_eq!(msg, "Missing required field: token"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(required(None, "token").is_err());
    }

    #[test]
    fn test_rating_bounds() {
        assert_eq!(rating(Some(10)).unwrap(), 10);
        assert!(rating(Some(0)).is_err());
        assert!(rating(Some(11)).is_err());
        assert!(rating(Some(-3)).is_err());
        assert!(rating(None).is_err());
    }
}
