//! Caller identity extractor for Axum handlers.
//!
//! Authentication happens upstream; the gateway only receives an opaque
//! identity in the `X-Caller-Id` header and uses it to scope jobs.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use rollout_core::error::CoreError;

use crate::error::AppError;

/// Header carrying the opaque caller identity.
pub const CALLER_HEADER: &str = "x-caller-id";

/// Maximum accepted identity length.
const MAX_CALLER_LEN: usize = 128;

/// The identity of the caller making the request.
///
/// ```ignore
/// async fn my_handler(caller: CallerIdentity) -> AppResult<Json<()>> {
///     tracing::info!(caller = %caller.id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub id: String,
}

impl CallerIdentity {
    /// `Forbidden` unless the caller owns the job.
    pub fn ensure_owns(&self, owner: &str, action: &str) -> Result<(), AppError> {
        if owner != self.id {
            return Err(AppError::Core(CoreError::Forbidden(format!(
                "Cannot {action} another caller's job"
            ))));
        }
        Ok(())
    }
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized("Missing X-Caller-Id header".into()))
            })?
            .to_str()
            .map_err(|_| {
                AppError::Core(CoreError::Unauthorized("Malformed X-Caller-Id header".into()))
            })?
            .trim();

        if raw.is_empty() || raw.len() > MAX_CALLER_LEN {
            return Err(AppError::Core(CoreError::Unauthorized(
                "Malformed X-Caller-Id header".into(),
            )));
        }

        Ok(CallerIdentity { id: raw.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::http::Request;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<CallerIdentity, AppError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(CALLER_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CallerIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_trimmed_header() {
        let caller = extract(Some("  ops-team ")).await.unwrap();
        assert_eq!(caller.id, "ops-team");
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        assert_matches!(
            extract(None).await,
            Err(AppError::Core(CoreError::Unauthorized(_)))
        );
    }

    #[tokio::test]
    async fn blank_header_is_unauthorized() {
        assert_matches!(
            extract(Some("   ")).await,
            Err(AppError::Core(CoreError::Unauthorized(_)))
        );
    }

    #[test]
    fn other_owner_is_forbidden() {
        let caller = CallerIdentity { id: "alice".into() };
        assert!(caller.ensure_owns("alice", "view").is_ok());
        assert_matches!(
            caller.ensure_owns("bob", "view"),
            Err(AppError::Core(CoreError::Forbidden(msg))) if msg == "Cannot view another caller's job"
        );
    }
}
