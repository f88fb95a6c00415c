use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bazaar_core::DomainError;
use bazaar_infra::ServiceError;

/// Message shown for any provider failure; provider text stays in the logs.
pub const PROVIDER_PENDING: &str = "payment/payout pending - retry later";

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        ServiceError::Provider(e) => {
            tracing::warn!(error = %e, "payment provider call failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable", PROVIDER_PENDING)
        }
        ServiceError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ServiceError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DomainError::Unauthorized(msg) => json_error(StatusCode::FORBIDDEN, "unauthorized", msg),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        e @ DomainError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
        DomainError::Duplicate(msg) => json_error(StatusCode::CONFLICT, "duplicate", msg),
        DomainError::InvariantViolation(msg) => {
            tracing::error!(error = %msg, "invariant violated");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, answering 400 on garbage.
pub fn parse_id<T>(raw: &str, what: &'static str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr,
{
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_infra::provider::ProviderError;

    #[test]
    fn domain_errors_map_to_their_status() {
        let cases = [
            (DomainError::validation("bad"), StatusCode::BAD_REQUEST),
            (DomainError::not_found("order"), StatusCode::NOT_FOUND),
            (DomainError::unauthorized("nope"), StatusCode::FORBIDDEN),
            (DomainError::conflict("stock"), StatusCode::CONFLICT),
            (DomainError::duplicate("key"), StatusCode::CONFLICT),
            (
                DomainError::invalid_transition("delivered", "shipped"),
                StatusCode::CONFLICT,
            ),
            (DomainError::invariant("broken"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn provider_failures_are_service_unavailable() {
        let resp = service_error_to_response(ServiceError::Provider(ProviderError::Timeout(std::time::Duration::from_secs(5))));
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
