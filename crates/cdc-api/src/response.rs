use axum::{http::StatusCode, response::IntoResponse, Json};
use cdc_core::{Error, ValidationReport};
use serde::Serialize;

/// Standard API response structure
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub message: String,
    pub code: String,
    pub errors: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful response with data
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            message: message.into(),
            code: "SUCCESS".to_string(),
            errors: vec![],
        }
    }

    /// Create a not found error response
    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self {
            data: None,
            message: format!("{} not found", resource),
            code: "NOT_FOUND".to_string(),
            errors: vec![],
        }
    }

    /// Create a bad request error response
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            data: None,
            message: message.into(),
            code: "BAD_REQUEST".to_string(),
            errors: vec![],
        }
    }

    /// Create a conflict error response
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            data: None,
            message: message.into(),
            code: "CONFLICT".to_string(),
            errors: vec![],
        }
    }

    /// Source not ready: one entry per failing step
    pub fn validation_failed(report: &ValidationReport) -> Self {
        Self {
            data: None,
            message: "Source is not ready for change capture".to_string(),
            code: "VALIDATION_FAILED".to_string(),
            errors: report
                .failed_steps()
                .map(|step| match &step.remediation {
                    Some(fix) => format!("{}: {} ({})", step.step, step.message, fix),
                    None => format!("{}: {}", step.step, step.message),
                })
                .collect(),
        }
    }

    /// The capture service refused the job
    pub fn registration_failed(kind: impl ToString, message: impl Into<String>) -> Self {
        Self {
            data: None,
            message: message.into(),
            code: "REGISTRATION_FAILED".to_string(),
            errors: vec![kind.to_string()],
        }
    }

    /// A database, broker or the capture service could not be reached
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            data: None,
            message: message.into(),
            code: "SERVICE_UNAVAILABLE".to_string(),
            errors: vec![],
        }
    }

    pub fn from_error(error: Error) -> Self {
        match error {
            Error::Validation(report) => Self::validation_failed(&report),
            Error::Registration { kind, message } => Self::registration_failed(kind, message),
            Error::NotFound(what) => Self::not_found(what),
            Error::AlreadyExists(what) => Self::conflict(format!("{} already exists", what)),
            Error::Configuration(message) => Self::bad_request(message),
            Error::Connection(message) | Error::Stream(message) => Self::unavailable(message),
            other => Self::internal_error(other.to_string()),
        }
    }

    /// Create an internal error response
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            message: message.into(),
            code: "INTERNAL_ERROR".to_string(),
            errors: vec![],
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code.as_str() {
            "SUCCESS" => StatusCode::OK,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "VALIDATION_FAILED" => StatusCode::BAD_REQUEST,
            "REGISTRATION_FAILED" => StatusCode::BAD_GATEWAY,
            "SERVICE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            "INTERNAL_ERROR" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::{RegistrationFailure, ValidationStep};

    #[test]
    fn test_validation_failure_lists_failed_steps() {
        let report = ValidationReport::from_steps(vec![
            ValidationStep::success("connectivity", "ok"),
            ValidationStep::error("wal_level", "wal_level is 'replica'")
                .with_remediation("ALTER SYSTEM SET wal_level = 'logical'"),
            ValidationStep::warning("replica_identity", "1 table"),
        ]);
        let response = ApiResponse::<()>::from_error(Error::Validation(report));

        assert_eq!(response.code, "VALIDATION_FAILED");
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].starts_with("wal_level: "));
        assert_eq!(response.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_registration_failure_is_bad_gateway() {
        let response = ApiResponse::<()>::from_error(Error::registration(
            RegistrationFailure::Credentials,
            "check user name and password",
        ));
        assert_eq!(response.errors, vec!["credentials".to_string()]);
        assert_eq!(response.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
