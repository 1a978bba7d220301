use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Stable machine-readable failure codes. The same condition maps to the same
/// code no matter which endpoint surfaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    OrderNotFound,
    CourierNotFound,
    DeliveryNotFound,
    RouteNotFound,
    AlternatePlanNotFound,
    AddressNotFound,
    RouteUnavailable,
    InvalidCourierRole,
    CourierInactive,
    ReassignmentReasonRequired,
    CapacityExceeded,
    InvalidSequence,
    OrderNotAssignable,
    OrderInActiveRoute,
    OrderAssignedElsewhere,
    InvalidInput,
    MissingActor,
    PermissionDenied,
    InvalidOrderState,
    InvalidDeliveryState,
    InvalidRouteState,
    ConstraintViolation,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::OrderNotFound => "order_not_found",
            ErrorCode::CourierNotFound => "courier_not_found",
            ErrorCode::DeliveryNotFound => "delivery_not_found",
            ErrorCode::RouteNotFound => "route_not_found",
            ErrorCode::AlternatePlanNotFound => "alternate_plan_not_found",
            ErrorCode::AddressNotFound => "address_not_found",
            ErrorCode::RouteUnavailable => "route_unavailable",
            ErrorCode::InvalidCourierRole => "invalid_courier_role",
            ErrorCode::CourierInactive => "courier_inactive",
            ErrorCode::ReassignmentReasonRequired => "reassignment_reason_required",
            ErrorCode::CapacityExceeded => "capacity_exceeded",
            ErrorCode::InvalidSequence => "invalid_sequence",
            ErrorCode::OrderNotAssignable => "order_not_assignable",
            ErrorCode::OrderInActiveRoute => "order_in_active_route",
            ErrorCode::OrderAssignedElsewhere => "order_assigned_elsewhere",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::MissingActor => "missing_actor",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::InvalidOrderState => "invalid_order_state",
            ErrorCode::InvalidDeliveryState => "invalid_delivery_state",
            ErrorCode::InvalidRouteState => "invalid_route_state",
            ErrorCode::ConstraintViolation => "constraint_violation",
            ErrorCode::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {message}")]
    NotFound { code: ErrorCode, message: String },

    #[error("bad request: {message}")]
    BadRequest {
        code: ErrorCode,
        field: Option<&'static str>,
        message: String,
    },

    #[error("forbidden: {message}")]
    Forbidden { code: ErrorCode, message: String },

    #[error("conflict: {message}")]
    Conflict { code: ErrorCode, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        AppError::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_field(code: ErrorCode, field: &'static str, message: impl Into<String>) -> Self {
        AppError::BadRequest {
            code,
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden {
            code: ErrorCode::PermissionDenied,
            message: message.into(),
        }
    }

    pub fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn reassignment_reason_required() -> Self {
        AppError::invalid_field(
            ErrorCode::ReassignmentReasonRequired,
            "reassignment_reason",
            "a reassignment reason is required when the order is held by another courier",
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound { code, .. }
            | AppError::BadRequest { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Conflict { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, field) = match &self {
            AppError::NotFound { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::Conflict { message, .. } => (message.clone(), None),
            AppError::BadRequest { message, field, .. } => (message.clone(), *field),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (msg.clone(), None)
            }
        };

        let body = Json(json!({
            "error": message,
            "code": code.as_str(),
            "field": field,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_code_matches_string_form() {
        let rendered = serde_json::to_value(ErrorCode::ReassignmentReasonRequired).unwrap();
        assert_eq!(rendered, ErrorCode::ReassignmentReasonRequired.as_str());
    }

    #[test]
    fn variants_map_to_distinct_statuses() {
        assert_eq!(
            AppError::not_found(ErrorCode::OrderNotFound, "x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::reassignment_reason_required().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::conflict(ErrorCode::InvalidDeliveryState, "x").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Internal("x".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
