use crate::common::error::InvocationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Envelope returned by every invocation.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            data: None,
        }
    }
}

pub struct ApiSuccess<T>(pub ApiResponse<T>, pub StatusCode);

impl<T> IntoResponse for ApiSuccess<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        let Self(body, status) = self;
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for InvocationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ApiResponse::failure(self.to_string()))).into_response()
    }
}
