use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use rede_splitter_storage::error::StoreError;
use serde_json::json;

use crate::ApiContext;

#[derive(Debug)]
pub enum RpcErr {
    BadParams(String),
    Unauthorized,
    NotFound(String),
    UnknownLease(String),
    ConflictingConfirm(String),
    Internal(String),
}

impl RpcErr {
    fn status(&self) -> StatusCode {
        match self {
            RpcErr::BadParams(_) => StatusCode::BAD_REQUEST,
            RpcErr::Unauthorized => StatusCode::UNAUTHORIZED,
            RpcErr::NotFound(_) => StatusCode::NOT_FOUND,
            RpcErr::UnknownLease(_) | RpcErr::ConflictingConfirm(_) => StatusCode::CONFLICT,
            RpcErr::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            RpcErr::BadParams(msg) => msg.clone(),
            RpcErr::Unauthorized => "Missing or invalid bearer token".to_string(),
            RpcErr::NotFound(what) => format!("{what} not found"),
            RpcErr::UnknownLease(id) => format!("Unknown or expired lease: {id}"),
            RpcErr::ConflictingConfirm(id) => {
                format!("Lease {id} was already confirmed with a different outcome")
            }
            RpcErr::Internal(msg) => msg.clone(),
        }
    }
}

/// Every error leaves the service as `{"status":"error","msg":…}` with the
/// matching HTTP code; 2xx only means the operation was accepted.
impl IntoResponse for RpcErr {
    fn into_response(self) -> Response {
        let body = Json(json!({"status": "error", "msg": self.message()}));
        (self.status(), body).into_response()
    }
}

impl From<StoreError> for RpcErr {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::UnknownLease(id) => RpcErr::UnknownLease(id),
            StoreError::ConflictingConfirm(id) => RpcErr::ConflictingConfirm(id),
            StoreError::Custom(msg) => RpcErr::Internal(msg),
        }
    }
}

impl From<std::io::Error> for RpcErr {
    fn from(value: std::io::Error) -> Self {
        RpcErr::Internal(value.to_string())
    }
}

pub type AuthHeader = Option<TypedHeader<Authorization<Bearer>>>;

/// Static bearer check; open when no key is configured.
pub fn authorize(ctx: &ApiContext, header: &AuthHeader) -> Result<(), RpcErr> {
    let Some(expected) = ctx.config.api_key.as_deref() else {
        return Ok(());
    };
    match header {
        Some(TypedHeader(auth)) if auth.token() == expected => Ok(()),
        _ => Err(RpcErr::Unauthorized),
    }
}
