//! The request/response envelope every method shares.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_code::ErrorCode;

/// `{id, method, params?}`, exactly per the external interface.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub params: Option<Value>,
}

/// `{id, result?} | {id, error:{code,message}}`. Never both.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok { id: String, result: Value },
    Err { id: String, error: RpcError },
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl Response {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Response::Ok { id: id.into(), result }
    }

    pub fn err(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Err { id: id.into(), error: RpcError { code, message: message.into() } }
    }
}
