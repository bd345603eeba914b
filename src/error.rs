use std::fmt::{Display, Formatter};

use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DlErrorCode {
    InvalidArgument,
    RequestFailed,
    Transport,
    Protocol,
    Internal,
}

impl DlErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlErrorCode::InvalidArgument => "dl-api/invalid-argument",
            DlErrorCode::RequestFailed => "dl-api/request-failed",
            DlErrorCode::Transport => "dl-api/transport",
            DlErrorCode::Protocol => "dl-api/protocol",
            DlErrorCode::Internal => "dl-api/internal",
        }
    }
}

/// Error returned by every fallible operation in the crate.
///
/// Request failures keep the parsed response body in [`DlError::payload`];
/// it is `None` when the server answered with something that was not JSON.
#[derive(Clone, Debug)]
pub struct DlError {
    pub code: DlErrorCode,
    message: String,
    payload: Option<Value>,
    status: Option<u16>,
}

impl DlError {
    pub fn new(code: DlErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            payload: None,
            status: None,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl Display for DlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for DlError {}

pub type DlResult<T> = Result<T, DlError>;

pub fn invalid_argument(message: impl Into<String>) -> DlError {
    DlError::new(DlErrorCode::InvalidArgument, message)
}

pub fn request_failed(status: u16, payload: Option<Value>) -> DlError {
    let message = payload
        .as_ref()
        .and_then(extract_error_message)
        .unwrap_or_else(|| format!("request failed with status {status}"));
    DlError {
        code: DlErrorCode::RequestFailed,
        message,
        payload,
        status: Some(status),
    }
}

/// Failure reported by the server for a remote procedure call.
pub fn call_failed(message: impl Into<String>, payload: Value) -> DlError {
    DlError {
        code: DlErrorCode::RequestFailed,
        message: message.into(),
        payload: Some(payload),
        status: None,
    }
}

pub fn transport_error(message: impl Into<String>) -> DlError {
    DlError::new(DlErrorCode::Transport, message)
}

pub fn protocol_error(message: impl Into<String>) -> DlError {
    DlError::new(DlErrorCode::Protocol, message)
}

pub fn internal_error(message: impl Into<String>) -> DlError {
    DlError::new(DlErrorCode::Internal, message)
}

fn extract_error_message(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Object(object) => object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
