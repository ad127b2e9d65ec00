use super::FunctionId;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the response header: the payload length as a big-endian u32.
pub const RESPONSE_HEADER_LEN: usize = 4;

/// Status byte for a successful response.
pub const STATUS_OK: u8 = 0;

/// Status byte for an error response.
pub const STATUS_ERROR: u8 = 1;

/// Error condition carried inside an error response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorCode {
    /// No handler is registered for the requested function id.
    /// The server closes the connection after sending this.
    FunctionNotSupported,
    /// The handler returned an error, panicked, or never answered.
    HandlerFailed,
}

/// Decoded error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub message: String,
}

impl RpcError {
    #[must_use]
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn function_not_supported(function: FunctionId) -> Self {
        Self::new(
            RpcErrorCode::FunctionNotSupported,
            format!("function {function} is not supported"),
        )
    }

    #[must_use]
    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::HandlerFailed, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Frame a response payload: length header, status byte, body.
///
/// Bodies too large for the u32 length field are replaced with an error
/// frame so the stream never carries a truncated length.
#[must_use]
pub fn response_frame(status: u8, body: &[u8]) -> Vec<u8> {
    let Ok(length) = u32::try_from(body.len() + 1) else {
        return error_frame(&RpcError::handler_failed(format!(
            "response body of {} bytes exceeds the frame limit",
            body.len()
        )));
    };
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + length as usize);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(status);
    frame.extend_from_slice(body);
    frame
}

/// Frame a successful handler output.
#[must_use]
pub fn success_frame(body: &[u8]) -> Vec<u8> {
    response_frame(STATUS_OK, body)
}

/// Frame an error response.
#[must_use]
pub fn error_frame(err: &RpcError) -> Vec<u8> {
    // derive(Serialize) on a plain enum + String cannot fail
    let body = serde_json::to_vec(err).unwrap_or_default();
    response_frame(STATUS_ERROR, &body)
}

#[must_use]
pub fn decode_response_length(buf: &[u8; RESPONSE_HEADER_LEN]) -> u32 {
    u32::from_be_bytes(*buf)
}

/// Decode a response payload (everything after the length header).
///
/// The outer `Result` reports framing problems; the inner one is the call outcome.
pub fn decode_response_payload(payload: &[u8]) -> Result<Result<Vec<u8>, RpcError>, ProtocolError> {
    let (status, body) = payload
        .split_first()
        .ok_or(ProtocolError::MalformedResponse)?;
    match *status {
        STATUS_OK => Ok(Ok(body.to_vec())),
        STATUS_ERROR => {
            let err: RpcError =
                serde_json::from_slice(body).map_err(|_| ProtocolError::MalformedResponse)?;
            Ok(Err(err))
        }
        _ => Err(ProtocolError::MalformedResponse),
    }
}
