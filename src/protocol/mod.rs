//! # Protocol Module
//!
//! Fixed-width binary framing shared by the server and its clients.
//!
//! ## Request frame
//!
//! ```text
//! +-------+-----------+-----------+----------------+----------------+
//! | magic | seq_num   | length    | function_id    | args ...       |
//! | u8    | u32 (BE)  | u32 (BE)  | u32 (BE)       | length - 4     |
//! +-------+-----------+-----------+----------------+----------------+
//!   header (9 bytes)               payload (length bytes)
//! ```
//!
//! ## Response frame
//!
//! ```text
//! +-----------+--------+----------------------------------+
//! | length    | status | body ...                         |
//! | u32 (BE)  | u8     | handler output or encoded error  |
//! +-----------+--------+----------------------------------+
//! ```
//!
//! Success and error responses share this framing. A non-zero status byte
//! marks an error; the body is then a JSON-encoded [`RpcError`].

mod function_id;
mod header;
mod response;

pub use function_id::{function_id, FunctionId};
pub use header::{
    encode_request, split_function_id, RpcHeader, DEFAULT_MAX_PAYLOAD_LENGTH, FUNCTION_ID_LEN,
    MAGIC_NUMBER, REQUEST_HEADER_LEN,
};
pub use response::{
    decode_response_length, decode_response_payload, error_frame, response_frame, success_frame,
    RpcError, RpcErrorCode, RESPONSE_HEADER_LEN, STATUS_ERROR, STATUS_OK,
};
