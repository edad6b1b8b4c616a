//! Wire decoding errors

/// Errors produced while decoding a binary message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("truncated message: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("varint longer than 10 bytes at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("invalid wire type {wire_type} for field {field}")]
    InvalidWireType { field: u32, wire_type: u8 },

    #[error("value for field {field} does not fit in 32 bits")]
    ValueOutOfRange { field: u32 },

    #[error("player id is {len} bytes, limit is {limit}")]
    PlayerIdTooLong { len: usize, limit: usize },

    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 { field: u32 },

    #[error("no message found")]
    NoMessage,
}

pub type WireResult<T> = Result<T, WireError>;
