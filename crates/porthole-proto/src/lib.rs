//! Tunnel Protocol Definitions
//!
//! This crate defines the messages sent over a tunnel's control connection
//! and the binary frame format used to carry one HTTP exchange over a data
//! connection.

pub mod frame;
pub mod messages;

pub use frame::{
    decode_request, decode_response, encode_request, encode_response, FrameError, RequestHead,
    ResponseHead,
};
pub use messages::{ControlMessage, OpenMode};

/// Maximum size of a single framed message (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
