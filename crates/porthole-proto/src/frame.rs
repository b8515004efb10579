//! Binary frame format for HTTP-mode data connections
//!
//! One framed message carries one complete HTTP request or response:
//!
//! ```text
//! [4-byte big-endian header length N][N bytes UTF-8 JSON header][body bytes]
//! ```
//!
//! The JSON header describes the message (`{method, path, headers,
//! bodyLength}` for requests, `{statusCode, headers, bodyLength}` for
//! responses); the body is whatever bytes follow the header in the same
//! message. `bodyLength` is informational only.

use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::MAX_FRAME_SIZE;

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    #[error("Declared header length {declared} exceeds payload size {available}")]
    HeaderOverrun { declared: usize, available: usize },

    #[error("Header is not valid JSON: {0}")]
    InvalidHeader(#[from] serde_json::Error),
}

/// JSON header of a framed request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body_length: usize,
}

/// JSON header of a framed response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHead {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body_length: usize,
}

impl RequestHead {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: Vec<(String, String)>,
        body_length: usize,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers,
            body_length,
        }
    }
}

impl ResponseHead {
    pub fn new(status_code: u16, headers: Vec<(String, String)>, body_length: usize) -> Self {
        Self {
            status_code,
            headers,
            body_length,
        }
    }
}

/// Encode a request into a single framed message
pub fn encode_request(head: &RequestHead, body: &[u8]) -> Vec<u8> {
    encode(head, body)
}

/// Encode a response into a single framed message
pub fn encode_response(head: &ResponseHead, body: &[u8]) -> Vec<u8> {
    encode(head, body)
}

/// Decode a framed request, returning the header and body bytes
pub fn decode_request(payload: &[u8]) -> Result<(RequestHead, Vec<u8>), FrameError> {
    decode(payload)
}

/// Decode a framed response, returning the header and body bytes
pub fn decode_response(payload: &[u8]) -> Result<(ResponseHead, Vec<u8>), FrameError> {
    decode(payload)
}

fn encode<H: Serialize>(head: &H, body: &[u8]) -> Vec<u8> {
    // Header structs serialize infallibly (strings and integers only)
    let header = serde_json::to_vec(head).expect("frame header serialization");

    let mut buf = BytesMut::with_capacity(4 + header.len() + body.len());
    buf.put_u32(header.len() as u32);
    buf.put_slice(&header);
    buf.put_slice(body);
    buf.to_vec()
}

fn decode<H: DeserializeOwned>(payload: &[u8]) -> Result<(H, Vec<u8>), FrameError> {
    if payload.len() < 4 {
        return Err(FrameError::TooShort(payload.len()));
    }

    let mut cursor = payload;
    let header_len = cursor.get_u32() as usize;

    if header_len > cursor.remaining() || header_len > MAX_FRAME_SIZE {
        return Err(FrameError::HeaderOverrun {
            declared: header_len,
            available: cursor.remaining(),
        });
    }

    let head: H = serde_json::from_slice(&cursor[..header_len])?;
    let body = cursor[header_len..].to_vec();
    Ok((head, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let head = RequestHead::new(
            "POST",
            "/api/items?page=2",
            vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("accept".to_string(), "*/*".to_string()),
            ],
            9,
        );
        let body = b"{\"a\": 1}\n";

        let framed = encode_request(&head, body);
        let (decoded, decoded_body) = decode_request(&framed).unwrap();

        assert_eq!(decoded, head);
        assert_eq!(decoded_body, body);
    }

    #[test]
    fn test_response_round_trip() {
        let head = ResponseHead::new(
            404,
            vec![("content-type".to_string(), "text/plain".to_string())],
            9,
        );
        let body = b"Not Found";

        let framed = encode_response(&head, body);
        let (decoded, decoded_body) = decode_response(&framed).unwrap();

        assert_eq!(decoded.status_code, 404);
        assert_eq!(decoded.headers, head.headers);
        assert_eq!(decoded_body, body);
    }

    #[test]
    fn test_header_json_field_names() {
        let head = RequestHead::new("GET", "/", vec![], 0);
        let framed = encode_request(&head, &[]);

        // Fields are camelCase on the wire
        let header_len = u32::from_be_bytes(framed[..4].try_into().unwrap()) as usize;
        let json: serde_json::Value = serde_json::from_slice(&framed[4..4 + header_len]).unwrap();
        assert!(json.get("bodyLength").is_some());

        let resp = ResponseHead::new(200, vec![], 0);
        let framed = encode_response(&resp, &[]);
        let header_len = u32::from_be_bytes(framed[..4].try_into().unwrap()) as usize;
        let json: serde_json::Value = serde_json::from_slice(&framed[4..4 + header_len]).unwrap();
        assert!(json.get("statusCode").is_some());
    }

    #[test]
    fn test_empty_body() {
        let head = ResponseHead::new(204, vec![], 0);
        let framed = encode_response(&head, &[]);
        let (decoded, body) = decode_response(&framed).unwrap();

        assert_eq!(decoded.status_code, 204);
        assert!(body.is_empty());
    }

    #[test]
    fn test_payload_shorter_than_length_prefix() {
        let result = decode_response(&[0, 1, 2]);
        assert!(matches!(result, Err(FrameError::TooShort(3))));
    }

    #[test]
    fn test_declared_header_overruns_payload() {
        let mut framed = Vec::new();
        framed.extend_from_slice(&1000u32.to_be_bytes());
        framed.extend_from_slice(b"short");

        let result = decode_response(&framed);
        assert!(matches!(
            result,
            Err(FrameError::HeaderOverrun {
                declared: 1000,
                available: 5
            })
        ));
    }

    #[test]
    fn test_garbage_header_is_error_not_panic() {
        let mut framed = Vec::new();
        framed.extend_from_slice(&4u32.to_be_bytes());
        framed.extend_from_slice(&[0xff, 0xfe, 0x00, 0x01]);

        let result = decode_request(&framed);
        assert!(matches!(result, Err(FrameError::InvalidHeader(_))));
    }

    #[test]
    fn test_binary_body_preserved() {
        let body: Vec<u8> = (0..=255).collect();
        let head = ResponseHead::new(200, vec![], body.len());

        let framed = encode_response(&head, &body);
        let (_, decoded_body) = decode_response(&framed).unwrap();
        assert_eq!(decoded_body, body);
    }
}
