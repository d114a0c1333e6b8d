// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format tests: length-prefix framing and JSON encoding.

use super::*;
use std::time::Duration;

#[test]
fn encode_returns_json_without_length_prefix() {
    let response = Response::Ok;
    let encoded = encode(&response).expect("encode failed");

    let json_str = std::str::from_utf8(&encoded).expect("should be valid UTF-8");
    assert!(json_str.starts_with('{'), "should be JSON object: {}", json_str);
}

#[tokio::test]
async fn read_write_message_roundtrip() {
    let original = b"hello world";

    let mut buffer = Vec::new();
    write_message(&mut buffer, original).await.expect("write failed");

    // write_message adds 4-byte length prefix
    assert_eq!(buffer.len(), 4 + original.len());

    let mut cursor = std::io::Cursor::new(buffer);
    let read_back = read_message(&mut cursor).await.expect("read failed");

    assert_eq!(read_back, original);
}

#[tokio::test]
async fn write_message_adds_length_prefix() {
    let data = b"test data";

    let mut buffer = Vec::new();
    write_message(&mut buffer, data).await.expect("write failed");

    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    assert_eq!(len, data.len());
    assert_eq!(&buffer[4..], data);
}

#[tokio::test]
async fn read_from_empty_stream_is_connection_closed() {
    let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
    let err = read_message(&mut cursor).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn truncated_frame_is_connection_closed() {
    let mut buffer = Vec::new();
    write_message(&mut buffer, b"full payload").await.unwrap();
    buffer.truncate(8); // prefix + 4 bytes

    let mut cursor = std::io::Cursor::new(buffer);
    let err = read_message(&mut cursor).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn oversized_prefix_is_rejected_before_allocation() {
    let mut buffer = (u32::MAX).to_be_bytes().to_vec();
    buffer.extend_from_slice(b"x");

    let mut cursor = std::io::Cursor::new(buffer);
    let err = read_message(&mut cursor).await.unwrap_err();
    assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
}

#[tokio::test]
async fn request_response_roundtrip_through_codec() {
    let request = Request::Ping;
    let mut buffer = Vec::new();
    write_request(&mut buffer, &request, Duration::from_secs(1)).await.unwrap();

    let mut cursor = std::io::Cursor::new(buffer);
    let parsed = read_request(&mut cursor, Duration::from_secs(1)).await.unwrap();
    assert_eq!(parsed, request);
}

#[tokio::test]
async fn garbage_payload_is_malformed() {
    let mut buffer = Vec::new();
    write_message(&mut buffer, b"not json").await.unwrap();

    let mut cursor = std::io::Cursor::new(buffer);
    let err = read_request(&mut cursor, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Malformed(_)));
}
