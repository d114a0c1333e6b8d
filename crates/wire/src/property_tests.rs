// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property tests for the framing layer.

use crate::{read_message, write_message, ProtocolError, MAX_FRAME_LEN};
use proptest::prelude::*;

proptest! {
    #[test]
    fn framing_roundtrips_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let mut buffer = Vec::new();
            write_message(&mut buffer, &payload).await.unwrap();
            let mut cursor = std::io::Cursor::new(buffer);
            let back = read_message(&mut cursor).await.unwrap();
            assert_eq!(back, payload);
        });
    }

    #[test]
    fn consecutive_frames_read_in_order(
        first in proptest::collection::vec(any::<u8>(), 0..512),
        second in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let mut buffer = Vec::new();
            write_message(&mut buffer, &first).await.unwrap();
            write_message(&mut buffer, &second).await.unwrap();
            let mut cursor = std::io::Cursor::new(buffer);
            assert_eq!(read_message(&mut cursor).await.unwrap(), first);
            assert_eq!(read_message(&mut cursor).await.unwrap(), second);
        });
    }
}

#[test]
fn prefix_beyond_limit_never_allocates() {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    rt.block_on(async {
        let mut buffer = ((MAX_FRAME_LEN as u32) + 1).to_be_bytes().to_vec();
        buffer.push(0);
        let mut cursor = std::io::Cursor::new(buffer);
        let err = read_message(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
    });
}
