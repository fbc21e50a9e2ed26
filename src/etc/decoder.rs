// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Incremental decoding of the device byte stream.

use tracing::{debug, warn};

use super::protocol::{DeviceMessage, DeviceMessageKind, CATALOG};

/// Extract the first message from `buffer`.
///
/// Returns the message and the number of bytes it consumed, or `None` when
/// more bytes are needed. A buffer that cannot become any catalog message is
/// consumed whole as [`DeviceMessageKind::Unknown`].
pub fn parse(buffer: &[u8]) -> Option<(DeviceMessage, usize)> {
    if buffer.is_empty() {
        return None;
    }

    if let Some(kind) = CATALOG.iter().find(|kind| kind.matches(buffer)) {
        let length = kind.length();
        return Some((DeviceMessage::new(*kind, buffer[..length].to_vec()), length));
    }

    if CATALOG.iter().any(|kind| kind.could_match(buffer)) {
        return None;
    }

    Some((
        DeviceMessage::new(DeviceMessageKind::Unknown, buffer.to_vec()),
        buffer.len(),
    ))
}

/// Accumulates received chunks and splits them into messages.
pub struct MessageDecoder {
    buffer: Vec<u8>,
}

impl MessageDecoder {
    /// Create a new message decoder.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    /// Append a received chunk and return every message now complete.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Vec<DeviceMessage> {
        debug!("Newly received: {} bytes ({})", chunk.len(), hex::encode_upper(chunk));
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some((message, consumed)) = parse(&self.buffer) {
            if message.kind() == DeviceMessageKind::Unknown {
                warn!("Discarding unrecognized bytes: {:?}", message);
            }
            self.buffer.drain(..consumed);
            messages.push(message);
        }

        if !self.buffer.is_empty() {
            debug!(
                "Unprocessed data: {} bytes ({})",
                self.buffer.len(),
                hex::encode_upper(&self.buffer)
            );
        }

        messages
    }

    /// Drop any partially received message.
    #[cfg(test)]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Get current buffer size.
    #[cfg(test)]
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(kind: DeviceMessageKind) -> Vec<u8> {
        match kind {
            DeviceMessageKind::DeviceNameResponse => b"ETC-0042".to_vec(),
            DeviceMessageKind::UniqueCardDataResponse => b"0123456789ABCDEF01234567".to_vec(),
            DeviceMessageKind::PaymentRecordResponse => {
                b"01080302801080305420190531171226001  2120".to_vec()
            }
            DeviceMessageKind::PaymentNotification => b"  2120".to_vec(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_every_catalog_type_decodes_to_itself() {
        for kind in CATALOG {
            let message = DeviceMessage::mock(kind, &sample_payload(kind)).unwrap();
            let mut decoder = MessageDecoder::new();

            let decoded = decoder.process_chunk(message.bytes());
            assert_eq!(decoded, vec![message.clone()], "{:?}", kind);
            assert_eq!(decoder.buffer_size(), 0);
        }
    }

    #[test]
    fn test_two_messages_back_to_back() {
        let first = DeviceMessage::signal(DeviceMessageKind::HandshakeAcknowledgement).unwrap();
        let second = DeviceMessage::signal(DeviceMessageKind::HandshakeRequest).unwrap();

        let mut chunk = first.bytes().to_vec();
        chunk.extend_from_slice(second.bytes());

        let mut decoder = MessageDecoder::new();
        let decoded = decoder.process_chunk(&chunk);
        assert_eq!(decoded, vec![first, second]);
        assert_eq!(decoder.buffer_size(), 0);
    }

    #[test]
    fn test_truncated_message_waits_for_rest() {
        let message = DeviceMessage::mock(
            DeviceMessageKind::PaymentRecordResponse,
            &sample_payload(DeviceMessageKind::PaymentRecordResponse),
        )
        .unwrap();
        let bytes = message.bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 1);

        let mut decoder = MessageDecoder::new();
        assert!(decoder.process_chunk(head).is_empty());
        assert_eq!(decoder.buffer_size(), head.len());

        let decoded = decoder.process_chunk(tail);
        assert_eq!(decoded, vec![message]);
        assert_eq!(decoder.buffer_size(), 0);
    }

    #[test]
    fn test_message_split_across_many_chunks() {
        let message = DeviceMessage::signal(DeviceMessageKind::CardInsertionNotification).unwrap();
        let mut decoder = MessageDecoder::new();

        let mut decoded = Vec::new();
        for byte in message.bytes() {
            decoded.extend(decoder.process_chunk(&[*byte]));
        }
        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn test_unmatched_bytes_consume_whole_buffer() {
        // A stray byte in front of a valid frame swallows the frame too.
        let heartbeat = DeviceMessage::signal(DeviceMessageKind::Heartbeat).unwrap();
        let mut chunk = vec![0x99];
        chunk.extend_from_slice(heartbeat.bytes());

        let mut decoder = MessageDecoder::new();
        let decoded = decoder.process_chunk(&chunk);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].kind(), DeviceMessageKind::Unknown);
        assert_eq!(decoded[0].bytes(), chunk.as_slice());
        assert!(decoded[0].payload_bytes().is_empty());
        assert_eq!(decoder.buffer_size(), 0);
    }

    #[test]
    fn test_valid_frame_followed_by_garbage() {
        let heartbeat = DeviceMessage::signal(DeviceMessageKind::Heartbeat).unwrap();
        let mut chunk = heartbeat.bytes().to_vec();
        chunk.extend_from_slice(&[0x99, 0x98]);

        let decoded = MessageDecoder::new().process_chunk(&chunk);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], heartbeat);
        assert_eq!(decoded[1].kind(), DeviceMessageKind::Unknown);
        assert_eq!(decoded[1].bytes(), &[0x99, 0x98]);
    }

    #[test]
    fn test_parse_empty_buffer() {
        assert!(parse(&[]).is_none());
    }

    #[test]
    fn test_reset_drops_partial_message() {
        let mut decoder = MessageDecoder::new();
        assert!(decoder.process_chunk(&[0x02, 0xE5, b'0']).is_empty());
        decoder.reset();
        assert_eq!(decoder.buffer_size(), 0);
    }
}
