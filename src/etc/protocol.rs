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

//! ETC onboard unit message catalog and framing.
//!
//! Every message is `header ++ payload ++ terminal`. Headers and payload
//! lengths are fixed per message type, so a buffer can be matched against the
//! catalog structurally without looking at its content.

use chrono::Datelike;
use std::fmt;
use std::ops::RangeInclusive;

use thiserror::Error;

use super::payment::{PaymentRecord, VehicleClassification};

/// Sentinel byte ending every message.
pub const TERMINAL_BYTE: u8 = 0x0D;

/// First byte of messages taking part in the acknowledgement protocol.
pub const FRAMED_MARKER: u8 = 0x01;

/// Errors raised while interpreting a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("Payload bytes are not ASCII text")]
    UnparsableString,
    #[error("Payload text is not an integer")]
    UnparsableInteger,
    #[error("Payload does not describe a valid date")]
    InvalidDate,
    #[error("Unknown vehicle classification code: {0}")]
    UnknownVehicleClassification(i64),
    #[error("Payload range {start}..={end} is outside of a {length}-byte payload")]
    OutOfRange {
        start: usize,
        end: usize,
        length: usize,
    },
    #[error("{field} cannot be encoded from {value:?}")]
    UnencodableField { field: &'static str, value: String },
    #[error("{kind:?} takes a {expected}-byte payload, got {actual} bytes")]
    PayloadLength {
        kind: DeviceMessageKind,
        expected: usize,
        actual: usize,
    },
}

/// Largest amount the 6-digit amount field holds.
pub const MAX_AMOUNT: i64 = 999_999;

/// Filler for the unused leading bytes of each tollbooth field.
const TOLLBOOTH_FIELD_PREFIX: &str = "0100";

/// Compute the 2-byte ASCII-hex checksum of `header ++ payload`.
///
/// The first header byte is excluded and only the low 8 bits of the sum are
/// kept, so a sum of 257 becomes `"01"`.
pub fn checksum(header_and_payload: &[u8]) -> [u8; 2] {
    let sum = header_and_payload
        .iter()
        .skip(1)
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));

    let digits = hex::encode_upper([sum]);
    let digits = digits.as_bytes();
    [digits[0], digits[1]]
}

/// How a message is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Sentinel byte only.
    Plain,
    /// ASCII-hex checksum followed by the sentinel byte.
    Checksummed,
}

impl Framing {
    /// Number of terminal bytes.
    pub const fn terminal_length(self) -> usize {
        match self {
            Self::Plain => 1,
            Self::Checksummed => 3,
        }
    }

    /// Build the terminal for the given header and payload.
    pub fn terminal_bytes(self, header: &[u8], payload: &[u8]) -> Vec<u8> {
        match self {
            Self::Plain => vec![TERMINAL_BYTE],
            Self::Checksummed => {
                let mut target = Vec::with_capacity(header.len() + payload.len());
                target.extend_from_slice(header);
                target.extend_from_slice(payload);

                let mut terminal = checksum(&target).to_vec();
                terminal.push(TERMINAL_BYTE);
                terminal
            }
        }
    }
}

/// Messages sent from the client to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientMessage {
    HandshakeRequest,
    Acknowledgement,
    CardExistenceRequest,
    DeviceNameRequest,
    InitialPaymentRecordRequest,
    NextPaymentRecordRequest,
    UniqueCardDataRequest,
}

impl ClientMessage {
    /// Header bytes identifying the message.
    pub const fn header(self) -> &'static [u8] {
        match self {
            Self::HandshakeRequest => &[0xFA],
            Self::Acknowledgement => &[0x02, 0xC0],
            Self::CardExistenceRequest => &[0x01, 0xC6, b'G'],
            Self::DeviceNameRequest => &[0x01, 0xC6, b'K'],
            Self::InitialPaymentRecordRequest => &[0x01, 0xC6, b'L'],
            Self::NextPaymentRecordRequest => &[0x01, 0xC6, b'M'],
            Self::UniqueCardDataRequest => &[0x01, 0xC6, b'R'],
        }
    }

    /// Terminal framing of the message.
    pub const fn framing(self) -> Framing {
        match self {
            Self::HandshakeRequest => Framing::Plain,
            _ => Framing::Checksummed,
        }
    }

    /// Client messages never carry a payload.
    pub const fn payload(self) -> &'static [u8] {
        &[]
    }

    /// Encode to wire bytes.
    pub fn encode(self) -> Vec<u8> {
        let header = self.header();
        let payload = self.payload();

        let mut bytes = Vec::with_capacity(header.len() + payload.len() + 3);
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(payload);
        bytes.extend(self.framing().terminal_bytes(header, payload));
        bytes
    }

    /// Whether the device only accepts this message after a completed handshake.
    pub fn requires_preliminary_handshake(self) -> bool {
        self.header().first() == Some(&FRAMED_MARKER)
    }

    /// Identify a complete encoded client message.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        CLIENT_MESSAGES
            .into_iter()
            .find(|message| message.encode() == bytes)
    }

    /// Whether a device message of `kind` answers this request.
    pub fn is_answered_by(self, kind: DeviceMessageKind) -> bool {
        use DeviceMessageKind as Kind;

        match self {
            Self::CardExistenceRequest => matches!(
                kind,
                Kind::CardExistenceResponse | Kind::CardNonExistenceResponse
            ),
            Self::DeviceNameRequest => kind == Kind::DeviceNameResponse,
            Self::UniqueCardDataRequest => kind == Kind::UniqueCardDataResponse,
            Self::InitialPaymentRecordRequest => matches!(
                kind,
                Kind::InitialPaymentRecordExistenceResponse
                    | Kind::InitialPaymentRecordNonExistenceResponse
                    | Kind::PaymentRecordResponse
            ),
            Self::NextPaymentRecordRequest => matches!(
                kind,
                Kind::PaymentRecordResponse | Kind::NextPaymentRecordNonExistenceResponse
            ),
            Self::HandshakeRequest | Self::Acknowledgement => false,
        }
    }
}

/// Every client message.
pub const CLIENT_MESSAGES: [ClientMessage; 7] = [
    ClientMessage::HandshakeRequest,
    ClientMessage::Acknowledgement,
    ClientMessage::CardExistenceRequest,
    ClientMessage::DeviceNameRequest,
    ClientMessage::InitialPaymentRecordRequest,
    ClientMessage::NextPaymentRecordRequest,
    ClientMessage::UniqueCardDataRequest,
];

/// Message types sent from the device to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMessageKind {
    Heartbeat,
    HandshakeAcknowledgement,
    HandshakeRequest,
    CardExistenceResponse,
    CardNonExistenceResponse,
    DeviceNameResponse,
    UniqueCardDataResponse,
    InitialPaymentRecordExistenceResponse,
    InitialPaymentRecordNonExistenceResponse,
    NextPaymentRecordNonExistenceResponse,
    PaymentRecordResponse,
    GateEntranceNotification,
    GateExitNotification,
    PaymentNotification,
    CardInsertionNotification,
    CardEjectionNotification,
    /// Bytes that matched nothing in the catalog.
    Unknown,
}

/// Known device message types, in match order.
pub const CATALOG: [DeviceMessageKind; 16] = [
    DeviceMessageKind::Heartbeat,
    DeviceMessageKind::HandshakeAcknowledgement,
    DeviceMessageKind::HandshakeRequest,
    DeviceMessageKind::CardExistenceResponse,
    DeviceMessageKind::CardNonExistenceResponse,
    DeviceMessageKind::DeviceNameResponse,
    DeviceMessageKind::UniqueCardDataResponse,
    DeviceMessageKind::InitialPaymentRecordExistenceResponse,
    DeviceMessageKind::InitialPaymentRecordNonExistenceResponse,
    DeviceMessageKind::NextPaymentRecordNonExistenceResponse,
    DeviceMessageKind::PaymentRecordResponse,
    DeviceMessageKind::GateEntranceNotification,
    DeviceMessageKind::GateExitNotification,
    DeviceMessageKind::PaymentNotification,
    DeviceMessageKind::CardInsertionNotification,
    DeviceMessageKind::CardEjectionNotification,
];

impl DeviceMessageKind {
    /// Header bytes identifying the type.
    pub const fn header(self) -> &'static [u8] {
        match self {
            Self::Heartbeat => &[b'U'],
            Self::HandshakeAcknowledgement => &[0xF0],
            Self::HandshakeRequest => &[0x01, 0xC2, b'0'],
            Self::CardExistenceResponse => &[0x02, 0xCD, 0x01],
            Self::CardNonExistenceResponse => &[0x02, 0xCD, 0x00],
            Self::DeviceNameResponse => &[0x02, 0xE2],
            Self::UniqueCardDataResponse => &[0x02, 0xE6],
            Self::InitialPaymentRecordExistenceResponse => &[0x02, 0xC1, b'7'],
            Self::InitialPaymentRecordNonExistenceResponse => &[0x02, 0xC1, b'5'],
            Self::NextPaymentRecordNonExistenceResponse => &[0x02, 0xC1, b'8'],
            Self::PaymentRecordResponse => &[0x02, 0xE5],
            Self::GateEntranceNotification => &[0x01, 0xC7, b'a'],
            Self::GateExitNotification => &[0x01, 0xC7, b'A'],
            Self::PaymentNotification => &[0x01, 0xC5],
            Self::CardInsertionNotification => &[0x01, 0xC2, b'D'],
            Self::CardEjectionNotification => &[0x01, 0xC2, b'E'],
            Self::Unknown => &[],
        }
    }

    /// Fixed payload length.
    pub const fn payload_length(self) -> usize {
        match self {
            Self::DeviceNameResponse => 8,
            Self::UniqueCardDataResponse => 24,
            Self::PaymentRecordResponse => 41,
            Self::PaymentNotification => 6,
            _ => 0,
        }
    }

    /// Terminal framing, `None` for [`DeviceMessageKind::Unknown`].
    pub const fn framing(self) -> Option<Framing> {
        match self {
            Self::Unknown => None,
            Self::Heartbeat | Self::HandshakeAcknowledgement => Some(Framing::Plain),
            _ => Some(Framing::Checksummed),
        }
    }

    pub const fn terminal_length(self) -> usize {
        match self.framing() {
            Some(framing) => framing.terminal_length(),
            None => 0,
        }
    }

    /// Total encoded length.
    pub const fn length(self) -> usize {
        self.header().len() + self.payload_length() + self.terminal_length()
    }

    /// Whether `buffer` starts with a complete message of this type.
    pub fn matches(self, buffer: &[u8]) -> bool {
        if self == Self::Unknown {
            return false;
        }
        buffer.len() >= self.length() && buffer.starts_with(self.header())
    }

    /// Whether `buffer` could still grow into a message of this type.
    pub fn could_match(self, buffer: &[u8]) -> bool {
        if self == Self::Unknown || buffer.len() >= self.length() {
            return false;
        }
        let header = self.header();
        let compared = buffer.len().min(header.len());
        buffer[..compared] == header[..compared]
    }
}

/// A message received from the device.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    kind: DeviceMessageKind,
    data: Vec<u8>,
}

impl DeviceMessage {
    /// Wrap raw bytes already matched to `kind`.
    ///
    /// `data` must be exactly `kind.length()` bytes unless `kind` is `Unknown`.
    pub(crate) fn new(kind: DeviceMessageKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Build a correctly framed message carrying `payload`.
    pub fn mock(kind: DeviceMessageKind, payload: &[u8]) -> Result<Self, MessageError> {
        if payload.len() != kind.payload_length() {
            return Err(MessageError::PayloadLength {
                kind,
                expected: kind.payload_length(),
                actual: payload.len(),
            });
        }

        let header = kind.header();
        let mut data = Vec::with_capacity(kind.length());
        data.extend_from_slice(header);
        data.extend_from_slice(payload);
        if let Some(framing) = kind.framing() {
            data.extend(framing.terminal_bytes(header, payload));
        }

        Ok(Self { kind, data })
    }

    /// Build a payload-less message.
    pub fn signal(kind: DeviceMessageKind) -> Result<Self, MessageError> {
        Self::mock(kind, &[])
    }

    pub fn kind(&self) -> DeviceMessageKind {
        self.kind
    }

    /// Raw wire bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn header_bytes(&self) -> &[u8] {
        self.section(0, self.kind.header().len())
    }

    pub fn payload_bytes(&self) -> &[u8] {
        self.section(self.kind.header().len(), self.kind.payload_length())
    }

    pub fn terminal_bytes(&self) -> &[u8] {
        let start = self.kind.header().len() + self.kind.payload_length();
        self.section(start, self.kind.terminal_length())
    }

    /// Bytes `start..start + length`, empty when the data is too short.
    fn section(&self, start: usize, length: usize) -> &[u8] {
        self.data.get(start..start + length).unwrap_or_default()
    }

    /// Whether the device expects an acknowledgement for this message.
    pub fn requires_acknowledgement(&self) -> bool {
        self.data.first() == Some(&FRAMED_MARKER)
    }

    /// Whether the terminal matches what the framing rules demand.
    pub fn has_valid_checksum(&self) -> bool {
        match self.kind.framing() {
            Some(framing) => {
                framing.terminal_bytes(self.header_bytes(), self.payload_bytes())
                    == self.terminal_bytes()
            }
            None => true,
        }
    }

    /// Interpret a payload range (or the whole payload) as ASCII text.
    pub fn extract_string(
        &self,
        range: Option<RangeInclusive<usize>>,
    ) -> Result<String, MessageError> {
        let payload = self.payload_bytes();
        let range = match range {
            Some(range) => range,
            None if payload.is_empty() => return Ok(String::new()),
            None => 0..=payload.len() - 1,
        };

        let (start, end) = (*range.start(), *range.end());
        let bytes = payload.get(range).ok_or(MessageError::OutOfRange {
            start,
            end,
            length: payload.len(),
        })?;

        if !bytes.is_ascii() {
            return Err(MessageError::UnparsableString);
        }

        let text = std::str::from_utf8(bytes).map_err(|_| MessageError::UnparsableString)?;
        Ok(text.trim().to_string())
    }

    /// Interpret a payload range (or the whole payload) as a decimal integer.
    pub fn extract_integer(
        &self,
        range: Option<RangeInclusive<usize>>,
    ) -> Result<i64, MessageError> {
        self.extract_string(range)?
            .parse::<i64>()
            .map_err(|_| MessageError::UnparsableInteger)
    }

    /// Device name carried by a device name response.
    pub fn device_name(&self) -> Result<String, MessageError> {
        self.extract_string(None)
    }

    /// Amount announced by a payment notification.
    pub fn notified_amount(&self) -> Result<i64, MessageError> {
        self.extract_integer(None)
    }

    /// Decode the payment record carried by a payment record response.
    pub fn payment_record(&self) -> Result<PaymentRecord, MessageError> {
        let entrance_tollbooth_id = format!(
            "{}-{}",
            self.extract_string(Some(4..=5))?,
            self.extract_string(Some(6..=8))?
        );
        let exit_tollbooth_id = format!(
            "{}-{}",
            self.extract_string(Some(13..=14))?,
            self.extract_string(Some(15..=17))?
        );

        let exit_date = PaymentRecord::exit_date_from_components(
            self.extract_integer(Some(18..=21))?,
            self.extract_integer(Some(22..=23))?,
            self.extract_integer(Some(24..=25))?,
            self.extract_integer(Some(26..=27))?,
            self.extract_integer(Some(28..=29))?,
            self.extract_integer(Some(30..=31))?,
        )?;

        let vehicle_classification =
            VehicleClassification::from_code(self.extract_integer(Some(32..=34))?)?;

        let amount = i32::try_from(self.extract_integer(Some(35..=40))?)
            .map_err(|_| MessageError::UnparsableInteger)?;

        Ok(PaymentRecord {
            amount,
            entrance_date: None,
            exit_date,
            entrance_tollbooth_id,
            exit_tollbooth_id,
            vehicle_classification,
        })
    }

    /// Build the payment record response carrying `record`.
    ///
    /// The exit date is written in device time. Sub-second precision is lost.
    pub fn payment_record_response(record: &PaymentRecord) -> Result<Self, MessageError> {
        let (entrance_road, entrance_tollbooth) = split_tollbooth_id(&record.entrance_tollbooth_id)?;
        let (exit_road, exit_tollbooth) = split_tollbooth_id(&record.exit_tollbooth_id)?;

        let exit_date = record.exit_date.with_timezone(&PaymentRecord::device_offset()?);
        if !(0..=9999).contains(&exit_date.year()) {
            return Err(MessageError::UnencodableField {
                field: "exit date",
                value: record.exit_date.to_rfc3339(),
            });
        }

        let payload = format!(
            "{prefix}{entrance_road}{entrance_tollbooth}{prefix}{exit_road}{exit_tollbooth}{date}{class:03}{amount}",
            prefix = TOLLBOOTH_FIELD_PREFIX,
            date = exit_date.format("%Y%m%d%H%M%S"),
            class = record.vehicle_classification.code(),
            amount = encode_amount(i64::from(record.amount))?,
        );
        Self::mock(DeviceMessageKind::PaymentRecordResponse, payload.as_bytes())
    }

    /// Build the payment notification announcing `amount`.
    pub fn payment_notification(amount: i64) -> Result<Self, MessageError> {
        Self::mock(DeviceMessageKind::PaymentNotification, encode_amount(amount)?.as_bytes())
    }
}

/// Right-aligned, space-padded amount field.
fn encode_amount(amount: i64) -> Result<String, MessageError> {
    if !(0..=MAX_AMOUNT).contains(&amount) {
        return Err(MessageError::UnencodableField {
            field: "amount",
            value: amount.to_string(),
        });
    }
    Ok(format!("{:>6}", amount))
}

/// Split `"RR-TTT"` into its road and tollbooth parts.
fn split_tollbooth_id(id: &str) -> Result<(&str, &str), MessageError> {
    let unencodable = || MessageError::UnencodableField {
        field: "tollbooth id",
        value: id.to_string(),
    };

    let (road, tollbooth) = id.split_once('-').ok_or_else(unencodable)?;
    let is_field = |part: &str, width: usize| {
        part.len() == width && part.bytes().all(|byte| byte.is_ascii_alphanumeric())
    };
    if !is_field(road, 2) || !is_field(tollbooth, 3) {
        return Err(unencodable());
    }
    Ok((road, tollbooth))
}

impl fmt::Debug for DeviceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(data: {})", self.kind, hex::encode_upper(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn test_checksum_golden_vectors() {
        // C2 + 30 = F2
        assert_eq!(&checksum(&[0x01, 0xC2, b'0']), b"F2");
        // C6 + 47 = 10D
        assert_eq!(&checksum(&[0x01, 0xC6, b'G']), b"0D");
        // First byte never counts
        assert_eq!(&checksum(&[0xFF, 0x01]), b"01");
        assert_eq!(&checksum(&[0x02, 0xC0]), b"C0");
        // 0x80 + 0x80 = 256
        assert_eq!(&checksum(&[0x00, 0x80, 0x80]), b"00");
        // 0x80 + 0x81 = 257
        assert_eq!(&checksum(&[0x00, 0x80, 0x81]), b"01");
        assert_eq!(&checksum(&[0x01]), b"00");
    }

    #[test]
    fn test_client_message_encoding() {
        assert_eq!(ClientMessage::HandshakeRequest.encode(), vec![0xFA, 0x0D]);
        assert_eq!(
            ClientMessage::Acknowledgement.encode(),
            vec![0x02, 0xC0, b'C', b'0', 0x0D]
        );
        assert_eq!(
            ClientMessage::CardExistenceRequest.encode(),
            vec![0x01, 0xC6, b'G', b'0', b'D', 0x0D]
        );
        // C6 + 4C = 112
        assert_eq!(
            ClientMessage::InitialPaymentRecordRequest.encode(),
            vec![0x01, 0xC6, b'L', b'1', b'2', 0x0D]
        );
    }

    #[test]
    fn test_client_message_from_bytes() {
        for message in CLIENT_MESSAGES {
            assert_eq!(ClientMessage::from_bytes(&message.encode()), Some(message));
        }
        assert_eq!(ClientMessage::from_bytes(&[0xFA]), None);
        assert_eq!(ClientMessage::from_bytes(&[]), None);
    }

    #[test]
    fn test_request_answers() {
        assert!(ClientMessage::CardExistenceRequest
            .is_answered_by(DeviceMessageKind::CardNonExistenceResponse));
        assert!(ClientMessage::NextPaymentRecordRequest
            .is_answered_by(DeviceMessageKind::PaymentRecordResponse));
        assert!(!ClientMessage::NextPaymentRecordRequest
            .is_answered_by(DeviceMessageKind::Heartbeat));
        assert!(!ClientMessage::HandshakeRequest
            .is_answered_by(DeviceMessageKind::HandshakeAcknowledgement));
    }

    #[test]
    fn test_requires_preliminary_handshake() {
        assert!(!ClientMessage::HandshakeRequest.requires_preliminary_handshake());
        assert!(!ClientMessage::Acknowledgement.requires_preliminary_handshake());
        assert!(ClientMessage::CardExistenceRequest.requires_preliminary_handshake());
        assert!(ClientMessage::NextPaymentRecordRequest.requires_preliminary_handshake());
        assert!(ClientMessage::UniqueCardDataRequest.requires_preliminary_handshake());
    }

    #[test]
    fn test_mock_messages() {
        let ack = DeviceMessage::signal(DeviceMessageKind::HandshakeAcknowledgement).unwrap();
        assert_eq!(ack.bytes(), &[0xF0, 0x0D]);
        assert!(!ack.requires_acknowledgement());

        let request = DeviceMessage::signal(DeviceMessageKind::HandshakeRequest).unwrap();
        assert_eq!(request.bytes(), &[0x01, 0xC2, 0x30, 0x46, 0x32, 0x0D]);
        assert!(request.requires_acknowledgement());
        assert!(request.has_valid_checksum());
    }

    #[test]
    fn test_mock_rejects_wrong_payload_length() {
        let result = DeviceMessage::mock(DeviceMessageKind::DeviceNameResponse, b"short");
        assert!(matches!(
            result,
            Err(MessageError::PayloadLength {
                expected: 8,
                actual: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_catalog_headers_are_prefix_distinct() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in CATALOG.iter().skip(i + 1) {
                assert!(
                    !a.header().starts_with(b.header()) && !b.header().starts_with(a.header()),
                    "{:?} and {:?} overlap",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_matches_requires_full_length() {
        let kind = DeviceMessageKind::PaymentNotification;
        let message = DeviceMessage::mock(kind, b"   470").unwrap();
        assert!(kind.matches(message.bytes()));
        assert!(!kind.matches(&message.bytes()[..message.bytes().len() - 1]));
        assert!(kind.could_match(&message.bytes()[..1]));
        assert!(!DeviceMessageKind::Heartbeat.matches(message.bytes()));
    }

    #[test]
    fn test_payload_extraction() {
        let message = DeviceMessage::mock(DeviceMessageKind::DeviceNameResponse, b"ETC-0042").unwrap();
        assert_eq!(message.device_name().unwrap(), "ETC-0042");
        assert_eq!(message.extract_integer(Some(4..=7)).unwrap(), 42);
        assert_eq!(
            message.extract_integer(Some(0..=2)),
            Err(MessageError::UnparsableInteger)
        );
        assert!(matches!(
            message.extract_string(Some(6..=9)),
            Err(MessageError::OutOfRange { .. })
        ));

        let binary = DeviceMessage::mock(DeviceMessageKind::DeviceNameResponse, &[0xFF; 8]).unwrap();
        assert_eq!(binary.device_name(), Err(MessageError::UnparsableString));
    }

    #[test]
    fn test_notified_amount() {
        let message = DeviceMessage::mock(DeviceMessageKind::PaymentNotification, b"  1840").unwrap();
        assert_eq!(message.notified_amount().unwrap(), 1840);
    }

    #[test]
    fn test_payment_record_decoding() {
        let message = DeviceMessage::mock(
            DeviceMessageKind::PaymentRecordResponse,
            b"01031210701031204920190604184534001   470",
        )
        .unwrap();

        let record = message.payment_record().unwrap();
        assert_eq!(record.amount, 470);
        assert_eq!(record.entrance_tollbooth_id, "12-107");
        assert_eq!(record.exit_tollbooth_id, "12-049");
        assert_eq!(record.vehicle_classification, VehicleClassification::Standard);
        assert_eq!(record.exit_date.to_rfc3339(), "2019-06-04T18:45:34+09:00");
        assert_eq!(record.entrance_date, None);
    }

    #[test]
    fn test_payment_record_with_unknown_vehicle_classification() {
        let message = DeviceMessage::mock(
            DeviceMessageKind::PaymentRecordResponse,
            b"01031210701031204920190604184534009   470",
        )
        .unwrap();

        assert_eq!(
            message.payment_record(),
            Err(MessageError::UnknownVehicleClassification(9))
        );
    }

    #[test]
    fn test_payment_record_with_invalid_date() {
        let message = DeviceMessage::mock(
            DeviceMessageKind::PaymentRecordResponse,
            b"01031210701031204920191304184534001   470",
        )
        .unwrap();

        assert_eq!(message.payment_record(), Err(MessageError::InvalidDate));
    }

    #[test]
    fn test_debug_format_is_hex() {
        let message = DeviceMessage::signal(DeviceMessageKind::Heartbeat).unwrap();
        assert_eq!(format!("{:?}", message), "Heartbeat(data: 550D)");
    }

    fn base_record() -> PaymentRecord {
        PaymentRecord {
            amount: 2120,
            entrance_date: None,
            exit_date: PaymentRecord::exit_date_from_components(2019, 5, 31, 17, 12, 26).unwrap(),
            entrance_tollbooth_id: "08-028".to_string(),
            exit_tollbooth_id: "08-054".to_string(),
            vehicle_classification: VehicleClassification::Standard,
        }
    }

    fn reencode(record: &PaymentRecord) -> PaymentRecord {
        let message = DeviceMessage::payment_record_response(record).unwrap();
        assert!(message.has_valid_checksum());
        message.payment_record().unwrap()
    }

    #[test]
    fn test_payment_record_encoding_matches_device_layout() {
        let message = DeviceMessage::payment_record_response(&base_record()).unwrap();
        assert_eq!(message.payload_bytes(), b"01000802801000805420190531171226001  2120");
    }

    #[test]
    fn test_payment_record_field_ranges() {
        for classification in [
            VehicleClassification::Light,
            VehicleClassification::Standard,
            VehicleClassification::MidSize,
            VehicleClassification::Oversized,
            VehicleClassification::ExtraLarge,
        ] {
            let record = PaymentRecord {
                vehicle_classification: classification,
                ..base_record()
            };
            assert_eq!(reencode(&record), record);
        }

        for amount in [0, 1, 99, 470, 10_000, 999_999] {
            let record = PaymentRecord {
                amount,
                ..base_record()
            };
            assert_eq!(reencode(&record), record);
        }

        for (entrance, exit) in [("00-000", "99-999"), ("01-107", "12-049"), ("90-405", "90-320")] {
            let record = PaymentRecord {
                entrance_tollbooth_id: entrance.to_string(),
                exit_tollbooth_id: exit.to_string(),
                ..base_record()
            };
            assert_eq!(reencode(&record), record);
        }

        for (year, month, day, hour, minute, second) in [
            (2000, 1, 1, 0, 0, 0),
            (2019, 12, 31, 23, 59, 59),
            (2020, 2, 29, 12, 30, 5),
            (9999, 12, 31, 23, 59, 59),
        ] {
            let record = PaymentRecord {
                exit_date: PaymentRecord::exit_date_from_components(year, month, day, hour, minute, second)
                    .unwrap(),
                ..base_record()
            };
            assert_eq!(reencode(&record), record);
        }
    }

    #[test]
    fn test_payment_record_dates_are_written_in_device_time() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let record = PaymentRecord {
            // 2019-05-31 23:30 UTC is 2019-06-01 08:30 in Japan
            exit_date: utc.with_ymd_and_hms(2019, 5, 31, 23, 30, 0).unwrap(),
            ..base_record()
        };

        let message = DeviceMessage::payment_record_response(&record).unwrap();
        assert_eq!(message.extract_string(Some(18..=31)).unwrap(), "20190601083000");
        assert_eq!(message.payment_record().unwrap(), record);
    }

    #[test]
    fn test_unencodable_payment_records() {
        for amount in [-1, 1_000_000] {
            let record = PaymentRecord {
                amount,
                ..base_record()
            };
            assert!(matches!(
                DeviceMessage::payment_record_response(&record),
                Err(MessageError::UnencodableField { field: "amount", .. })
            ));
        }

        for id in ["8-028", "08028", "08-0288", "08-02 ", ""] {
            let record = PaymentRecord {
                exit_tollbooth_id: id.to_string(),
                ..base_record()
            };
            assert!(matches!(
                DeviceMessage::payment_record_response(&record),
                Err(MessageError::UnencodableField { field: "tollbooth id", .. })
            ));
        }
    }

    #[test]
    fn test_payment_notification_amounts() {
        for amount in [0, 7, 470, 2120, 999_999] {
            let message = DeviceMessage::payment_notification(amount).unwrap();
            assert_eq!(message.payload_bytes().len(), 6);
            assert_eq!(message.notified_amount().unwrap(), amount);
        }
        assert_eq!(DeviceMessage::payment_notification(470).unwrap().payload_bytes(), b"   470");
        assert!(DeviceMessage::payment_notification(MAX_AMOUNT + 1).is_err());
        assert!(DeviceMessage::payment_notification(-5).is_err());
    }

    #[test]
    fn test_short_data_does_not_panic() {
        let message = DeviceMessage::new(DeviceMessageKind::PaymentRecordResponse, vec![0x02, 0xE5]);
        assert!(message.payload_bytes().is_empty());
        assert!(message.terminal_bytes().is_empty());
        assert!(!message.has_valid_checksum());
        assert!(message.payment_record().is_err());
    }
}
