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

//! Handshake and acknowledgement protocol on top of a serial port.
//!
//! The unit only answers framed requests after a handshake: the client sends
//! `FA 0D`, the unit acknowledges and sends its own handshake request, and the
//! client's acknowledgement of that request completes the handshake. A
//! heartbeat while no handshake is in progress starts one. Inserting a card
//! resets the unit, so the handshake has to be redone.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::decoder::MessageDecoder;
use super::protocol::{ClientMessage, DeviceMessage, DeviceMessageKind};
use crate::bluetooth::{SerialPort, TransportError};

/// Default time to wait for the unit to answer a handshake request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("{0:?} cannot be sent before the handshake completes")]
    HandshakeIncomplete(ClientMessage),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Progress of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Incomplete,
    Trying,
    Complete,
}

/// Events produced while handling received data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The first handshake of this connection completed.
    Established,
    /// A handshake completed (including the first one).
    HandshakeCompleted,
    /// A catalog message was received.
    MessageReceived(DeviceMessage),
}

/// Protocol state of one serial port.
pub struct DeviceConnection {
    port: Arc<dyn SerialPort>,
    decoder: MessageDecoder,
    handshake_state: HandshakeState,
    handshake_timeout: Duration,
    handshake_deadline: Option<Instant>,
    has_completed_handshake: bool,
    pending_messages: VecDeque<ClientMessage>,
}

impl DeviceConnection {
    /// Create a new connection.
    pub fn new(port: Arc<dyn SerialPort>, handshake_timeout: Duration) -> Self {
        Self {
            port,
            decoder: MessageDecoder::new(),
            handshake_state: HandshakeState::Incomplete,
            handshake_timeout,
            handshake_deadline: None,
            has_completed_handshake: false,
            pending_messages: VecDeque::new(),
        }
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake_state
    }

    /// Whether the unit currently accepts framed requests.
    pub fn is_established(&self) -> bool {
        self.handshake_state == HandshakeState::Complete
    }

    pub fn is_available(&self) -> bool {
        self.port.is_available()
    }

    /// When the pending handshake attempt expires.
    pub fn handshake_deadline(&self) -> Option<Instant> {
        self.handshake_deadline
    }

    /// Number of messages waiting for the handshake.
    pub fn pending_count(&self) -> usize {
        self.pending_messages.len()
    }

    /// Start the first handshake.
    pub async fn start(&mut self) -> Result<(), ConnectionError> {
        info!("Starting connection on {}", self.port.name());
        self.start_handshake().await
    }

    async fn start_handshake(&mut self) -> Result<(), ConnectionError> {
        debug!("Sending handshake request");
        self.handshake_state = HandshakeState::Trying;
        self.handshake_deadline = Some(Instant::now() + self.handshake_timeout);
        self.transmit(ClientMessage::HandshakeRequest).await
    }

    /// Give up on the pending handshake attempt.
    ///
    /// The next heartbeat starts a new attempt.
    pub fn handle_handshake_timeout(&mut self) {
        self.handshake_deadline = None;
        if self.handshake_state == HandshakeState::Trying {
            info!("Handshake timed out");
            self.handshake_state = HandshakeState::Incomplete;
        }
    }

    /// Send a message now.
    ///
    /// Framed requests fail with [`ConnectionError::HandshakeIncomplete`]
    /// until the handshake completes.
    pub async fn send(&mut self, message: ClientMessage) -> Result<(), ConnectionError> {
        if message.requires_preliminary_handshake() && !self.is_established() {
            return Err(ConnectionError::HandshakeIncomplete(message));
        }
        self.transmit(message).await
    }

    /// Send a message now, or once the handshake completes.
    pub async fn send_when_ready(&mut self, message: ClientMessage) -> Result<(), ConnectionError> {
        if message.requires_preliminary_handshake() && !self.is_established() {
            debug!("Queueing {:?} until handshake completes", message);
            self.pending_messages.push_back(message);
            return Ok(());
        }
        self.transmit(message).await
    }

    async fn transmit(&self, message: ClientMessage) -> Result<(), ConnectionError> {
        debug!("Sending {:?}", message);
        self.port.transmit(&message.encode()).await?;
        Ok(())
    }

    /// Feed received bytes and return what happened.
    ///
    /// Transmit failures are logged. Every decoded message is still
    /// forwarded, and queued messages stay queued until they go out.
    pub async fn handle_received_data(&mut self, data: &[u8]) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        for message in self.decoder.process_chunk(data) {
            self.handle_received_message(message, &mut events).await;
        }

        if self.is_established() && !self.pending_messages.is_empty() {
            self.flush_pending_messages().await;
        }

        events
    }

    async fn handle_received_message(&mut self, message: DeviceMessage, events: &mut Vec<ConnectionEvent>) {
        debug!("Received {:?}", message);

        if !message.has_valid_checksum() {
            warn!("Checksum mismatch in {:?}", message);
        }

        match message.kind() {
            DeviceMessageKind::Heartbeat => {
                if self.handshake_state == HandshakeState::Incomplete {
                    if let Err(e) = self.start_handshake().await {
                        error!("Failed to start handshake: {}", e);
                    }
                }
            }
            DeviceMessageKind::CardInsertionNotification => {
                info!("Card inserted, handshake needs to be redone");
                self.handshake_state = HandshakeState::Incomplete;
                self.handshake_deadline = None;
            }
            _ => {}
        }

        if message.requires_acknowledgement() {
            match self.transmit(ClientMessage::Acknowledgement).await {
                // The unit only counts the handshake once it got the ack
                Ok(()) => {
                    if message.kind() == DeviceMessageKind::HandshakeRequest
                        && self.handshake_state != HandshakeState::Complete
                    {
                        self.complete_handshake(events);
                    }
                }
                Err(e) => error!("Failed to acknowledge {:?}: {}", message.kind(), e),
            }
        }

        if message.kind() != DeviceMessageKind::Unknown {
            events.push(ConnectionEvent::MessageReceived(message));
        }
    }

    fn complete_handshake(&mut self, events: &mut Vec<ConnectionEvent>) {
        info!("Handshake completed");
        self.handshake_state = HandshakeState::Complete;
        self.handshake_deadline = None;

        events.push(ConnectionEvent::HandshakeCompleted);
        if !self.has_completed_handshake {
            self.has_completed_handshake = true;
            events.push(ConnectionEvent::Established);
        }
    }

    async fn flush_pending_messages(&mut self) {
        while let Some(message) = self.pending_messages.pop_front() {
            if let Err(e) = self.transmit(message).await {
                warn!("Failed to send queued {:?}, retrying later: {}", message, e);
                self.pending_messages.push_front(message);
                break;
            }
        }
    }
}
