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

//! Test doubles shared by the protocol tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::protocol::ClientMessage;
use crate::bluetooth::{SerialPort, TransportError};

/// Serial port recording every client message it transmits.
pub struct RecordingPort {
    sent: Mutex<Vec<ClientMessage>>,
    sent_tx: mpsc::UnboundedSender<ClientMessage>,
    available: AtomicBool,
    fail_next: Mutex<Option<ClientMessage>>,
}

impl RecordingPort {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let port = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            sent_tx,
            available: AtomicBool::new(true),
            fail_next: Mutex::new(None),
        });
        (port, sent_rx)
    }

    pub fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next transmission of `message` once.
    pub fn fail_next(&self, message: ClientMessage) {
        *self.fail_next.lock() = Some(message);
    }
}

#[async_trait]
impl SerialPort for RecordingPort {
    fn name(&self) -> String {
        "recording port".to_string()
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn transmit(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_available() {
            return Err(TransportError::NotAvailable);
        }

        let message = ClientMessage::from_bytes(data)
            .unwrap_or_else(|| panic!("unexpected bytes: {}", hex::encode_upper(data)));

        {
            let mut fail_next = self.fail_next.lock();
            if *fail_next == Some(message) {
                *fail_next = None;
                return Err(TransportError::NotAvailable);
            }
        }

        self.sent.lock().push(message);
        let _ = self.sent_tx.send(message);
        Ok(())
    }
}
