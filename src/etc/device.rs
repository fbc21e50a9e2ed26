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

//! Runs a session for every serial port the manager finds.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::session::{DeviceEvent, DeviceSession, SessionConfig};
use crate::bluetooth::SerialPortEvent;
use crate::storage::PaymentStore;

/// The ETC unit as seen by the application.
pub struct EtcDevice {
    store: Arc<dyn PaymentStore>,
    event_tx: mpsc::Sender<DeviceEvent>,
    config: SessionConfig,
    session: Option<JoinHandle<()>>,
}

impl EtcDevice {
    pub fn new(store: Arc<dyn PaymentStore>, event_tx: mpsc::Sender<DeviceEvent>, config: SessionConfig) -> Self {
        Self {
            store,
            event_tx,
            config,
            session: None,
        }
    }

    /// Handle serial port events until the manager goes away.
    pub async fn run(mut self, mut ports: mpsc::Receiver<SerialPortEvent>) {
        while let Some(event) = ports.recv().await {
            match event {
                SerialPortEvent::Found(link) => {
                    info!("Starting session on {}", link.port.name());
                    self.stop_session();

                    let session = DeviceSession::new(
                        link.port,
                        self.store.clone(),
                        self.event_tx.clone(),
                        self.config,
                    );
                    self.session = Some(tokio::spawn(session.run(link.incoming)));
                }
                SerialPortEvent::Lost => {
                    info!("Serial port lost");
                    self.stop_session();
                    let _ = self.event_tx.send(DeviceEvent::AvailabilityChanged(false)).await;
                }
            }
        }

        self.stop_session();
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort();
        }
    }
}
