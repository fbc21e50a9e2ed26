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

//! Session with one ETC unit.
//!
//! Once the handshake is done the session identifies the inserted card and
//! walks the unit's payment log from the newest record, saving each one,
//! until it reaches a record that is already saved or the end of the log.
//! Payment notifications restart the walk so new payments are picked up
//! right away.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionError, ConnectionEvent, DeviceConnection, DEFAULT_HANDSHAKE_TIMEOUT};
use super::payment::{CardIdentity, PaymentRecord};
use super::protocol::{ClientMessage, DeviceMessage, DeviceMessageKind};
use super::request::RequestTracker;
use crate::bluetooth::SerialPort;
use crate::storage::{InsertOutcome, PaymentStore};

/// Default window after a payment notification in which a fetched record
/// counts as the announced payment.
pub const DEFAULT_PAYMENT_ALERT_WINDOW: Duration = Duration::from_secs(3);

/// Session settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub payment_alert_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            payment_alert_window: DEFAULT_PAYMENT_ALERT_WINDOW,
        }
    }
}

/// Which way a tollgate was passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDirection {
    Entrance,
    Exit,
}

/// Events reported to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The unit is ready (`true`) or gone (`false`).
    AvailabilityChanged(bool),
    HandshakeCompleted,
    CardInserted(CardIdentity),
    CardEjected,
    /// A payment record was saved. `alertable` is set for the payment the
    /// unit just announced.
    PaymentCaptured {
        record: PaymentRecord,
        alertable: bool,
    },
    GatePassed(GateDirection),
    DeviceNameReceived(String),
}

/// Completion of a spawned store operation.
enum PersistenceOutcome {
    CardReady(CardIdentity),
    CardFailed(CardIdentity, String),
    PaymentSaved {
        record: PaymentRecord,
        alertable: bool,
        outcome: InsertOutcome,
    },
    PaymentFailed {
        record: PaymentRecord,
        alertable: bool,
        error: String,
    },
}

/// Drives one connection to the unit.
pub struct DeviceSession {
    connection: DeviceConnection,
    store: Arc<dyn PaymentStore>,
    event_tx: mpsc::Sender<DeviceEvent>,
    current_card: Option<CardIdentity>,
    last_payment_notification: Option<Instant>,
    payment_alert_window: Duration,
    requests: RequestTracker,
    device_name_requested: bool,
    persistence_tx: mpsc::Sender<PersistenceOutcome>,
    persistence_rx: mpsc::Receiver<PersistenceOutcome>,
}

impl DeviceSession {
    /// Create a new session.
    pub fn new(
        port: Arc<dyn SerialPort>,
        store: Arc<dyn PaymentStore>,
        event_tx: mpsc::Sender<DeviceEvent>,
        config: SessionConfig,
    ) -> Self {
        let (persistence_tx, persistence_rx) = mpsc::channel(16);

        Self {
            connection: DeviceConnection::new(port, config.handshake_timeout),
            store,
            event_tx,
            current_card: None,
            last_payment_notification: None,
            payment_alert_window: config.payment_alert_window,
            requests: RequestTracker::new(),
            device_name_requested: false,
            persistence_tx,
            persistence_rx,
        }
    }

    /// Run until the serial port stops delivering data.
    pub async fn run(mut self, mut incoming: mpsc::Receiver<Vec<u8>>) {
        info!("Session started");

        if let Err(e) = self.connection.start().await {
            warn!("Failed to start handshake: {}", e);
        }

        loop {
            let deadline = self.connection.handshake_deadline();

            tokio::select! {
                data = incoming.recv() => match data {
                    Some(data) => self.handle_received_data(&data).await,
                    None => break,
                },
                Some(outcome) = self.persistence_rx.recv() => {
                    self.handle_persistence_outcome(outcome).await;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.connection.handle_handshake_timeout();
                }
            }
        }

        self.current_card = None;
        info!("Session ended");
    }

    /// Emit an event.
    async fn emit(&self, event: DeviceEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn handle_received_data(&mut self, data: &[u8]) {
        for event in self.connection.handle_received_data(data).await {
            self.handle_connection_event(event).await;
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Established => {
                self.emit(DeviceEvent::AvailabilityChanged(true)).await;
                self.request(ClientMessage::CardExistenceRequest).await;
            }
            ConnectionEvent::HandshakeCompleted => {
                self.emit(DeviceEvent::HandshakeCompleted).await;
            }
            ConnectionEvent::MessageReceived(message) => {
                self.handle_message(message).await;
            }
        }
    }

    async fn handle_message(&mut self, message: DeviceMessage) {
        if let Some(request) = self.requests.resolve(message.kind()) {
            debug!(
                "{:?} answered {:?} after {:?}",
                message.kind(),
                request.message,
                request.issued_at.elapsed()
            );
        }

        match message.kind() {
            DeviceMessageKind::CardExistenceResponse => {
                self.request(ClientMessage::UniqueCardDataRequest).await;
            }
            DeviceMessageKind::UniqueCardDataResponse => {
                self.handle_unique_card_data(&message);
            }
            DeviceMessageKind::CardNonExistenceResponse => {
                info!("No card inserted");
                self.clear_card().await;
                self.on_idle().await;
            }
            DeviceMessageKind::InitialPaymentRecordExistenceResponse => {
                self.request(ClientMessage::InitialPaymentRecordRequest).await;
            }
            DeviceMessageKind::InitialPaymentRecordNonExistenceResponse
            | DeviceMessageKind::NextPaymentRecordNonExistenceResponse => {
                info!("Reached the end of the payment log");
                self.on_idle().await;
            }
            DeviceMessageKind::PaymentRecordResponse => {
                self.handle_payment_record(&message).await;
            }
            DeviceMessageKind::GateEntranceNotification => {
                info!("Passed entrance tollgate");
                self.emit(DeviceEvent::GatePassed(GateDirection::Entrance)).await;
            }
            DeviceMessageKind::GateExitNotification => {
                info!("Passed exit tollgate");
                self.emit(DeviceEvent::GatePassed(GateDirection::Exit)).await;
            }
            DeviceMessageKind::PaymentNotification => {
                match message.notified_amount() {
                    Ok(amount) => info!("Payment notification: {} yen", amount),
                    Err(e) => warn!("Payment notification without amount: {}", e),
                }
                self.last_payment_notification = Some(Instant::now());
                self.request(ClientMessage::InitialPaymentRecordRequest).await;
            }
            DeviceMessageKind::CardInsertionNotification => {
                info!("Card inserted");
                self.request(ClientMessage::CardExistenceRequest).await;
            }
            DeviceMessageKind::CardEjectionNotification => {
                info!("Card ejected");
                self.clear_card().await;
            }
            DeviceMessageKind::DeviceNameResponse => match message.device_name() {
                Ok(name) => {
                    info!("Device name: {}", name);
                    self.emit(DeviceEvent::DeviceNameReceived(name)).await;
                }
                Err(e) => warn!("Unreadable device name: {}", e),
            },
            DeviceMessageKind::Heartbeat
            | DeviceMessageKind::HandshakeAcknowledgement
            | DeviceMessageKind::HandshakeRequest
            | DeviceMessageKind::Unknown => {}
        }
    }

    /// Send a request, deferring it until the handshake completes if needed.
    async fn request(&mut self, message: ClientMessage) {
        if let Some(superseded) = self.requests.begin(message) {
            warn!("{:?} superseded pending {:?}", message, superseded.message);
        }

        let result = match self.connection.send(message).await {
            Err(ConnectionError::HandshakeIncomplete(message)) => {
                debug!("Deferring {:?} until handshake completes", message);
                self.connection.send_when_ready(message).await
            }
            result => result,
        };

        if let Err(e) = result {
            error!("Failed to send {:?}: {}", message, e);
            self.requests.cancel();
        }
    }

    /// Ask for the device name once per session when nothing else is going on.
    async fn on_idle(&mut self) {
        if !self.device_name_requested {
            self.device_name_requested = true;
            self.request(ClientMessage::DeviceNameRequest).await;
        }
    }

    fn handle_unique_card_data(&self, message: &DeviceMessage) {
        let card = CardIdentity::from_card_data(message.payload_bytes());
        debug!("Card data {} identifies card {}", hex::encode_upper(message.payload_bytes()), card);

        let store = self.store.clone();
        let persistence_tx = self.persistence_tx.clone();
        tokio::spawn(async move {
            let outcome = match store.find_or_create_card(card).await {
                Ok(()) => PersistenceOutcome::CardReady(card),
                Err(e) => PersistenceOutcome::CardFailed(card, format!("{:#}", e)),
            };
            let _ = persistence_tx.send(outcome).await;
        });
    }

    async fn handle_payment_record(&mut self, message: &DeviceMessage) {
        let record = match message.payment_record() {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping payment record {:?}: {}", message, e);
                return;
            }
        };
        let alertable = self.take_payment_alert();

        let Some(card) = self.current_card else {
            warn!("Payment record received without a known card");
            if alertable {
                self.emit(DeviceEvent::PaymentCaptured { record, alertable }).await;
            }
            return;
        };

        let store = self.store.clone();
        let persistence_tx = self.persistence_tx.clone();
        tokio::spawn(async move {
            let outcome = match store.insert_if_absent(card, &record).await {
                Ok(outcome) => PersistenceOutcome::PaymentSaved {
                    record,
                    alertable,
                    outcome,
                },
                Err(e) => PersistenceOutcome::PaymentFailed {
                    record,
                    alertable,
                    error: format!("{:#}", e),
                },
            };
            let _ = persistence_tx.send(outcome).await;
        });
    }

    /// Whether a payment notification arrived within the alert window.
    /// The notification is consumed either way.
    fn take_payment_alert(&mut self) -> bool {
        match self.last_payment_notification.take() {
            Some(received_at) => received_at.elapsed() <= self.payment_alert_window,
            None => false,
        }
    }

    async fn handle_persistence_outcome(&mut self, outcome: PersistenceOutcome) {
        match outcome {
            PersistenceOutcome::CardReady(card) => {
                if self.current_card != Some(card) {
                    info!("Current card: {}", card);
                    self.current_card = Some(card);
                    self.emit(DeviceEvent::CardInserted(card)).await;
                }
                self.request(ClientMessage::InitialPaymentRecordRequest).await;
            }
            PersistenceOutcome::CardFailed(card, e) => {
                error!("Failed to store card {}: {}", card, e);
            }
            PersistenceOutcome::PaymentSaved {
                record,
                alertable,
                outcome: InsertOutcome::Inserted,
            } => {
                info!(
                    "Saved payment: {} yen at {} ({} -> {})",
                    record.amount, record.exit_date, record.entrance_tollbooth_id, record.exit_tollbooth_id
                );
                self.emit(DeviceEvent::PaymentCaptured { record, alertable }).await;
                self.request(ClientMessage::NextPaymentRecordRequest).await;
            }
            PersistenceOutcome::PaymentSaved {
                record,
                alertable,
                outcome: InsertOutcome::Duplicate,
            } => {
                info!("Payment log is up to date");
                if alertable {
                    self.emit(DeviceEvent::PaymentCaptured { record, alertable }).await;
                }
                self.on_idle().await;
            }
            PersistenceOutcome::PaymentFailed {
                record,
                alertable,
                error,
            } => {
                error!("Failed to save payment: {}", error);
                if alertable {
                    self.emit(DeviceEvent::PaymentCaptured { record, alertable }).await;
                }
            }
        }
    }

    async fn clear_card(&mut self) {
        if self.current_card.take().is_some() {
            self.emit(DeviceEvent::CardEjected).await;
        }
    }
}
