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

//! Simulated onboard unit for running without hardware.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ble_constants::RECEIVE_QUEUE_CAPACITY;
use super::serial_port::{SerialLink, SerialPort, TransportError};
use crate::etc::protocol::{ClientMessage, DeviceMessage, DeviceMessageKind, MessageError};
use crate::etc::PaymentRecord;

/// Payment log of the simulated unit, newest first.
pub const SAMPLE_PAYMENT_RECORDS: [&str; 28] = [
    "01031210701031204920190604184534001   470",
    "01031275301031206920190531175618001   840",
    "01031291501031291920190531172428001   300",
    "01080302801080305420190531171226001  2120",
    "01080305401080303120190530124006001  1840",
    "01080305401080305420190530113434001   800",
    "01031284601031287720190530112428001   930",
    "01082110101082110120190530104452001   320",
    "01031282701031282820190530104048001   930",
    "01082010201082010620190530102156001   330",
    "01031216301031209320190520160158001   450",
    "01090405801090320620190518202424001   830",
    "01090144601090140620190518182324001  2170",
    "01090146601090141920190518123104001  2670",
    "01090480501090483420190512175402001   870",
    "01090110301090483420190512113714001  1840",
    "01031292301031243720190505210458001   300",
    "01080303101080305420190505203032001  2090",
    "01080305401080302820190505151724001   930",
    "01080305401080305420190505145258001   800",
    "01031274701031288020190505143152001   340",
    "01031229701031240120190504212918001   830",
    "01031210701031229920190504205558001   770",
    "01031290301031274820190502220230001   700",
    "01031282701031279920190502195312001   360",
    "01082000401082010620190502194656001   190",
    "01031209501031201020190429141246001   560",
    "01031215501031209320190429122852001   360",
];

/// Unique card data of the card inserted at start.
pub const SAMPLE_CARD_DATA: &[u8; 24] = b"SIMULATED-ETC-CARD-00001";

const DEVICE_NAME: &[u8; 8] = b"SIM-ETC1";
const HEARTBEAT_COUNT: usize = 5;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

struct SimulatedDevice {
    card_data: Option<Vec<u8>>,
    records: Vec<String>,
    /// Position of the next record to report; `None` until the log is opened.
    cursor: Option<usize>,
}

/// Serial port answering like a real onboard unit.
pub struct MockSerialPort {
    device: Mutex<SimulatedDevice>,
    incoming_tx: mpsc::Sender<Vec<u8>>,
}

impl MockSerialPort {
    /// Open with the sample payment log and a card inserted.
    pub fn open() -> (Arc<Self>, SerialLink) {
        let records = SAMPLE_PAYMENT_RECORDS.iter().map(|r| r.to_string()).collect();
        Self::with_records(records)
    }

    /// Open with the given payment log (newest first) and a card inserted.
    pub fn with_records(records: Vec<String>) -> (Arc<Self>, SerialLink) {
        let (incoming_tx, incoming) = mpsc::channel(RECEIVE_QUEUE_CAPACITY);

        let port = Arc::new(Self {
            device: Mutex::new(SimulatedDevice {
                card_data: Some(SAMPLE_CARD_DATA.to_vec()),
                records,
                cursor: None,
            }),
            incoming_tx,
        });

        let link = SerialLink {
            port: port.clone(),
            incoming,
        };

        (port, link)
    }

    /// Send heartbeats the way a freshly powered unit does.
    pub fn start_heartbeats(self: &Arc<Self>) {
        let port = Arc::downgrade(self);
        tokio::spawn(async move {
            for beat in 0..HEARTBEAT_COUNT {
                if beat > 0 {
                    tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                }
                let Some(port) = port.upgrade() else {
                    break;
                };
                port.notify(DeviceMessageKind::Heartbeat);
            }
        });
    }

    /// Insert a card and announce it.
    pub fn insert_card(&self, card_data: &[u8]) {
        self.device.lock().card_data = Some(card_data.to_vec());
        self.notify(DeviceMessageKind::CardInsertionNotification);
    }

    /// Remove the card and announce it.
    pub fn eject_card(&self) {
        self.device.lock().card_data = None;
        self.notify(DeviceMessageKind::CardEjectionNotification);
    }

    /// Log a new payment and announce it.
    pub fn record_payment(&self, record: &PaymentRecord) -> Result<(), MessageError> {
        let response = DeviceMessage::payment_record_response(record)?;
        let notification = DeviceMessage::payment_notification(i64::from(record.amount))?;
        let payload = std::str::from_utf8(response.payload_bytes()).map_err(|_| MessageError::UnparsableString)?;

        {
            let mut device = self.device.lock();
            device.records.insert(0, payload.to_string());
            device.cursor = None;
        }

        self.deliver(notification);
        Ok(())
    }

    /// Deliver a payload-less message.
    pub fn notify(&self, kind: DeviceMessageKind) {
        match DeviceMessage::signal(kind) {
            Ok(message) => self.deliver(message),
            Err(e) => warn!("Cannot simulate {:?}: {}", kind, e),
        }
    }

    fn deliver(&self, message: DeviceMessage) {
        debug!("Simulating {:?}", message);
        if let Err(e) = self.incoming_tx.try_send(message.bytes().to_vec()) {
            warn!("Dropped simulated message: {}", e);
        }
    }

    fn respond(&self, request: ClientMessage) -> Result<Vec<DeviceMessage>, MessageError> {
        use DeviceMessageKind as Kind;

        let mut device = self.device.lock();
        let cursor = device.cursor;

        let responses = match request {
            ClientMessage::HandshakeRequest => vec![
                DeviceMessage::signal(Kind::HandshakeAcknowledgement)?,
                DeviceMessage::signal(Kind::HandshakeRequest)?,
            ],
            ClientMessage::Acknowledgement => Vec::new(),
            ClientMessage::CardExistenceRequest => match device.card_data {
                Some(_) => vec![DeviceMessage::signal(Kind::CardExistenceResponse)?],
                None => vec![DeviceMessage::signal(Kind::CardNonExistenceResponse)?],
            },
            ClientMessage::UniqueCardDataRequest => match &device.card_data {
                Some(data) => vec![DeviceMessage::mock(Kind::UniqueCardDataResponse, data)?],
                None => vec![DeviceMessage::signal(Kind::CardNonExistenceResponse)?],
            },
            ClientMessage::DeviceNameRequest => {
                vec![DeviceMessage::mock(Kind::DeviceNameResponse, DEVICE_NAME)?]
            }
            ClientMessage::InitialPaymentRecordRequest => match cursor {
                None if device.records.is_empty() => {
                    vec![DeviceMessage::signal(Kind::InitialPaymentRecordNonExistenceResponse)?]
                }
                None => {
                    device.cursor = Some(0);
                    vec![DeviceMessage::signal(Kind::InitialPaymentRecordExistenceResponse)?]
                }
                Some(_) => device.next_record()?.into_iter().collect(),
            },
            ClientMessage::NextPaymentRecordRequest => match device.next_record()? {
                Some(record) => vec![record],
                None => {
                    device.cursor = None;
                    vec![DeviceMessage::signal(Kind::NextPaymentRecordNonExistenceResponse)?]
                }
            },
        };

        Ok(responses)
    }
}

impl SimulatedDevice {
    fn next_record(&mut self) -> Result<Option<DeviceMessage>, MessageError> {
        let Some(position) = self.cursor else {
            return Ok(None);
        };
        let Some(payload) = self.records.get(position) else {
            return Ok(None);
        };

        let message = DeviceMessage::mock(DeviceMessageKind::PaymentRecordResponse, payload.as_bytes())?;
        self.cursor = Some(position + 1);
        Ok(Some(message))
    }
}

#[async_trait]
impl SerialPort for MockSerialPort {
    fn name(&self) -> String {
        "simulated ETC unit".to_string()
    }

    fn is_available(&self) -> bool {
        !self.incoming_tx.is_closed()
    }

    async fn transmit(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_available() {
            return Err(TransportError::NotAvailable);
        }

        let Some(request) = ClientMessage::from_bytes(data) else {
            info!("Simulated unit ignores {}", hex::encode_upper(data));
            return Ok(());
        };

        match self.respond(request) {
            Ok(responses) => {
                for response in responses {
                    self.deliver(response);
                }
            }
            Err(e) => warn!("Simulated unit failed to answer {:?}: {}", request, e),
        }
        Ok(())
    }
}
