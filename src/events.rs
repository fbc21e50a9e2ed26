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

//! Event processing and user notifications.

use std::sync::Arc;
use tracing::{debug, info};

use crate::etc::{DeviceEvent, GateDirection, PaymentRecord};
use crate::state::AppState;

/// Process events from the ETC unit.
pub struct EventProcessor {
    state: Arc<AppState>,
}

impl EventProcessor {
    /// Create a new event processor.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Process a single event.
    pub fn process_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::AvailabilityChanged(true) => {
                self.state.set_connected();
                info!("ETC unit {}", self.state.get_status().as_str().to_lowercase());
            }
            DeviceEvent::AvailabilityChanged(false) => {
                self.state.set_disconnected();
                info!("ETC unit {}", self.state.get_status().as_str().to_lowercase());
            }
            DeviceEvent::HandshakeCompleted => {
                debug!("Handshake completed");
            }
            DeviceEvent::CardInserted(card) => {
                info!("Notification: ETC card inserted ({})", card);
                self.state.set_current_card(Some(card));
            }
            DeviceEvent::CardEjected => {
                info!("Notification: ETC card ejected");
                self.state.set_current_card(None);
            }
            DeviceEvent::PaymentCaptured { record, alertable } => {
                if alertable {
                    info!("Notification: {}", Self::describe_payment(&record));
                } else {
                    debug!("Payment saved: {}", Self::describe_payment(&record));
                }
                self.state.set_last_payment(record);
            }
            DeviceEvent::GatePassed(direction) => {
                let gate = match direction {
                    GateDirection::Entrance => "entrance",
                    GateDirection::Exit => "exit",
                };
                info!("Notification: passed {} tollgate", gate);
            }
            DeviceEvent::DeviceNameReceived(name) => {
                info!("ETC unit name: {}", name);
                self.state.set_device_name(name);
            }
        }
    }

    /// Human readable payment summary.
    pub fn describe_payment(record: &PaymentRecord) -> String {
        format!(
            "ETC payment {} yen ({} -> {}) at {}",
            record.amount,
            record.entrance_tollbooth_id,
            record.exit_tollbooth_id,
            record.exit_date.format("%Y-%m-%d %H:%M")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etc::{CardIdentity, VehicleClassification};
    use crate::state::ConnectionStatus;

    fn record() -> PaymentRecord {
        PaymentRecord {
            amount: 2120,
            entrance_date: None,
            exit_date: PaymentRecord::exit_date_from_components(2019, 5, 31, 17, 12, 26).unwrap(),
            entrance_tollbooth_id: "08-028".to_string(),
            exit_tollbooth_id: "08-054".to_string(),
            vehicle_classification: VehicleClassification::Standard,
        }
    }

    #[test]
    fn test_state_follows_events() {
        let state = AppState::new();
        let mut processor = EventProcessor::new(state.clone());
        let card = CardIdentity::from_card_data(b"card");

        processor.process_event(DeviceEvent::AvailabilityChanged(true));
        processor.process_event(DeviceEvent::DeviceNameReceived("ETC-0042".to_string()));
        processor.process_event(DeviceEvent::CardInserted(card));
        processor.process_event(DeviceEvent::PaymentCaptured {
            record: record(),
            alertable: true,
        });

        assert_eq!(state.get_status(), ConnectionStatus::Connected);
        assert_eq!(state.get_device_name().as_deref(), Some("ETC-0042"));
        assert_eq!(state.get_current_card(), Some(card));
        assert_eq!(state.get_last_payment(), Some(record()));

        processor.process_event(DeviceEvent::CardEjected);
        assert_eq!(state.get_current_card(), None);

        processor.process_event(DeviceEvent::CardInserted(card));
        processor.process_event(DeviceEvent::AvailabilityChanged(false));
        assert_eq!(state.get_status(), ConnectionStatus::Disconnected);
        assert_eq!(state.get_current_card(), None);
        assert_eq!(state.get_device_name(), None);
        assert_eq!(state.get_last_payment(), Some(record()));
    }

    #[test]
    fn test_describe_payment() {
        assert_eq!(
            EventProcessor::describe_payment(&record()),
            "ETC payment 2120 yen (08-028 -> 08-054) at 2019-05-31 17:12"
        );
    }
}
