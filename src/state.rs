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

//! Application state management.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::etc::{CardIdentity, PaymentRecord};

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connected => "Connected",
        }
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Name reported by the unit.
    pub device_name: RwLock<Option<String>>,

    /// Card in the unit.
    pub current_card: RwLock<Option<CardIdentity>>,

    /// Most recently captured payment.
    pub last_payment: RwLock<Option<PaymentRecord>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            device_name: RwLock::new(None),
            current_card: RwLock::new(None),
            last_payment: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self) {
        *self.connection_status.write() = ConnectionStatus::Connected;
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
        *self.device_name.write() = None;
        *self.current_card.write() = None;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn set_device_name(&self, name: String) {
        *self.device_name.write() = Some(name);
    }

    pub fn get_device_name(&self) -> Option<String> {
        self.device_name.read().clone()
    }

    pub fn set_current_card(&self, card: Option<CardIdentity>) {
        *self.current_card.write() = card;
    }

    pub fn get_current_card(&self) -> Option<CardIdentity> {
        *self.current_card.read()
    }

    pub fn set_last_payment(&self, record: PaymentRecord) {
        *self.last_payment.write() = Some(record);
    }

    pub fn get_last_payment(&self) -> Option<PaymentRecord> {
        self.last_payment.read().clone()
    }
}
