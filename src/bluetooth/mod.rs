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

//! Bluetooth communication module.
//!
//! Finds the BLE serial bridge of the ETC unit and exposes it as a byte pipe.

pub mod ble_constants;
mod manager;
pub mod mock;
mod radio;
mod serial_port;

pub use manager::{DiscoveryCommand, DiscoveryState, SerialPortEvent, SerialPortManager};
pub use mock::MockSerialPort;
pub use radio::{BluerRadio, PeripheralHandle, Radio, RadioError, RadioEvent};
pub use serial_port::{BleSerialPort, SerialLink, SerialPort, TransportError};
