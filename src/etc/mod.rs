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

//! ETC onboard unit protocol.

mod connection;
pub mod decoder;
mod device;
mod payment;
pub mod protocol;
mod request;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionError, ConnectionEvent, DeviceConnection, HandshakeState};
pub use decoder::MessageDecoder;
pub use device::EtcDevice;
pub use payment::{CardIdentity, PaymentRecord, VehicleClassification};
pub use protocol::{ClientMessage, DeviceMessage, DeviceMessageKind, MessageError};
pub use request::{PendingRequest, RequestTracker};
pub use session::{DeviceEvent, DeviceSession, GateDirection, SessionConfig};
