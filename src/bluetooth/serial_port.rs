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

//! Serial port transport over a pair of BLE characteristics.

use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::Device;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ble_constants::*;
use super::radio::PeripheralHandle;

/// How long to wait for BlueZ to resolve the remote services.
const SERVICES_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Serial port is not available")]
    NotAvailable,
    #[error("Serial bridge service not found")]
    ServiceNotFound,
    #[error("TX characteristic not found")]
    TxCharacteristicNotFound,
    #[error("RX characteristic not found")]
    RxCharacteristicNotFound,
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),
}

/// A byte pipe to the device.
#[async_trait]
pub trait SerialPort: Send + Sync {
    /// Human readable name for logs.
    fn name(&self) -> String;

    /// Whether the underlying link is up.
    fn is_available(&self) -> bool;

    /// Send raw bytes to the device.
    async fn transmit(&self, data: &[u8]) -> Result<(), TransportError>;
}

/// An opened serial port and the stream of bytes it receives.
pub struct SerialLink {
    pub port: Arc<dyn SerialPort>,
    pub incoming: mpsc::Receiver<Vec<u8>>,
}

/// Serial port backed by the bridge's GATT characteristics.
pub struct BleSerialPort {
    peripheral: PeripheralHandle,
    rx_characteristic: Characteristic,
    notify_task: JoinHandle<()>,
}

impl BleSerialPort {
    /// Discover the bridge characteristics on a connected device and start
    /// listening to notifications.
    pub async fn open(device: &Device, peripheral: PeripheralHandle) -> Result<SerialLink, TransportError> {
        wait_for_services(device).await?;

        let mut bridge_service = None;
        for service in device.services().await? {
            if service.uuid().await? == SERVICE_UUID {
                bridge_service = Some(service);
                break;
            }
        }
        let service = bridge_service.ok_or(TransportError::ServiceNotFound)?;

        let mut tx_characteristic = None;
        let mut rx_characteristic = None;
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            if uuid == TX_CHARACTERISTIC_UUID {
                tx_characteristic = Some(characteristic);
            } else if uuid == RX_CHARACTERISTIC_UUID {
                rx_characteristic = Some(characteristic);
            }
        }
        let tx_characteristic = tx_characteristic.ok_or(TransportError::TxCharacteristicNotFound)?;
        let rx_characteristic = rx_characteristic.ok_or(TransportError::RxCharacteristicNotFound)?;

        let notifications = tx_characteristic.notify().await?;
        let (incoming_tx, incoming_rx) = mpsc::channel(RECEIVE_QUEUE_CAPACITY);

        let name = peripheral.to_string();
        let notify_task = tokio::spawn(async move {
            let mut notifications = Box::pin(notifications);
            while let Some(value) = notifications.next().await {
                debug!("Received {} bytes: {}", value.len(), hex::encode_upper(&value));
                if incoming_tx.send(value).await.is_err() {
                    break;
                }
            }
            info!("Notification stream of {} ended", name);
        });

        info!("Serial port opened on {}", peripheral);

        let port = Self {
            peripheral,
            rx_characteristic,
            notify_task,
        };

        Ok(SerialLink {
            port: Arc::new(port),
            incoming: incoming_rx,
        })
    }
}

async fn wait_for_services(device: &Device) -> Result<(), TransportError> {
    let deadline = tokio::time::Instant::now() + SERVICES_RESOLUTION_TIMEOUT;

    while !device.is_services_resolved().await? {
        if tokio::time::Instant::now() >= deadline {
            warn!("Services of {} not resolved in time", device.address());
            return Err(TransportError::ServiceNotFound);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

#[async_trait]
impl SerialPort for BleSerialPort {
    fn name(&self) -> String {
        self.peripheral.to_string()
    }

    fn is_available(&self) -> bool {
        self.peripheral.is_connected()
    }

    async fn transmit(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_available() {
            return Err(TransportError::NotAvailable);
        }

        debug!("Transmitting {} bytes: {}", data.len(), hex::encode_upper(data));
        self.rx_characteristic.write(data).await?;
        Ok(())
    }
}

impl Drop for BleSerialPort {
    fn drop(&mut self) {
        self.notify_task.abort();
    }
}
