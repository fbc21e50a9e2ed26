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

//! Radio stack access: power state, discovery and connection of peripherals.

use async_trait::async_trait;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, Device, DeviceEvent, DeviceProperty,
    DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::serial_port::{BleSerialPort, SerialLink, TransportError};

/// Radio errors.
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),
    #[error("Connection to {0} failed")]
    ConnectionFailed(String),
}

/// Identity of a discovered peripheral.
#[derive(Clone)]
pub struct PeripheralHandle {
    address: Address,
    name: Option<String>,
    connected: Arc<AtomicBool>,
}

impl PeripheralHandle {
    pub fn new(address: Address, name: Option<String>) -> Self {
        Self {
            address,
            name,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn from_device(device: &Device) -> Self {
        let name = device.name().await.ok().flatten();
        let handle = Self::new(device.address(), name);
        handle.set_connected(device.is_connected().await.unwrap_or(false));
        handle
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl PartialEq for PeripheralHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeripheralHandle {}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

impl fmt::Debug for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralHandle")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Asynchronous notifications from the radio stack.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// The radio was powered on or off.
    PowerChanged(bool),
    /// A scan found a peripheral advertising the requested service.
    Discovered(PeripheralHandle),
    /// A connected peripheral went away.
    Disconnected(PeripheralHandle),
}

/// Operations the discovery manager needs from the radio stack.
#[async_trait]
pub trait Radio: Send {
    async fn is_powered(&mut self) -> Result<bool, RadioError>;

    /// A peripheral offering `service` that the stack already has a link to.
    async fn connected_peripheral(&mut self, service: Uuid) -> Result<Option<PeripheralHandle>, RadioError>;

    /// Start scanning; matches are reported as [`RadioEvent::Discovered`].
    async fn start_scan(&mut self, service: Uuid) -> Result<(), RadioError>;

    async fn stop_scan(&mut self);

    /// Connect; a later loss is reported as [`RadioEvent::Disconnected`].
    async fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<(), RadioError>;

    async fn open_serial_port(&mut self, peripheral: &PeripheralHandle) -> Result<SerialLink, TransportError>;
}

/// BlueZ radio.
pub struct BluerRadio {
    _session: Session,
    adapter: Adapter,
    event_tx: mpsc::Sender<RadioEvent>,
    power_task: JoinHandle<()>,
    scan_task: Option<JoinHandle<()>>,
    link_task: Option<JoinHandle<()>>,
}

impl BluerRadio {
    /// Open the named (or default) adapter.
    pub async fn new(adapter_name: Option<&str>) -> anyhow::Result<(Self, mpsc::Receiver<RadioEvent>)> {
        info!("Initializing Bluetooth central...");

        // Create BlueZ session
        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        let (event_tx, event_rx) = mpsc::channel(32);

        let adapter_events = adapter.events().await?;
        let power_tx = event_tx.clone();
        let power_task = tokio::spawn(async move {
            let mut adapter_events = Box::pin(adapter_events);
            while let Some(event) = adapter_events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                    info!("Adapter powered: {}", powered);
                    if power_tx.send(RadioEvent::PowerChanged(powered)).await.is_err() {
                        break;
                    }
                }
            }
        });

        let radio = Self {
            _session: session,
            adapter,
            event_tx,
            power_task,
            scan_task: None,
            link_task: None,
        };

        Ok((radio, event_rx))
    }

    async fn offers_service(device: &Device, service: Uuid) -> bool {
        match device.uuids().await {
            Ok(Some(uuids)) => uuids.contains(&service),
            Ok(None) => false,
            Err(e) => {
                debug!("Cannot read UUIDs of {}: {}", device.address(), e);
                false
            }
        }
    }
}

#[async_trait]
impl Radio for BluerRadio {
    async fn is_powered(&mut self) -> Result<bool, RadioError> {
        Ok(self.adapter.is_powered().await?)
    }

    async fn connected_peripheral(&mut self, service: Uuid) -> Result<Option<PeripheralHandle>, RadioError> {
        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            if device.is_connected().await? && Self::offers_service(&device, service).await {
                return Ok(Some(PeripheralHandle::from_device(&device).await));
            }
        }
        Ok(None)
    }

    async fn start_scan(&mut self, service: Uuid) -> Result<(), RadioError> {
        self.stop_scan().await;

        let filter = DiscoveryFilter {
            uuids: [service].into_iter().collect(),
            transport: DiscoveryTransport::Le,
            ..Default::default()
        };
        self.adapter.set_discovery_filter(filter).await?;

        let discovery = self.adapter.discover_devices().await?;
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();

        self.scan_task = Some(tokio::spawn(async move {
            let mut discovery = Box::pin(discovery);
            while let Some(event) = discovery.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let Ok(device) = adapter.device(address) else {
                    continue;
                };
                if !Self::offers_service(&device, service).await {
                    continue;
                }

                let peripheral = PeripheralHandle::from_device(&device).await;
                if event_tx.send(RadioEvent::Discovered(peripheral)).await.is_err() {
                    break;
                }
            }
        }));

        Ok(())
    }

    async fn stop_scan(&mut self) {
        // Dropping the discovery stream ends the scan
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
    }

    async fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<(), RadioError> {
        let device = self.adapter.device(peripheral.address())?;

        if !device.is_connected().await? {
            device.connect().await?;
        }
        if !device.is_connected().await? {
            return Err(RadioError::ConnectionFailed(peripheral.to_string()));
        }
        peripheral.set_connected(true);

        let device_events = device.events().await?;
        let event_tx = self.event_tx.clone();
        let watched = peripheral.clone();

        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        self.link_task = Some(tokio::spawn(async move {
            let mut device_events = Box::pin(device_events);
            while let Some(event) = device_events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    watched.set_connected(false);
                    let _ = event_tx.send(RadioEvent::Disconnected(watched.clone())).await;
                    break;
                }
            }
        }));

        Ok(())
    }

    async fn open_serial_port(&mut self, peripheral: &PeripheralHandle) -> Result<SerialLink, TransportError> {
        let device = self.adapter.device(peripheral.address())?;
        BleSerialPort::open(&device, peripheral.clone()).await
    }
}

impl Drop for BluerRadio {
    fn drop(&mut self) {
        self.power_task.abort();
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        warn!("Bluetooth central shut down");
    }
}
