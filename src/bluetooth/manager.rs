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

//! Discovery of the serial bridge and connection supervision.
//!
//! The manager owns the radio. It finds the bridge (reusing a link the
//! stack already has, otherwise scanning for the service), connects, opens
//! the serial port and reports it. Failed attempts and disconnections are
//! retried until the radio is powered off or discovery is stopped with a
//! [`DiscoveryCommand`].

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ble_constants::SERVICE_UUID;
use super::radio::{PeripheralHandle, Radio, RadioEvent};
use super::serial_port::SerialLink;

/// Events reported to the owner of the manager.
pub enum SerialPortEvent {
    /// A serial port became usable.
    Found(SerialLink),
    /// The previously found serial port is gone.
    Lost,
}

/// Commands accepted by a running manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryCommand {
    /// Resume discovery and reconnection.
    Start,
    /// Stop scanning and do not reconnect. An open serial port stays open.
    Stop,
}

/// Discovery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Nothing in progress, usually because the radio is off.
    Idle,
    Scanning,
    Connecting,
    Connected,
}

/// Finds the bridge and keeps reconnecting to it.
pub struct SerialPortManager<R: Radio> {
    radio: R,
    radio_events: mpsc::Receiver<RadioEvent>,
    event_tx: mpsc::Sender<SerialPortEvent>,
    state: DiscoveryState,
    peripheral: Option<PeripheralHandle>,
    found_reported: bool,
    reconnect_delay: Duration,
    discovery_enabled: bool,
    command_tx: mpsc::Sender<DiscoveryCommand>,
    commands: mpsc::Receiver<DiscoveryCommand>,
}

impl<R: Radio> SerialPortManager<R> {
    /// Create a new manager.
    pub fn new(
        radio: R,
        radio_events: mpsc::Receiver<RadioEvent>,
        event_tx: mpsc::Sender<SerialPortEvent>,
        reconnect_delay: Duration,
    ) -> Self {
        let (command_tx, commands) = mpsc::channel(4);
        Self {
            radio,
            radio_events,
            event_tx,
            state: DiscoveryState::Idle,
            peripheral: None,
            found_reported: false,
            reconnect_delay,
            discovery_enabled: true,
            command_tx,
            commands,
        }
    }

    /// Sender for controlling the manager once it runs.
    pub fn commands(&self) -> mpsc::Sender<DiscoveryCommand> {
        self.command_tx.clone()
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Run until the radio or the event consumer goes away.
    pub async fn run(mut self) -> Result<()> {
        info!("Serial port manager started");

        match self.radio.is_powered().await {
            Ok(true) => self.start_discovering().await,
            Ok(false) => info!("Bluetooth is powered off, waiting..."),
            Err(e) => error!("Failed to read radio power state: {}", e),
        }

        loop {
            while self.state == DiscoveryState::Connecting {
                // Power and disconnect events take precedence over retries
                while let Ok(event) = self.radio_events.try_recv() {
                    self.handle_radio_event(event).await;
                }
                while let Ok(command) = self.commands.try_recv() {
                    self.handle_command(command).await;
                }
                if self.state != DiscoveryState::Connecting {
                    break;
                }
                self.attempt_connection().await;
            }

            if self.event_tx.is_closed() {
                break;
            }

            tokio::select! {
                event = self.radio_events.recv() => match event {
                    Some(event) => self.handle_radio_event(event).await,
                    None => break,
                },
                Some(command) = self.commands.recv() => self.handle_command(command).await,
            }
        }

        self.stop_discovering().await;
        info!("Serial port manager stopped");
        Ok(())
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::PowerChanged(true) => {
                info!("Bluetooth powered on");
                if self.state == DiscoveryState::Idle && self.discovery_enabled {
                    self.start_discovering().await;
                }
            }
            RadioEvent::PowerChanged(false) => {
                info!("Bluetooth powered off");
                self.stop_discovering().await;
                self.report_lost().await;
                self.peripheral = None;
                self.set_state(DiscoveryState::Idle);
            }
            RadioEvent::Discovered(peripheral) => {
                if self.state != DiscoveryState::Scanning {
                    debug!("Ignoring discovery of {} while {:?}", peripheral, self.state);
                    return;
                }
                info!("Discovered {}", peripheral);
                self.stop_discovering().await;
                self.peripheral = Some(peripheral);
                self.set_state(DiscoveryState::Connecting);
            }
            RadioEvent::Disconnected(peripheral) => {
                if self.peripheral.as_ref() != Some(&peripheral) {
                    debug!("Ignoring disconnection of {}", peripheral);
                    return;
                }
                info!("Disconnected from {}", peripheral);
                self.report_lost().await;
                if self.state == DiscoveryState::Idle {
                    return;
                }
                if self.discovery_enabled {
                    self.pause_before_reconnect().await;
                    self.set_state(DiscoveryState::Connecting);
                } else {
                    self.peripheral = None;
                    self.set_state(DiscoveryState::Idle);
                }
            }
        }
    }

    async fn handle_command(&mut self, command: DiscoveryCommand) {
        match command {
            DiscoveryCommand::Stop => {
                info!("Discovery stopped");
                self.discovery_enabled = false;
                self.stop_discovering().await;
                if self.state == DiscoveryState::Connecting {
                    self.peripheral = None;
                    self.set_state(DiscoveryState::Idle);
                }
            }
            DiscoveryCommand::Start => {
                info!("Discovery resumed");
                self.discovery_enabled = true;
                if self.state != DiscoveryState::Idle {
                    return;
                }
                match self.radio.is_powered().await {
                    Ok(true) => self.start_discovering().await,
                    Ok(false) => info!("Bluetooth is powered off, waiting..."),
                    Err(e) => error!("Failed to read radio power state: {}", e),
                }
            }
        }
    }

    async fn start_discovering(&mut self) {
        match self.radio.connected_peripheral(SERVICE_UUID).await {
            Ok(Some(peripheral)) => {
                info!("Reusing connected peripheral {}", peripheral);
                self.peripheral = Some(peripheral);
                self.set_state(DiscoveryState::Connecting);
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to look up connected peripherals: {}", e),
        }

        match self.radio.start_scan(SERVICE_UUID).await {
            Ok(()) => {
                info!("Scanning for ETC devices...");
                self.set_state(DiscoveryState::Scanning);
            }
            Err(e) => {
                error!("Failed to start scanning: {}", e);
                self.set_state(DiscoveryState::Idle);
            }
        }
    }

    /// Stop an ongoing scan.
    async fn stop_discovering(&mut self) {
        if self.state == DiscoveryState::Scanning {
            info!("Stopping scan");
            self.set_state(DiscoveryState::Idle);
        }
        self.radio.stop_scan().await;
    }

    async fn attempt_connection(&mut self) {
        let Some(peripheral) = self.peripheral.clone() else {
            self.set_state(DiscoveryState::Idle);
            return;
        };

        info!("Connecting to {}...", peripheral);
        let result = match self.radio.connect(&peripheral).await {
            Ok(()) => self
                .radio
                .open_serial_port(&peripheral)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(link) => {
                info!("Serial port ready on {}", link.port.name());
                self.set_state(DiscoveryState::Connected);
                self.found_reported = true;
                if self.event_tx.send(SerialPortEvent::Found(link)).await.is_err() {
                    warn!("Nobody is listening for serial ports");
                }
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", peripheral, e);
                self.pause_before_reconnect().await;
            }
        }
    }

    fn set_state(&mut self, state: DiscoveryState) {
        if self.state != state {
            debug!("Discovery state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    async fn report_lost(&mut self) {
        if self.found_reported {
            self.found_reported = false;
            let _ = self.event_tx.send(SerialPortEvent::Lost).await;
        }
    }

    async fn pause_before_reconnect(&self) {
        if self.reconnect_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}
