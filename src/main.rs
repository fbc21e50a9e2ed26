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

//! ETC Dash application

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etc_dash::bluetooth::{BluerRadio, DiscoveryCommand, MockSerialPort, SerialPortEvent, SerialPortManager};
use etc_dash::config::Config;
use etc_dash::etc::{DeviceEvent, EtcDevice};
use etc_dash::events::EventProcessor;
use etc_dash::state::AppState;
use etc_dash::storage::PaymentDatabase;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("etc_dash=info".parse()?))
        .init();

    info!("Starting ETC Dash v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Initialize storage
    let database = PaymentDatabase::new(&config.data_dir, &config.storage.database_file)?;
    info!("Payment storage initialized ({} payments)", database.count()?);

    let state = AppState::new();

    let (device_event_tx, mut device_event_rx) = mpsc::channel::<DeviceEvent>(64);
    let (port_event_tx, port_event_rx) = mpsc::channel::<SerialPortEvent>(8);

    let device = EtcDevice::new(Arc::new(database), device_event_tx, config.session());
    tokio::spawn(device.run(port_event_rx));

    // The simulated unit lives as long as the application
    let (_simulated, discovery) = if config.bluetooth.simulate {
        info!("Using simulated ETC unit");
        let (port, link) = MockSerialPort::open();
        port.start_heartbeats();
        if port_event_tx.send(SerialPortEvent::Found(link)).await.is_err() {
            anyhow::bail!("ETC device task stopped");
        }
        (Some(port), None)
    } else {
        info!("Initializing Bluetooth...");
        let (radio, radio_events) = BluerRadio::new(config.bluetooth.adapter.as_deref()).await?;
        let manager = SerialPortManager::new(radio, radio_events, port_event_tx, config.reconnect_delay());
        let discovery = manager.commands();
        tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                error!("Serial port manager failed: {}", e);
            }
        });
        (None, Some(discovery))
    };

    let mut processor = EventProcessor::new(state.clone());

    info!("Ready. Waiting for the ETC unit.");

    loop {
        tokio::select! {
            event = device_event_rx.recv() => {
                match event {
                    Some(event) => processor.process_event(event),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Quit requested");
                break;
            }
        }
    }

    info!("Shutting down...");
    if let Some(discovery) = discovery {
        let _ = discovery.send(DiscoveryCommand::Stop).await;
    }
    Ok(())
}
