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

//! Payment storage using SQLite.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{InsertOutcome, PaymentStore};
use crate::etc::{CardIdentity, PaymentRecord, VehicleClassification};

/// Payment database manager.
#[derive(Clone)]
pub struct PaymentDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl PaymentDatabase {
    /// Create or open the payment database.
    pub fn new(data_dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(file_name);
        info!("Opening payment database: {:?}", db_path);

        let conn = Connection::open(&db_path)?;

        // Create tables
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cards (
                uuid TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payments (
                uuid TEXT PRIMARY KEY,
                card_uuid TEXT NOT NULL REFERENCES cards(uuid),
                amount INTEGER NOT NULL,
                entrance_date TEXT,
                exit_date TEXT NOT NULL,
                entrance_tollbooth_id TEXT NOT NULL,
                exit_tollbooth_id TEXT NOT NULL,
                vehicle_classification INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_exit_date ON payments(exit_date DESC)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Register a card unless it is known. Returns whether it was created.
    pub fn find_or_create(&self, card: CardIdentity) -> Result<bool> {
        let conn = self.conn.lock();
        let created = conn.execute(
            "INSERT OR IGNORE INTO cards (uuid, created_at) VALUES (?1, ?2)",
            params![card.to_string(), Utc::now().timestamp()],
        )?;

        if created > 0 {
            info!("New card registered: {}", card);
        }
        Ok(created > 0)
    }

    /// Save a payment unless a payment with the same identity exists.
    pub fn insert(&self, card: CardIdentity, record: &PaymentRecord) -> Result<InsertOutcome> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO payments (
                uuid, card_uuid, amount, entrance_date, exit_date,
                entrance_tollbooth_id, exit_tollbooth_id, vehicle_classification
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.identity().to_string(),
                card.to_string(),
                record.amount,
                record.entrance_date.map(|date| date.to_rfc3339()),
                record.exit_date.to_rfc3339(),
                record.entrance_tollbooth_id,
                record.exit_tollbooth_id,
                record.vehicle_classification.code(),
            ],
        )?;

        if inserted == 0 {
            debug!("Payment {} already saved", record.identity());
            return Ok(InsertOutcome::Duplicate);
        }
        Ok(InsertOutcome::Inserted)
    }

    /// Get recent payments of a card.
    pub fn get_recent(&self, card: CardIdentity, limit: u32) -> Result<Vec<PaymentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT amount, entrance_date, exit_date, entrance_tollbooth_id,
                    exit_tollbooth_id, vehicle_classification
             FROM payments
             WHERE card_uuid = ?1
             ORDER BY exit_date DESC
             LIMIT ?2",
        )?;

        let records = stmt
            .query_map(params![card.to_string(), limit], |row| Ok(Self::read_row(row)))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        Ok(records)
    }

    fn read_row(row: &Row<'_>) -> Result<PaymentRecord> {
        let entrance_date: Option<String> = row.get(1)?;
        let exit_date: String = row.get(2)?;
        let classification: i64 = row.get(5)?;

        Ok(PaymentRecord {
            amount: row.get(0)?,
            entrance_date: entrance_date
                .map(|date| DateTime::parse_from_rfc3339(&date))
                .transpose()?,
            exit_date: DateTime::parse_from_rfc3339(&exit_date)?,
            entrance_tollbooth_id: row.get(3)?,
            exit_tollbooth_id: row.get(4)?,
            vehicle_classification: VehicleClassification::from_code(classification)?,
        })
    }

    /// Get total payment count.
    pub fn count(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM payments", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl PaymentStore for PaymentDatabase {
    async fn find_or_create_card(&self, card: CardIdentity) -> Result<()> {
        let database = self.clone();
        tokio::task::spawn_blocking(move || database.find_or_create(card)).await??;
        Ok(())
    }

    async fn insert_if_absent(&self, card: CardIdentity, record: &PaymentRecord) -> Result<InsertOutcome> {
        let database = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || database.insert(card, &record)).await?
    }
}
