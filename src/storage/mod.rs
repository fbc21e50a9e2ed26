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

//! Storage for cards and payment records.

mod payments;

pub use payments::PaymentDatabase;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::etc::{CardIdentity, PaymentRecord};

/// Result of saving a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same identity was already saved.
    Duplicate,
}

/// Where cards and payments are persisted.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Make sure the card is known.
    async fn find_or_create_card(&self, card: CardIdentity) -> Result<()>;

    /// Save a payment made with `card` unless it was saved before.
    async fn insert_if_absent(&self, card: CardIdentity, record: &PaymentRecord) -> Result<InsertOutcome>;
}

/// Store keeping everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    cards: Mutex<HashSet<CardIdentity>>,
    payments: Mutex<HashMap<Uuid, (CardIdentity, PaymentRecord)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn card_count(&self) -> usize {
        self.cards.lock().len()
    }

    pub fn payment_count(&self) -> usize {
        self.payments.lock().len()
    }

    /// Payments made with `card`, newest first.
    pub fn payments_for(&self, card: CardIdentity) -> Vec<PaymentRecord> {
        let mut records: Vec<PaymentRecord> = self
            .payments
            .lock()
            .values()
            .filter(|(owner, _)| *owner == card)
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| b.exit_date.cmp(&a.exit_date));
        records
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn find_or_create_card(&self, card: CardIdentity) -> Result<()> {
        self.cards.lock().insert(card);
        Ok(())
    }

    async fn insert_if_absent(&self, card: CardIdentity, record: &PaymentRecord) -> Result<InsertOutcome> {
        let mut payments = self.payments.lock();
        let identity = record.identity();
        if payments.contains_key(&identity) {
            return Ok(InsertOutcome::Duplicate);
        }
        payments.insert(identity, (card, record.clone()));
        Ok(InsertOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etc::VehicleClassification;

    fn record(amount: i32, minute: i64) -> PaymentRecord {
        PaymentRecord {
            amount,
            entrance_date: None,
            exit_date: PaymentRecord::exit_date_from_components(2019, 6, 4, 18, minute, 0).unwrap(),
            entrance_tollbooth_id: "12-107".to_string(),
            exit_tollbooth_id: "12-049".to_string(),
            vehicle_classification: VehicleClassification::Standard,
        }
    }

    #[tokio::test]
    async fn test_memory_store_detects_duplicates() {
        let store = MemoryStore::new();
        let card = CardIdentity::from_card_data(b"card");

        store.find_or_create_card(card).await.unwrap();
        store.find_or_create_card(card).await.unwrap();
        assert_eq!(store.card_count(), 1);

        assert_eq!(
            store.insert_if_absent(card, &record(470, 10)).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_if_absent(card, &record(470, 10)).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(
            store.insert_if_absent(card, &record(470, 11)).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(store.payment_count(), 2);

        let payments = store.payments_for(card);
        assert_eq!(payments[0], record(470, 11));
        assert!(store.payments_for(CardIdentity::from_card_data(b"other")).is_empty());
    }
}
