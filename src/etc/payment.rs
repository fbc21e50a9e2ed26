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

//! Payment records and card identities.

use chrono::{DateTime, FixedOffset, SecondsFormat, TimeZone, Utc};
use std::fmt;
use uuid::Uuid;

use super::protocol::MessageError;

/// Namespace for card identities.
pub const CARD_UUID_NAMESPACE: Uuid = Uuid::from_u128(0xAE12B12B_2DD8_4FAB_9AD3_67FB3A15E12C);

/// Namespace for payment record identities.
pub const PAYMENT_UUID_NAMESPACE: Uuid = Uuid::from_u128(0x5EDBF18B_7031_4B90_92E3_6E67360A2472);

/// Offset of the timestamps reported by the device (Asia/Tokyo).
const DEVICE_UTC_OFFSET_SECS: i32 = 9 * 3600;

/// Deterministic identity of an ETC card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardIdentity(Uuid);

impl CardIdentity {
    /// Derive the identity from the raw unique card data.
    pub fn from_card_data(data: &[u8]) -> Self {
        Self(Uuid::new_v5(&CARD_UUID_NAMESPACE, data))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for CardIdentity {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for CardIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Vehicle classification used for toll pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleClassification {
    Light,
    Standard,
    MidSize,
    Oversized,
    ExtraLarge,
}

impl VehicleClassification {
    /// Parse the code reported by the device.
    pub fn from_code(code: i64) -> Result<Self, MessageError> {
        match code {
            5 => Ok(Self::Light),
            1 => Ok(Self::Standard),
            4 => Ok(Self::MidSize),
            2 => Ok(Self::Oversized),
            3 => Ok(Self::ExtraLarge),
            _ => Err(MessageError::UnknownVehicleClassification(code)),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Light => 5,
            Self::Standard => 1,
            Self::MidSize => 4,
            Self::Oversized => 2,
            Self::ExtraLarge => 3,
        }
    }
}

/// A toll payment read from the device log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    /// Amount in yen.
    pub amount: i32,
    /// The device does not report entrance dates; kept for records edited later.
    pub entrance_date: Option<DateTime<FixedOffset>>,
    pub exit_date: DateTime<FixedOffset>,
    pub entrance_tollbooth_id: String,
    pub exit_tollbooth_id: String,
    pub vehicle_classification: VehicleClassification,
}

impl PaymentRecord {
    /// Build an exit date from the components reported by the device.
    pub fn exit_date_from_components(
        year: i64,
        month: i64,
        day: i64,
        hour: i64,
        minute: i64,
        second: i64,
    ) -> Result<DateTime<FixedOffset>, MessageError> {
        let offset = Self::device_offset()?;

        let component = |value: i64| u32::try_from(value).map_err(|_| MessageError::InvalidDate);
        let year = i32::try_from(year).map_err(|_| MessageError::InvalidDate)?;

        offset
            .with_ymd_and_hms(
                year,
                component(month)?,
                component(day)?,
                component(hour)?,
                component(minute)?,
                component(second)?,
            )
            .single()
            .ok_or(MessageError::InvalidDate)
    }

    /// Offset of the dates the device reports.
    pub(crate) fn device_offset() -> Result<FixedOffset, MessageError> {
        FixedOffset::east_opt(DEVICE_UTC_OFFSET_SECS).ok_or(MessageError::InvalidDate)
    }

    /// Deterministic identity used to detect already-saved records.
    ///
    /// The entrance date is not part of the identity since the device never
    /// reports it.
    pub fn identity(&self) -> Uuid {
        let name = [
            self.amount.to_string(),
            self.exit_date
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            self.entrance_tollbooth_id.clone(),
            self.exit_tollbooth_id.clone(),
            self.vehicle_classification.code().to_string(),
        ]
        .join("|");

        Uuid::new_v5(&PAYMENT_UUID_NAMESPACE, name.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> PaymentRecord {
        PaymentRecord {
            amount: 470,
            entrance_date: None,
            exit_date: PaymentRecord::exit_date_from_components(2019, 6, 4, 18, 45, 34).unwrap(),
            entrance_tollbooth_id: "12-107".to_string(),
            exit_tollbooth_id: "12-049".to_string(),
            vehicle_classification: VehicleClassification::Standard,
        }
    }

    #[test]
    fn test_card_identity_is_deterministic() {
        let data = b"0123456789ABCDEF01234567";
        let first = CardIdentity::from_card_data(data);
        let second = CardIdentity::from_card_data(data);
        assert_eq!(first, second);
        assert_eq!(first.uuid().get_version_num(), 5);

        let other = CardIdentity::from_card_data(b"0123456789ABCDEF01234568");
        assert_ne!(first, other);
    }

    #[test]
    fn test_vehicle_classification_codes() {
        for code in 1..=5 {
            let classification = VehicleClassification::from_code(code).unwrap();
            assert_eq!(classification.code(), code);
        }
        assert_eq!(
            VehicleClassification::from_code(0),
            Err(MessageError::UnknownVehicleClassification(0))
        );
        assert_eq!(
            VehicleClassification::from_code(6),
            Err(MessageError::UnknownVehicleClassification(6))
        );
    }

    #[test]
    fn test_exit_date_is_in_japan_time() {
        let record = sample_record();
        assert_eq!(
            record.exit_date.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true),
            "2019-06-04T09:45:34Z"
        );
    }

    #[test]
    fn test_invalid_exit_date() {
        assert_eq!(
            PaymentRecord::exit_date_from_components(2019, 2, 30, 0, 0, 0),
            Err(MessageError::InvalidDate)
        );
        assert_eq!(
            PaymentRecord::exit_date_from_components(2019, -1, 1, 0, 0, 0),
            Err(MessageError::InvalidDate)
        );
    }

    #[test]
    fn test_identity_ignores_entrance_date() {
        let record = sample_record();
        let mut with_entrance = record.clone();
        with_entrance.entrance_date = Some(record.exit_date - chrono::Duration::hours(1));

        assert_eq!(record.identity(), with_entrance.identity());
    }

    #[test]
    fn test_identity_changes_with_fields() {
        let record = sample_record();

        let mut other_amount = record.clone();
        other_amount.amount = 471;
        assert_ne!(record.identity(), other_amount.identity());

        let mut other_class = record.clone();
        other_class.vehicle_classification = VehicleClassification::Light;
        assert_ne!(record.identity(), other_class.identity());
    }
}
