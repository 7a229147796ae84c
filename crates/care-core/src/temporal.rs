//! # Dates, Times and Clocks
//!
//! Dates travel as `YYYY-MM-DD` (chrono's default `NaiveDate` serde format).
//! Times of day accept both `HH:MM` and `HH:MM:SS` on input and are always
//! emitted as `HH:MM:SS`.
//!
//! Timestamps are truncated to microseconds at creation: Postgres
//! `timestamptz` stores microseconds, and audit hashes include the
//! timestamp, so an in-memory value must equal its round-tripped form.

use chrono::{DateTime, NaiveTime, SubsecRound, Utc};

use crate::error::ValidationError;

/// Current UTC time at microsecond precision.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time(input: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(input, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M"))
        .map_err(|_| ValidationError::InvalidTime(input.to_string()))
}

/// Serde adapter for time-of-day fields. Use with `#[serde(with = "...")]`.
pub mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Emit as `HH:MM:SS`.
    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    /// Accept `HH:MM` or `HH:MM:SS`.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }

    /// Optional variant for partial-update payloads.
    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        /// Emit `Some` as `HH:MM:SS`, `None` as null.
        pub fn serialize<S: Serializer>(
            time: &Option<NaiveTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => serializer.serialize_str(&t.format("%H:%M:%S").to_string()),
                None => serializer.serialize_none(),
            }
        }

        /// Accept null, `HH:MM` or `HH:MM:SS`.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|s| super::super::parse_time(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[test]
    fn parses_both_time_shapes() {
        assert_eq!(parse_time("09:30").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(
            parse_time("23:59:58").unwrap(),
            NaiveTime::from_hms_opt(23, 59, 58).unwrap()
        );
        assert!(parse_time("9.30").is_err());
        assert!(parse_time("25:00").is_err());
    }

    #[derive(Serialize, Deserialize)]
    struct Slot {
        #[serde(with = "time_of_day")]
        at: NaiveTime,
        #[serde(with = "time_of_day::option", default)]
        until: Option<NaiveTime>,
    }

    #[test]
    fn serde_adapter_normalizes_to_seconds() {
        let slot: Slot = serde_json::from_str(r#"{"at":"08:15"}"#).unwrap();
        assert!(slot.until.is_none());
        let json = serde_json::to_string(&slot).unwrap();
        assert_eq!(json, r#"{"at":"08:15:00","until":null}"#);
    }

    #[test]
    fn now_is_microsecond_precise() {
        let now = now_micros();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }
}
