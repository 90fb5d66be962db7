//! Timestamps cross the wire as milliseconds since the Unix epoch.
use chrono::NaiveDateTime;
use serde::{self, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_i64(date.timestamp_millis())
}

/// `None` when the value falls outside chrono's representable range; such
/// input comes straight off the wire and must never panic a handler.
pub fn millis_to_date_time(millis: i64) -> Option<NaiveDateTime> {
    let secs = millis.div_euclid(1000);
    let nsecs = (millis.rem_euclid(1000) as u32) * 1_000_000;
    NaiveDateTime::from_timestamp_opt(secs, nsecs)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = i64::deserialize(deserializer)?;
    millis_to_date_time(millis).ok_or_else(|| {
        serde::de::Error::custom(format!("timestamp {} is out of range", millis))
    })
}

pub mod option {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(date) => serializer.serialize_i64(date.timestamp_millis()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<i64>::deserialize(deserializer)? {
            Some(millis) => super::millis_to_date_time(millis).map(Some).ok_or_else(|| {
                serde::de::Error::custom(format!("timestamp {} is out of range", millis))
            }),
            None => Ok(None),
        }
    }
}

#[test]
fn test_millis_round_trip() {
    let now = crate::utils::timestamp();
    assert_eq!(millis_to_date_time(now).unwrap().timestamp_millis(), now);
    assert!(millis_to_date_time(i64::MAX).is_none());
    assert!(millis_to_date_time(i64::MIN).is_none());
}
