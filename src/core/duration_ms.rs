//! Serde adapter that writes a `Duration` as whole milliseconds.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub(crate) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// The same adapter for `Option<Duration>`.
pub(crate) mod option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Wrapper {
        #[serde(with = "super")]
        delay: Duration,
    }

    #[test]
    fn test_reads_and_writes_millis() {
        let json = serde_json::to_string(&Wrapper {
            delay: Duration::from_millis(1500),
        })
        .unwrap();
        assert_eq!(json, r#"{"delay":1500}"#);

        let parsed: Wrapper = serde_json::from_str(r#"{"delay":250}"#).unwrap();
        assert_eq!(parsed.delay, Duration::from_millis(250));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct OptionalWrapper {
        #[serde(with = "super::option")]
        wait: Option<Duration>,
    }

    #[test]
    fn test_optional_millis() {
        let none = serde_json::to_string(&OptionalWrapper { wait: None }).unwrap();
        assert_eq!(none, r#"{"wait":null}"#);

        let parsed: OptionalWrapper = serde_json::from_str(r#"{"wait":40}"#).unwrap();
        assert_eq!(parsed.wait, Some(Duration::from_millis(40)));
    }
}
