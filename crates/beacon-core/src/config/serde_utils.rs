//! Serde helpers for configuration values

/// Durations stored as whole seconds
///
/// Serializes as an integer number of seconds. Deserializes from either an
/// integer (`30`) or a string with a unit suffix (`"30s"`, `"5m"`, `"1h"`),
/// so hand-written config files can use whichever reads better.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }

    /// Parse `<n>`, `<n>s`, `<n>m` or `<n>h`
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let (digits, scale) = match text.char_indices().last() {
            Some((i, 's')) => (&text[..i], 1),
            Some((i, 'm')) => (&text[..i], 60),
            Some((i, 'h')) => (&text[..i], 3600),
            _ => (text, 1),
        };

        digits
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(scale))
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration '{}'", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Interval {
        #[serde(with = "duration_secs")]
        interval: Duration,
    }

    #[test]
    fn test_serializes_as_seconds() {
        let value = Interval {
            interval: Duration::from_secs(5),
        };
        assert_eq!(toml::to_string(&value).unwrap().trim(), "interval = 5");
    }

    #[test]
    fn test_deserializes_integer_and_suffixed() {
        let value: Interval = toml::from_str("interval = 10").unwrap();
        assert_eq!(value.interval, Duration::from_secs(10));

        let value: Interval = toml::from_str("interval = \"2m\"").unwrap();
        assert_eq!(value.interval, Duration::from_secs(120));

        let value: Interval = toml::from_str("interval = \"1h\"").unwrap();
        assert_eq!(value.interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(toml::from_str::<Interval>("interval = \"soon\"").is_err());
        assert!(duration_secs::parse("").is_err());
    }

    #[test]
    fn test_rejects_overflowing_duration() {
        assert_eq!(
            duration_secs::parse("9999999999999999999h"),
            Err("invalid duration '9999999999999999999h'".to_string())
        );
        assert!(toml::from_str::<Interval>("interval = \"9999999999999999999m\"").is_err());
        assert_eq!(
            duration_secs::parse("18446744073709551615"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }
}
