//! Parsing for human-readable durations like "30m" or "2h" in config files.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Parse a duration string like "1d", "2h", "30m", "45s".
///
/// The input is case-insensitive and whitespace is trimmed.
///
/// # Examples
///
/// ```
/// use autopunch::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(5 * 60));
/// assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let (num, unit) = match s.chars().last() {
        Some(unit @ ('d' | 'h' | 'm' | 's')) => (&s[..s.len() - 1], unit),
        _ => anyhow::bail!("duration must end with d, h, m, or s"),
    };

    let num: u64 = num.parse().with_context(|| "invalid number in duration")?;

    let secs = match unit {
        'd' => num
            .checked_mul(24 * 60 * 60)
            .context("duration is too large")?,
        'h' => num.checked_mul(60 * 60).context("duration is too large")?,
        'm' => num.checked_mul(60).context("duration is too large")?,
        _ => num,
    };

    Ok(Duration::from_secs(secs))
}

/// Serde deserializer for duration strings.
///
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}
