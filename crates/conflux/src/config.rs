//! Configuration for the conflux primitives.
//!
//! Both structs deserialize with serde and fill in defaults for missing
//! fields, so they can be embedded into a larger service configuration.
//! Durations use the humantime format (`100ms`, `2s`, `5m`).

use std::time::Duration;

use serde::Deserialize;

/// Default number of slots in a sequencer window.
const DEFAULT_CAPACITY: usize = 1024;

/// Default time-to-live for coalescing cache entries.
const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Configuration for a [`Sequencer`](crate::Sequencer).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Maximum number of concurrently outstanding items.
    ///
    /// Must be at least 1.
    pub capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Configuration for a [`CoalescingCache`](crate::CoalescingCache).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoalescingConfig {
    /// Time after which a cache entry is considered stale, measured from the
    /// entry's creation and never refreshed on access.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        CoalescingConfig { ttl: DEFAULT_TTL }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_empty_mapping_yields_defaults() -> Result<()> {
        let config: SequencerConfig = serde_yaml::from_str("{}")?;
        assert_eq!(config, SequencerConfig::default());

        let config: CoalescingConfig = serde_yaml::from_str("{}")?;
        assert_eq!(config, CoalescingConfig::default());

        Ok(())
    }

    #[test]
    fn test_parse_humantime_ttl() -> Result<()> {
        let config: CoalescingConfig = serde_yaml::from_str("ttl: 250ms")?;
        assert_eq!(config.ttl, Duration::from_millis(250));

        let config: CoalescingConfig = serde_yaml::from_str("ttl: 2m")?;
        assert_eq!(config.ttl, Duration::from_secs(120));

        Ok(())
    }

    #[test]
    fn test_parse_capacity() -> Result<()> {
        let config: SequencerConfig = serde_yaml::from_str("capacity: 64")?;
        assert_eq!(config.capacity, 64);

        Ok(())
    }
}
