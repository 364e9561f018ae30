use crate::default_struct;
use std::{str::FromStr, time::Duration};
use tracing::warn;

default_struct! {
#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: String = "!".to_string(),
    pub data_dir: String = "data".to_string(),

    pub unverify_interval: Duration = Duration::from_secs(30),
    pub unverify_lookahead: Duration = Duration::from_secs(30),
    pub unverify_staleness: Duration = Duration::from_secs(60 * 60),
    pub settle_delay: Duration = Duration::from_millis(2000),

    pub voice_interval: Duration = Duration::from_secs(60),
    pub shutdown_grace: Duration = Duration::from_secs(10),
}
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_secs()).map_or(default, Duration::from_secs)
        };

        Self {
            prefix: lookup("BOT_PREFIX")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.prefix),
            data_dir: lookup("DATA_DIR").unwrap_or(defaults.data_dir),
            unverify_interval: secs("UNVERIFY_INTERVAL_SECS", defaults.unverify_interval),
            unverify_lookahead: secs("UNVERIFY_LOOKAHEAD_SECS", defaults.unverify_lookahead),
            unverify_staleness: secs("UNVERIFY_STALENESS_SECS", defaults.unverify_staleness),
            settle_delay: parse_or(
                &lookup,
                "UNVERIFY_SETTLE_DELAY_MS",
                defaults.settle_delay.as_millis() as u64,
            )
            .map_or(defaults.settle_delay, Duration::from_millis),
            voice_interval: secs("VOICE_INTERVAL_SECS", defaults.voice_interval),
            shutdown_grace: secs("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace),
        }
    }

    pub fn database_path(&self, name: &str) -> String {
        format!("{}/{}.db", self.data_dir.trim_end_matches('/'), name)
    }
}

fn parse_or<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}, using default", key, raw);
            Some(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.prefix, "!");
        assert_eq!(config.unverify_interval, Duration::from_secs(30));
        assert_eq!(config.unverify_staleness, Duration::from_secs(3600));
        assert_eq!(config.settle_delay, Duration::from_millis(2000));
        assert_eq!(config.database_path("voice"), "data/voice.db");
    }

    #[test]
    fn overrides_and_invalid_values() {
        let config = config_from(&[
            ("BOT_PREFIX", "?"),
            ("DATA_DIR", "/var/lib/gatekeeper/"),
            ("UNVERIFY_LOOKAHEAD_SECS", "45"),
            ("VOICE_INTERVAL_SECS", "soon"),
            ("UNVERIFY_SETTLE_DELAY_MS", "0"),
        ]);
        assert_eq!(config.prefix, "?");
        assert_eq!(config.unverify_lookahead, Duration::from_secs(45));
        assert_eq!(config.voice_interval, Duration::from_secs(60));
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.database_path("unverify"), "/var/lib/gatekeeper/unverify.db");
    }
}
