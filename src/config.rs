use std::time::Duration;

use crate::error::{FleetError, FleetResult};

/// System cap on the git polling interval; user-configured intervals are
/// clamped down to this.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(15);

/// Default sweep interval for unreferenced Content blobs.
pub const DEFAULT_CONTENT_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// Default timeout for git operations.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Parse a Go-style duration string (`15s`, `5m`, `1h30m`, `500ms`).
pub fn parse_duration(input: &str) -> FleetResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FleetError::Config("empty duration".to_string()));
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }

        let mut unit = c.to_string();
        if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            unit.push('s');
        }

        let value: f64 = number
            .parse()
            .map_err(|_| FleetError::Config(format!("invalid duration: {input}")))?;
        number.clear();

        let seconds = match unit.as_str() {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => {
                return Err(FleetError::Config(format!(
                    "invalid duration unit {unit:?} in {input}"
                )))
            }
        };
        total += Duration::from_secs_f64(seconds);
    }

    if !number.is_empty() {
        return Err(FleetError::Config(format!(
            "duration missing unit: {input}"
        )));
    }

    Ok(total)
}

fn env_duration(key: &str, default: Duration) -> FleetResult<Duration> {
    match std::env::var(key) {
        Ok(v) => parse_duration(&v),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e.into()),
    }
}

fn env_usize(key: &str, default: usize) -> FleetResult<usize> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| FleetError::Config(format!("{key} must be an integer, got {v:?}"))),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e.into()),
    }
}

/// Leader election timings, tuned via the CATTLE_ELECTION_* variables.
#[derive(Clone, Debug)]
pub struct ElectionConfig {
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl ElectionConfig {
    pub fn from_env() -> FleetResult<Self> {
        Ok(ElectionConfig {
            lease_duration: env_duration("CATTLE_ELECTION_LEASE_DURATION", Duration::from_secs(15))?,
            renew_deadline: env_duration("CATTLE_ELECTION_RENEW_DEADLINE", Duration::from_secs(10))?,
            retry_period: env_duration("CATTLE_ELECTION_RETRY_PERIOD", Duration::from_secs(2))?,
        })
    }
}

/// Configuration for the upstream controller process.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// The system namespace the controller runs against
    pub namespace: String,

    /// Shard this replica serves; empty means the default shard
    pub shard_id: String,

    /// SSH known_hosts data checked during git fetches
    pub known_hosts: Option<String>,

    pub bundle_workers: usize,
    pub gitrepo_workers: usize,

    /// Bounded optimistic-concurrency retries for server-side apply
    pub apply_conflict_retries: usize,

    pub content_purge_interval: Duration,

    pub election: ElectionConfig,
}

impl ControllerConfig {
    pub fn from_env() -> FleetResult<Self> {
        let namespace = std::env::var("NAMESPACE")
            .map_err(|_| FleetError::Config("NAMESPACE must be set".to_string()))?;

        Ok(ControllerConfig {
            namespace,
            shard_id: std::env::var("FLEET_SHARD_ID").unwrap_or_default(),
            known_hosts: std::env::var("FLEET_KNOWN_HOSTS").ok(),
            bundle_workers: env_usize("BUNDLE_RECONCILER_WORKERS", 50)?,
            gitrepo_workers: env_usize("GITREPO_RECONCILER_WORKERS", 50)?,
            apply_conflict_retries: env_usize("FLEET_APPLY_CONFLICT_RETRIES", 1)?,
            content_purge_interval: env_duration(
                "CONTENT_PURGE_INTERVAL",
                DEFAULT_CONTENT_PURGE_INTERVAL,
            )?,
            election: ElectionConfig::from_env()?,
        })
    }
}

/// Configuration for the downstream agent process.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// The agent's scoped namespace in the upstream API
    pub namespace: String,

    /// Shard this replica serves; empty means the default shard
    pub shard_id: String,

    /// SSH known_hosts data written to a fetch-scoped temp file
    pub known_hosts: Option<String>,

    pub apply_conflict_retries: usize,

    /// Replica count of the agent deployment, as injected by the chart
    pub replica_count: usize,

    /// How often an up-to-date deployment is re-checked for drift
    pub drift_check_interval: Duration,
}

impl AgentConfig {
    pub fn from_env() -> FleetResult<Self> {
        let namespace = std::env::var("NAMESPACE")
            .map_err(|_| FleetError::Config("NAMESPACE must be set".to_string()))?;

        Ok(AgentConfig {
            namespace,
            shard_id: std::env::var("FLEET_SHARD_ID").unwrap_or_default(),
            known_hosts: std::env::var("FLEET_KNOWN_HOSTS").ok(),
            apply_conflict_retries: env_usize("FLEET_APPLY_CONFLICT_RETRIES", 1)?,
            replica_count: env_usize("FLEET_AGENT_REPLICA_COUNT", 1)?,
            drift_check_interval: env_duration("FLEET_DRIFT_CHECK_INTERVAL", Duration::from_secs(60))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_style_durations() {
        assert_eq!(parse_duration("15s").expect("parse"), Duration::from_secs(15));
        assert_eq!(parse_duration("5m").expect("parse"), Duration::from_secs(300));
        assert_eq!(
            parse_duration("1h30m").expect("parse"),
            Duration::from_secs(5400)
        );
        assert_eq!(
            parse_duration("500ms").expect("parse"),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn rejects_missing_units() {
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
    }
}
