// src/config.rs
//
// =============================================================================
// SHORTLIST: RUNTIME CONFIGURATION (v 0.1)
// =============================================================================
//
// An explicit, immutable configuration value threaded through every
// component at construction. Nothing in node/governor/healer reaches for a
// module-level constant; everything tunable lives here.

use std::time::Duration;

/// Identity and policy for this node, plus every interval/timeout the
/// protocol needs. Built once in `main` from CLI flags and environment
/// variables, then handed (cloned or by reference) to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: String,
    pub region: Option<String>,
    pub roles: Vec<String>,

    pub repo_path: std::path::PathBuf,

    // --- Roster / liveness ---
    pub node_timeout: Duration,
    pub heartbeat_interval: Duration,

    // --- Node state machine ---
    pub idle_interval: Duration,
    pub jitter_max: Duration,
    pub lease_duration: Duration,
    pub renewal_threshold: Duration,
    pub lease_grace: Duration,

    // --- Renderer supervisor ---
    pub health_check_interval: Duration,
    pub max_consecutive_failures: u32,
    pub health_probe_timeout: Duration,
    pub stop_grace: Duration,

    // --- Governor ---
    pub governor_interval: Duration,

    // --- Healer ---
    pub healer_interval: Duration,
    pub healer_grace: Duration,

    // --- Git / network ---
    pub git_timeout: Duration,
    pub recovery_backoff: Duration,
    pub min_commit_interval: Duration,

    pub enable_governor: bool,
    pub enable_healer: bool,
}

impl Config {
    /// Sensible protocol defaults, matching the values named throughout the
    /// component design. Callers override individual fields from CLI/env.
    pub fn with_defaults(node_id: String, repo_path: std::path::PathBuf) -> Self {
        Self {
            node_id,
            region: None,
            roles: Vec::new(),
            repo_path,

            node_timeout: Duration::from_secs(15 * 60),
            heartbeat_interval: Duration::from_secs(5 * 60),

            idle_interval: Duration::from_secs(30),
            jitter_max: Duration::from_secs(5),
            lease_duration: Duration::from_secs(5 * 60),
            renewal_threshold: Duration::from_secs(60),
            lease_grace: Duration::from_secs(30),

            health_check_interval: Duration::from_secs(20),
            max_consecutive_failures: 3,
            health_probe_timeout: Duration::from_secs(3),
            stop_grace: Duration::from_secs(10),

            governor_interval: Duration::from_secs(60),

            healer_interval: Duration::from_secs(5 * 60),
            healer_grace: Duration::from_secs(60),

            git_timeout: Duration::from_secs(30),
            recovery_backoff: Duration::from_secs(5),
            min_commit_interval: Duration::from_secs(10),

            enable_governor: true,
            enable_healer: true,
        }
    }

    pub fn role_allowed(&self, required_role: Option<&str>) -> bool {
        match required_role {
            None => true,
            Some(r) => self.roles.iter().any(|own| own == r),
        }
    }

    pub fn region_allowed(&self, required_region: Option<&str>) -> bool {
        match required_region {
            None => true,
            Some(r) => self.region.as_deref() == Some(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_and_region_both_must_hold() {
        let mut cfg = Config::with_defaults("n1".into(), ".".into());
        cfg.roles = vec!["render".into()];
        cfg.region = Some("eu".into());

        assert!(cfg.role_allowed(Some("render")));
        assert!(!cfg.role_allowed(Some("other")));
        assert!(cfg.role_allowed(None));

        assert!(cfg.region_allowed(Some("eu")));
        assert!(!cfg.region_allowed(Some("us")));
        assert!(cfg.region_allowed(None));
    }
}
