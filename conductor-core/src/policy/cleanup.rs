//! Cleanup thresholds and resource pressure classification

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Static thresholds for reclaiming agents and reacting to load
///
/// Three tiers: age-based cleanup of finished or idle teams, count limits on
/// agents and processes, and emergency limits for hangs and memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    #[serde(with = "humantime_serde")]
    pub completed_team_cleanup: Duration,
    #[serde(with = "humantime_serde")]
    pub failed_team_cleanup: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_team_cleanup: Duration,
    /// How long an idle agent waits before returning to the pool
    #[serde(with = "humantime_serde")]
    pub idle_agent_timeout: Duration,

    pub max_concurrent_agents: usize,
    pub max_concurrent_processes: usize,
    pub max_pooled_agents: usize,
    pub memory_warning_threshold_mb: u64,

    pub process_hang_timeout_seconds: u64,
    pub memory_critical_threshold_mb: u64,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            completed_team_cleanup: Duration::from_secs(5 * 60),
            failed_team_cleanup: Duration::from_secs(10 * 60),
            idle_team_cleanup: Duration::from_secs(30 * 60),
            idle_agent_timeout: Duration::from_secs(5 * 60),
            max_concurrent_agents: 8,
            max_concurrent_processes: 4,
            max_pooled_agents: 4,
            memory_warning_threshold_mb: 2048,
            process_hang_timeout_seconds: 300,
            memory_critical_threshold_mb: 4096,
        }
    }
}

impl CleanupPolicy {
    pub fn process_hang_timeout(&self) -> Duration {
        Duration::from_secs(self.process_hang_timeout_seconds)
    }
}

/// Load level, ordered `Normal < Elevated < High < Critical`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePressure {
    #[default]
    Normal,
    Elevated,
    High,
    Critical,
}

impl ResourcePressure {
    fn from_ratio(ratio: f64) -> Self {
        if ratio > 1.0 {
            Self::Critical
        } else if ratio >= 0.75 {
            Self::High
        } else if ratio >= 0.5 {
            Self::Elevated
        } else {
            Self::Normal
        }
    }
}

impl std::fmt::Display for ResourcePressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Classify current load against the policy
///
/// Each counter is graded independently and the highest grade wins. Memory is
/// graded against the critical threshold and is at least elevated from the
/// warning threshold up; a zero maximum counts any usage as over the limit.
pub fn classify(
    active_agents: usize,
    active_processes: usize,
    memory_mb: u64,
    policy: &CleanupPolicy,
) -> ResourcePressure {
    if memory_mb >= policy.memory_critical_threshold_mb {
        return ResourcePressure::Critical;
    }

    let ratio = |used: f64, max: f64| {
        if max <= 0.0 {
            if used > 0.0 { f64::INFINITY } else { 0.0 }
        } else {
            used / max
        }
    };

    let graded = [
        ratio(active_agents as f64, policy.max_concurrent_agents as f64),
        ratio(active_processes as f64, policy.max_concurrent_processes as f64),
        ratio(memory_mb as f64, policy.memory_critical_threshold_mb as f64),
    ]
    .into_iter()
    .map(ResourcePressure::from_ratio)
    .max()
    .unwrap_or_default();

    if memory_mb >= policy.memory_warning_threshold_mb {
        graded.max(ResourcePressure::Elevated)
    } else {
        graded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CleanupPolicy {
        CleanupPolicy::default()
    }

    #[test]
    fn pressure_ordering() {
        assert!(ResourcePressure::Normal < ResourcePressure::Elevated);
        assert!(ResourcePressure::Elevated < ResourcePressure::High);
        assert!(ResourcePressure::High < ResourcePressure::Critical);
    }

    #[test]
    fn idle_system_is_normal() {
        assert_eq!(classify(0, 0, 0, &policy()), ResourcePressure::Normal);
        assert_eq!(classify(3, 1, 100, &policy()), ResourcePressure::Normal);
    }

    #[test]
    fn half_capacity_is_elevated() {
        // 4 of 8 agents
        assert_eq!(classify(4, 0, 0, &policy()), ResourcePressure::Elevated);
        // 2 of 4 processes
        assert_eq!(classify(0, 2, 0, &policy()), ResourcePressure::Elevated);
    }

    #[test]
    fn three_quarters_is_high() {
        assert_eq!(classify(6, 0, 0, &policy()), ResourcePressure::High);
        assert_eq!(classify(0, 3, 0, &policy()), ResourcePressure::High);
    }

    #[test]
    fn exactly_at_max_is_high_not_critical() {
        assert_eq!(classify(8, 4, 0, &policy()), ResourcePressure::High);
    }

    #[test]
    fn exceeding_max_is_critical() {
        assert_eq!(classify(9, 0, 0, &policy()), ResourcePressure::Critical);
        assert_eq!(classify(0, 5, 0, &policy()), ResourcePressure::Critical);
    }

    #[test]
    fn memory_at_critical_threshold_is_critical() {
        assert_eq!(classify(0, 0, 4096, &policy()), ResourcePressure::Critical);
        assert_eq!(classify(0, 0, 4095, &policy()), ResourcePressure::High);
        assert_eq!(classify(0, 0, 2048, &policy()), ResourcePressure::Elevated);
    }

    #[test]
    fn memory_warning_threshold_raises_to_elevated() {
        let p = CleanupPolicy {
            memory_warning_threshold_mb: 1000,
            ..policy()
        };
        // 1200 of 4096 MiB alone would be normal
        assert_eq!(classify(0, 0, 1200, &policy()), ResourcePressure::Normal);
        assert_eq!(classify(0, 0, 999, &p), ResourcePressure::Normal);
        assert_eq!(classify(0, 0, 1000, &p), ResourcePressure::Elevated);
        // Never lowers a higher grade
        assert_eq!(classify(0, 3, 1200, &p), ResourcePressure::High);
    }

    #[test]
    fn highest_counter_wins() {
        // agents normal, processes high
        assert_eq!(classify(1, 3, 0, &policy()), ResourcePressure::High);
    }

    #[test]
    fn zero_limits_treat_any_use_as_critical() {
        let p = CleanupPolicy {
            max_concurrent_processes: 0,
            ..policy()
        };
        assert_eq!(classify(0, 0, 0, &p), ResourcePressure::Normal);
        assert_eq!(classify(0, 1, 0, &p), ResourcePressure::Critical);
    }

    #[test]
    fn policy_parses_partial_toml() {
        let p: CleanupPolicy =
            toml::from_str("max_concurrent_processes = 2\nidle_agent_timeout = \"90s\"").unwrap();
        assert_eq!(p.max_concurrent_processes, 2);
        assert_eq!(p.idle_agent_timeout, Duration::from_secs(90));
        assert_eq!(p.max_concurrent_agents, 8);
    }
}
