// src/config/supervisor.rs
// Per-user child-process supervisor configuration (C8)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub binary_path: String,
    pub base_port: u16,
    pub max_ports: u16,
    pub management_key: String,
    pub instances_root: String,
    pub idle_reap_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub sigkill_grace_secs: u64,
    pub readiness_poll_interval_ms: u64,
    pub readiness_deadline_secs: u64,
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        Self {
            binary_path: super::helpers::env_or("CLI2API_BINARY_PATH", "cli2api"),
            base_port: super::helpers::env_usize("CLI2API_BASE_PORT", 9100) as u16,
            max_ports: super::helpers::env_usize("CLI2API_MAX_PORTS", 200) as u16,
            management_key: super::helpers::env_or("CLI2API_MANAGEMENT_KEY", ""),
            instances_root: super::helpers::env_or(
                "CLI2API_INSTANCES_ROOT",
                "data/cli2api-instances",
            ),
            idle_reap_interval_secs: super::helpers::env_usize(
                "SUPERVISOR_REAP_INTERVAL_SECS",
                300,
            ) as u64,
            idle_timeout_secs: super::helpers::env_usize("SUPERVISOR_IDLE_TIMEOUT_SECS", 1_800)
                as u64,
            sigkill_grace_secs: super::helpers::env_usize("SUPERVISOR_SIGKILL_GRACE_SECS", 3)
                as u64,
            readiness_poll_interval_ms: super::helpers::env_usize(
                "SUPERVISOR_READINESS_POLL_MS",
                250,
            ) as u64,
            readiness_deadline_secs: super::helpers::env_usize(
                "SUPERVISOR_READINESS_DEADLINE_SECS",
                30,
            ) as u64,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            binary_path: "cli2api".to_string(),
            base_port: 9100,
            max_ports: 200,
            management_key: String::new(),
            instances_root: "data/cli2api-instances".to_string(),
            idle_reap_interval_secs: 300,
            idle_timeout_secs: 1_800,
            sigkill_grace_secs: 3,
            readiness_poll_interval_ms: 250,
            readiness_deadline_secs: 30,
        }
    }
}
