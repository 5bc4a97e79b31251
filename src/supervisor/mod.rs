// src/supervisor/mod.rs
// Per-User Process Supervisor (C8): exactly-one auxiliary OAuth-proxy child
// process per user, spawned on demand. Grounded on
// agents::executor::subprocess::SubprocessAgentExecutor's process-spawning
// idiom (tokio::process::Command with piped stdio, kill_on_drop, a
// background stderr logger task with a per-id prefix) generalized from a
// request/response subprocess protocol to a long-lived HTTP-serving child
// whose readiness is polled rather than line-read.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::supervisor::SupervisorConfig;
use crate::error::{EngineError, Result};
use crate::utils::{get_timestamp, sha256_hash};

/// Per-user YAML sidecar (spec §4.8): host/port/auth dir/per-instance key are
/// all the proxy needs to start serving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInstanceConfig {
    pub host: String,
    pub port: u16,
    pub auth_dir: String,
    pub api_key: String,
    pub management_key: String,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

struct ProcessEntry {
    child: Child,
    port: u16,
    api_key: String,
    last_activity: i64,
    ready: bool,
}

/// Info handed back to a caller that needs to talk to a user's proxy.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessHandle {
    pub port: u16,
    pub api_key: String,
    pub ready: bool,
}

struct State {
    entries: HashMap<String, ProcessEntry>,
    used_ports: HashSet<u16>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    state: parking_lot::RwLock<State>,
    http: reqwest::Client,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            state: parking_lot::RwLock::new(State { entries: HashMap::new(), used_ports: HashSet::new() }),
            http: reqwest::Client::new(),
        }
    }

    /// `ensureProcess(userId)` (spec §4.8): returns the existing entry if
    /// alive, bumping `lastActivity`; otherwise allocates a port, writes
    /// config, and spawns.
    pub async fn ensure_process(&self, user_id: &str) -> Result<ProcessHandle> {
        {
            let mut state = self.state.write();
            if let Some(entry) = state.entries.get_mut(user_id) {
                entry.last_activity = get_timestamp();
                return Ok(ProcessHandle { port: entry.port, api_key: entry.api_key.clone(), ready: entry.ready });
            }
        }

        self.spawn_process(user_id).await
    }

    async fn spawn_process(&self, user_id: &str) -> Result<ProcessHandle> {
        let port = self.allocate_port(user_id)?;
        let api_key = generate_api_key();
        let auth_dir = format!("{}/{}/auths", self.config.instances_root, user_id);
        tokio::fs::create_dir_all(&auth_dir).await?;

        let proxy_config = ProxyInstanceConfig {
            host: "127.0.0.1".to_string(),
            port,
            auth_dir: auth_dir.clone(),
            api_key: api_key.clone(),
            management_key: self.config.management_key.clone(),
            retry_max_attempts: 5,
            retry_base_delay_ms: 500,
        };

        let config_path = format!("{}/{}/config.yaml", self.config.instances_root, user_id);
        let yaml = serde_yaml::to_string(&proxy_config).map_err(|e| EngineError::internal(e.to_string()))?;
        tokio::fs::write(&config_path, yaml).await?;

        info!("supervisor: spawning proxy for user {} on port {}", user_id, port);

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("--config")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            self.release_port(port);
            EngineError::ProxyError(format!("failed to spawn proxy for {user_id}: {e}"))
        })?;

        if let Some(stdout) = child.stdout.take() {
            spawn_log_reader(user_id.to_string(), stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_reader(user_id.to_string(), stderr, "stderr");
        }

        {
            let mut state = self.state.write();
            state.entries.insert(
                user_id.to_string(),
                ProcessEntry { child, port, api_key: api_key.clone(), last_activity: get_timestamp(), ready: false },
            );
        }

        let ready = self.poll_readiness(port, &api_key).await;
        {
            let mut state = self.state.write();
            if let Some(entry) = state.entries.get_mut(user_id) {
                entry.ready = ready;
            }
        }

        if !ready {
            warn!("supervisor: proxy for {} did not become ready within deadline, proceeding anyway", user_id);
        }

        Ok(ProcessHandle { port, api_key, ready })
    }

    /// Deterministic port probing keyed by a hash of the user id, linear
    /// probe on collision (spec §4.8).
    fn allocate_port(&self, user_id: &str) -> Result<u16> {
        let hash = sha256_hash(user_id);
        let seed = u64::from_str_radix(&hash[..8], 16).unwrap_or(0);
        let window = self.config.max_ports.max(1) as u64;
        let start = (seed % window) as u32;
        let max_ports = self.config.max_ports as u32;

        let mut state = self.state.write();
        for offset in 0..max_ports {
            let candidate = self.config.base_port + ((start + offset) % max_ports) as u16;
            if !state.used_ports.contains(&candidate) {
                state.used_ports.insert(candidate);
                return Ok(candidate);
            }
        }

        Err(EngineError::ProxyError("no free ports in configured window".to_string()))
    }

    fn release_port(&self, port: u16) {
        self.state.write().used_ports.remove(&port);
    }

    async fn poll_readiness(&self, port: u16, api_key: &str) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.readiness_deadline_secs);
        let url = format!("http://127.0.0.1:{port}/v1/models");

        while tokio::time::Instant::now() < deadline {
            match self.http.get(&url).bearer_auth(api_key).send().await {
                Ok(response) if response.status().as_u16() < 500 => return true,
                _ => {}
            }
            tokio::time::sleep(Duration::from_millis(self.config.readiness_poll_interval_ms)).await;
        }
        false
    }

    /// Idle reaper (spec §4.8): every `idle_reap_interval_secs`, SIGTERM
    /// processes idle past `idle_timeout_secs`, SIGKILL `sigkill_grace_secs`
    /// later if still alive.
    pub fn start_idle_reaper(self: &Arc<Self>) {
        let supervisor = self.clone();
        let interval = Duration::from_secs(supervisor.config.idle_reap_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                supervisor.reap_idle().await;
            }
        });
    }

    async fn reap_idle(&self) {
        let idle_user_ids: Vec<String> = {
            let state = self.state.read();
            let now = get_timestamp();
            state
                .entries
                .iter()
                .filter(|(_, entry)| now - entry.last_activity > self.config.idle_timeout_secs as i64)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for user_id in idle_user_ids {
            info!("supervisor: reaping idle process for user {}", user_id);
            self.terminate(&user_id).await;
        }
    }

    async fn terminate(&self, user_id: &str) {
        let port = {
            let mut state = self.state.write();
            let Some(mut entry) = state.entries.remove(user_id) else { return };
            #[cfg(unix)]
            if let Some(pid) = entry.child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            let port = entry.port;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                let _ = entry.child.start_kill();
                let _ = entry.child.wait().await;
            });
            port
        };

        // Port is released as soon as SIGTERM is sent, not after the grace-period kill completes.
        self.release_port(port);
    }

    /// Global shutdown hook: terminates every managed process.
    pub async fn shutdown_all(&self) {
        let user_ids: Vec<String> = self.state.read().entries.keys().cloned().collect();
        for user_id in user_ids {
            self.terminate(&user_id).await;
        }
    }
}

fn generate_api_key() -> String {
    use base64::Engine;
    let bytes: [u8; 24] = rand::thread_rng().gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn spawn_log_reader<R: tokio::io::AsyncRead + Unpin + Send + 'static>(user_id: String, stream: R, stream_name: &'static str) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
            debug!("[proxy:{}:{}] {}", user_id, stream_name, line.trim());
            line.clear();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_allocation_stays_within_window() {
        let config = SupervisorConfig { base_port: 9100, max_ports: 10, ..SupervisorConfig::default() };
        let supervisor = Supervisor::new(config);
        let port = supervisor.allocate_port("user-1").unwrap();
        assert!(port >= 9100 && port < 9110);
    }

    #[test]
    fn port_allocation_is_deterministic_per_user() {
        let config = SupervisorConfig { base_port: 9100, max_ports: 50, ..SupervisorConfig::default() };
        let supervisor_a = Supervisor::new(config.clone());
        let supervisor_b = Supervisor::new(config);
        assert_eq!(supervisor_a.allocate_port("user-xyz").unwrap(), supervisor_b.allocate_port("user-xyz").unwrap());
    }

    #[test]
    fn collision_linear_probes_to_next_free_port() {
        let config = SupervisorConfig { base_port: 9100, max_ports: 2, ..SupervisorConfig::default() };
        let supervisor = Supervisor::new(config);
        let first = supervisor.allocate_port("a").unwrap();
        let second = supervisor.allocate_port("b").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn generated_api_keys_are_unique() {
        assert_ne!(generate_api_key(), generate_api_key());
    }
}
