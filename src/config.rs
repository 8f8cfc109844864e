use crate::error::{ProxyError, ProxyResult};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "proxy.toml";

/// Process-wide settings plus one entry per proxied cluster.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Runtime worker threads; 0 means one per CPU.
    pub cpu_num: usize,
    pub log_level: String,
    pub monitor_interval: Duration,
    /// Coordination-service endpoints listeners register under.
    pub registry_servers: Vec<String>,
    pub clusters: Vec<ClusterConfig>,
}

/// Immutable settings for one listener and the cluster behind it.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub listen: String,
    pub servers: Vec<String>,
    pub prefix: Option<Bytes>,
    /// Bound on resident client connections, and intake queue capacity.
    pub client_connections: usize,
    /// Backend connect timeout in milliseconds.
    pub timeout: u64,
    pub backlog: u32,
    /// Backend response timeout in milliseconds.
    pub server_retry_timeout: u64,
    /// Retries before a backend call is reported as failed.
    pub server_failure_limit: u32,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            name: "default".to_string(),
            listen: "127.0.0.1:7000".to_string(),
            servers: vec!["127.0.0.1:6379".to_string()],
            prefix: None,
            client_connections: 102_400,
            timeout: 2000,
            backlog: 1024,
            server_retry_timeout: 200,
            server_failure_limit: 2,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl ClusterConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.server_retry_timeout)
    }

    pub fn prefix(&self) -> Option<&[u8]> {
        self.prefix.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    cpu_num: usize,
    log_level: String,
    /// Seconds between metrics flushes.
    monitor_interval: u64,
    registry_servers: Vec<String>,
    client_connections: i64,
    timeout: i64,
    backlog: i64,
    server_retry_timeout: i64,
    server_failure_limit: i64,
    /// Milliseconds; 0 disables.
    read_timeout: i64,
    write_timeout: i64,
    clusters: Vec<RawCluster>,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            cpu_num: 0,
            log_level: "info".to_string(),
            monitor_interval: 10,
            registry_servers: Vec::new(),
            client_connections: 102_400,
            timeout: 2000,
            backlog: 1024,
            server_retry_timeout: 200,
            server_failure_limit: 2,
            read_timeout: 0,
            write_timeout: 0,
            clusters: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    name: String,
    listen: String,
    #[serde(default)]
    servers: Vec<String>,
    #[serde(default)]
    prefix: Option<String>,
    client_connections: Option<i64>,
    timeout: Option<i64>,
    backlog: Option<i64>,
    server_retry_timeout: Option<i64>,
    server_failure_limit: Option<i64>,
    read_timeout: Option<i64>,
    write_timeout: Option<i64>,
}

/// Per-cluster value if set and positive, otherwise the global one.
fn inherit(local: Option<i64>, global: i64) -> i64 {
    local.filter(|v| *v > 0).unwrap_or(global)
}

fn millis(ms: i64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms as u64))
}

impl ProxyConfig {
    pub fn from_file(path: &str) -> ProxyResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("failed to read '{path}': {e}")))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> ProxyResult<Self> {
        let raw: RawConfig = toml::from_str(contents)
            .map_err(|e| ProxyError::Config(format!("failed to parse TOML: {e}")))?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> ProxyResult<Self> {
        if raw.clusters.is_empty() {
            return Err(ProxyError::Config("no clusters configured".to_string()));
        }

        let mut names = HashSet::new();
        let mut clusters = Vec::with_capacity(raw.clusters.len());
        for rc in raw.clusters {
            if !names.insert(rc.name.clone()) {
                return Err(ProxyError::Config(format!("duplicate cluster '{}'", rc.name)));
            }
            if rc.listen.trim().is_empty() {
                return Err(ProxyError::Config(format!("cluster '{}' has no listen address", rc.name)));
            }
            if rc.servers.is_empty() {
                return Err(ProxyError::Config(format!("cluster '{}' has no servers", rc.name)));
            }

            clusters.push(ClusterConfig {
                prefix: rc
                    .prefix
                    .filter(|p| !p.is_empty())
                    .map(|p| Bytes::from(p.into_bytes())),
                client_connections: inherit(rc.client_connections, raw.client_connections).max(1)
                    as usize,
                timeout: inherit(rc.timeout, raw.timeout).max(0) as u64,
                backlog: inherit(rc.backlog, raw.backlog).clamp(1, i64::from(u32::MAX)) as u32,
                server_retry_timeout: inherit(rc.server_retry_timeout, raw.server_retry_timeout)
                    .max(0) as u64,
                server_failure_limit: inherit(rc.server_failure_limit, raw.server_failure_limit)
                    .clamp(0, i64::from(u32::MAX)) as u32,
                read_timeout: millis(inherit(rc.read_timeout, raw.read_timeout)),
                write_timeout: millis(inherit(rc.write_timeout, raw.write_timeout)),
                name: rc.name,
                listen: rc.listen,
                servers: rc.servers,
            });
        }

        Ok(ProxyConfig {
            cpu_num: raw.cpu_num,
            log_level: raw.log_level,
            monitor_interval: Duration::from_secs(raw.monitor_interval.max(1)),
            registry_servers: raw.registry_servers,
            clusters,
        })
    }

    /// Apply command-line overrides on top of the file.
    pub fn apply_args(&mut self, args: &[String]) {
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--log-level" | "--loglevel" => {
                    if i + 1 < args.len() {
                        self.log_level = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--cpu-num" => {
                    if i + 1 < args.len() {
                        if let Ok(n) = args[i + 1].parse() {
                            self.cpu_num = n;
                        }
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }
}

/// The `--config` path from the command line, or the default.
pub fn config_path(args: &[String]) -> &str {
    args.iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cpu_num = 4
client_connections = 500
timeout = 1500
read_timeout = 300
registry_servers = ["zk1:2181", "zk2:2181"]

[[clusters]]
name = "orders"
listen = "127.0.0.1:7001"
servers = ["10.0.0.1:6379", "10.0.0.2:6379"]
prefix = "tenant1"
client_connections = 0

[[clusters]]
name = "sessions"
listen = "0.0.0.0:7002"
servers = ["10.0.1.1:6379"]
prefix = ""
timeout = 50
backlog = 16
"#;

    #[test]
    fn test_parse_sample() {
        let config = ProxyConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.cpu_num, 4);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.monitor_interval, Duration::from_secs(10));
        assert_eq!(config.registry_servers.len(), 2);
        assert_eq!(config.clusters.len(), 2);

        let orders = &config.clusters[0];
        assert_eq!(orders.name, "orders");
        assert_eq!(orders.prefix(), Some(&b"tenant1"[..]));
        assert_eq!(orders.client_connections, 500);
        assert_eq!(orders.timeout, 1500);
        assert_eq!(orders.backlog, 1024);
        assert_eq!(orders.server_retry_timeout, 200);
        assert_eq!(orders.server_failure_limit, 2);
        assert_eq!(orders.read_timeout, Some(Duration::from_millis(300)));
        assert_eq!(orders.write_timeout, None);

        let sessions = &config.clusters[1];
        assert_eq!(sessions.prefix(), None);
        assert_eq!(sessions.timeout, 50);
        assert_eq!(sessions.backlog, 16);
        assert_eq!(sessions.connect_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_empty_clusters() {
        assert!(matches!(ProxyConfig::from_toml("cpu_num = 1"), Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let toml = r#"
[[clusters]]
name = "a"
listen = "127.0.0.1:7001"
servers = ["x:1"]

[[clusters]]
name = "a"
listen = "127.0.0.1:7002"
servers = ["y:1"]
"#;
        assert!(matches!(ProxyConfig::from_toml(toml), Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_rejects_missing_servers() {
        let toml = r#"
[[clusters]]
name = "a"
listen = "127.0.0.1:7001"
"#;
        assert!(matches!(ProxyConfig::from_toml(toml), Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_toml() {
        assert!(ProxyConfig::from_toml("clusters = 3").is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = ProxyConfig::from_toml(SAMPLE).unwrap();
        let args: Vec<String> = ["--log-level", "debug", "--cpu-num", "2", "--bogus"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.apply_args(&args);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.cpu_num, 2);
    }

    #[test]
    fn test_config_path() {
        let args = vec!["--config".to_string(), "/etc/proxy.toml".to_string()];
        assert_eq!(config_path(&args), "/etc/proxy.toml");
        assert_eq!(config_path(&[]), DEFAULT_CONFIG_PATH);
    }
}
