//! Service registration: publishes each listener so clients can find it.

use std::net::{IpAddr, UdpSocket};
use std::sync::Mutex;
use tracing::{info, warn};

/// Root of the membership tree listeners register under.
pub const REGISTRY_ROOT: &str = "/gcache/proxy";

pub trait Registry: Send + Sync {
    fn register(&self, cluster: &str, addr: &str);

    fn close(&self);
}

/// Registry that keeps entries in memory and logs them. Entries live until
/// `close()`, mirroring ephemeral membership nodes.
#[derive(Debug, Default)]
pub struct LogRegistry {
    servers: Vec<String>,
    entries: Mutex<Vec<String>>,
}

impl LogRegistry {
    pub fn new(servers: Vec<String>) -> Self {
        LogRegistry {
            servers,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

pub fn registry_path(cluster: &str, addr: &str) -> String {
    format!("{REGISTRY_ROOT}/{cluster}/{addr}")
}

impl Registry for LogRegistry {
    fn register(&self, cluster: &str, addr: &str) {
        let path = registry_path(cluster, addr);
        if let Ok(mut entries) = self.entries.lock() {
            if entries.contains(&path) {
                return;
            }
            entries.push(path.clone());
        }
        info!(path = %path, servers = ?self.servers, "registered listener");
    }

    fn close(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            for path in entries.drain(..) {
                info!(path = %path, "deregistered listener");
            }
        }
    }
}

/// The address other hosts should use to reach `listen`. Loopback hosts are
/// replaced by this machine's outbound IP when one can be found.
pub fn advertise_addr(listen: &str) -> String {
    let Some((host, port)) = listen.rsplit_once(':') else {
        return listen.to_string();
    };
    if host != "localhost" && host != "127.0.0.1" {
        return listen.to_string();
    }
    match outbound_ip() {
        Some(ip) => format!("{ip}:{port}"),
        None => {
            warn!(listen, "could not determine outbound address, advertising as configured");
            listen.to_string()
        }
    }
}

/// Local address the OS would route external traffic from. Connecting a UDP
/// socket sends nothing.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
