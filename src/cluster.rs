//! The backend seam: a cluster client that executes one command and hands
//! back a typed reply.

use crate::config::ClusterConfig;
use crate::error::{ProxyError, ProxyResult};
use async_trait::async_trait;
use bytes::Bytes;
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use std::sync::Arc;
use tracing::info;

/// A reply produced by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Status(String),
    Int(i64),
    Bulk(Bytes),
    Array(Vec<Value>),
    /// Error reported by the backend inside a reply, as opposed to a failed call.
    Error(String),
}

impl Value {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::Bulk(data.into())
    }

    pub fn status(s: impl Into<String>) -> Self {
        Value::Status(s.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Status(_) => "status",
            Value::Int(_) => "integer",
            Value::Bulk(_) => "bulk",
            Value::Array(_) => "array",
            Value::Error(_) => "error",
        }
    }
}

impl From<redis::Value> for Value {
    fn from(value: redis::Value) -> Self {
        match value {
            redis::Value::Nil => Value::Nil,
            redis::Value::Okay => Value::Status("OK".to_string()),
            redis::Value::SimpleString(s) => Value::Status(s),
            redis::Value::Int(n) => Value::Int(n),
            redis::Value::BulkString(data) => Value::Bulk(Bytes::from(data)),
            redis::Value::Array(items) | redis::Value::Set(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            other => Value::Error(format!("ERR unsupported backend reply {other:?}")),
        }
    }
}

/// Executes commands against the sharded backend. Must be safe to call from
/// many sessions at once.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn execute(&self, command: &str, args: &[Bytes]) -> ProxyResult<Value>;

    async fn close(&self);
}

pub type SharedCluster = Arc<dyn ClusterClient>;

/// Cluster client backed by `redis`'s async cluster connection, which owns slot
/// routing, MOVED/ASK redirection and the per-node connection pool.
pub struct RedisCluster {
    name: String,
    conn: ClusterConnection,
}

impl RedisCluster {
    pub async fn connect(config: &ClusterConfig) -> ProxyResult<Self> {
        let nodes = config.servers.iter().map(|server| {
            if server.contains("://") {
                server.clone()
            } else {
                format!("redis://{server}")
            }
        });
        let client = ClusterClientBuilder::new(nodes)
            .connection_timeout(config.connect_timeout())
            .response_timeout(config.response_timeout())
            .retries(config.server_failure_limit)
            .build()?;
        let conn = client.get_async_connection().await?;
        info!(cluster = %config.name, servers = ?config.servers, "connected to backend cluster");
        Ok(RedisCluster {
            name: config.name.clone(),
            conn,
        })
    }
}

#[async_trait]
impl ClusterClient for RedisCluster {
    async fn execute(&self, command: &str, args: &[Bytes]) -> ProxyResult<Value> {
        let mut cmd = redis::cmd(command);
        for arg in args {
            cmd.arg(&arg[..]);
        }
        let mut conn = self.conn.clone();
        let reply: redis::Value = cmd.query_async(&mut conn).await.map_err(ProxyError::from)?;
        Ok(Value::from(reply))
    }

    async fn close(&self) {
        // Node connections are released when the last handle drops.
        info!(cluster = %self.name, "backend cluster client closed");
    }
}
