use async_trait::async_trait;
use bytes::Bytes;
use gcache_proxy::cluster::{ClusterClient, Value};
use gcache_proxy::config::ClusterConfig;
use gcache_proxy::error::ProxyResult;
use gcache_proxy::monitor::Monitor;
use gcache_proxy::server;
use gcache_proxy::session::ProxyContext;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Backend that answers from memory so the numbers measure the proxy itself.
#[derive(Default)]
struct MemoryCluster {
    strings: Mutex<HashMap<Bytes, Bytes>>,
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn execute(&self, command: &str, args: &[Bytes]) -> ProxyResult<Value> {
        let mut strings = self.strings.lock().unwrap();
        Ok(match command {
            "SET" => {
                strings.insert(args[0].clone(), args[1].clone());
                Value::status("OK")
            }
            "GET" => strings.get(&args[0]).cloned().map(Value::Bulk).unwrap_or(Value::Nil),
            _ => Value::Nil,
        })
    }

    async fn close(&self) {}
}

async fn start_proxy() -> (SocketAddr, CancellationToken) {
    let config = ClusterConfig {
        name: "bench".to_string(),
        ..Default::default()
    };
    let listener = server::bind("127.0.0.1:0", config.backlog).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ctx = ProxyContext {
        config: Arc::new(config),
        cluster: Arc::new(MemoryCluster::default()),
        metrics: Monitor::new(),
    };
    let shutdown = CancellationToken::new();
    tokio::spawn(server::run_listener(listener, ctx, shutdown.clone()));
    (addr, shutdown)
}

fn command(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n{}\r\n", part.len(), part).as_bytes());
    }
    out
}

/// Send `requests` in batches of `batch` and wait for `reply_len` bytes per request.
async fn bench(conn: &mut TcpStream, requests: &[Vec<u8>], reply_len: usize, batch: usize) -> f64 {
    let mut reply = vec![0u8; reply_len * batch];
    let start = Instant::now();
    for chunk in requests.chunks(batch) {
        let mut out = Vec::new();
        for request in chunk {
            out.extend_from_slice(request);
        }
        conn.write_all(&out).await.unwrap();
        conn.read_exact(&mut reply[..reply_len * chunk.len()]).await.unwrap();
    }
    requests.len() as f64 / start.elapsed().as_secs_f64()
}

#[tokio::main]
async fn main() {
    let (addr, shutdown) = start_proxy().await;
    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.set_nodelay(true).unwrap();
    let iterations = 10_000;

    println!("=== Proxy Benchmark ({iterations} operations) ===\n");

    let pings: Vec<_> = (0..iterations).map(|_| command(&["PING"])).collect();
    let ping_ops = bench(&mut conn, &pings, b"+PONG\r\n".len(), 1).await;
    println!("PING:   {ping_ops:>10.0} ops/sec");

    // Fixed-width keys and values keep every reply the same length.
    let sets: Vec<_> = (0..iterations)
        .map(|i| command(&["SET", &format!("key_{i:06}"), &format!("val_{i:06}")]))
        .collect();
    let set_ops = bench(&mut conn, &sets, b"+OK\r\n".len(), 1).await;
    println!("SET:    {set_ops:>10.0} ops/sec");

    let gets: Vec<_> = (0..iterations)
        .map(|i| command(&["GET", &format!("key_{i:06}")]))
        .collect();
    let get_ops = bench(&mut conn, &gets, b"$10\r\nval_000000\r\n".len(), 1).await;
    println!("GET:    {get_ops:>10.0} ops/sec");

    let pipe_ops = bench(&mut conn, &gets, b"$10\r\nval_000000\r\n".len(), 100).await;
    println!("PIPE:   {pipe_ops:>10.0} ops/sec (100-cmd pipeline batches)");

    println!("\n=== Done ===");
    shutdown.cancel();
}
