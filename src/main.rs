use anyhow::Context;
use gcache_proxy::cluster::{RedisCluster, SharedCluster};
use gcache_proxy::config::{self, ProxyConfig};
use gcache_proxy::discovery::{self, LogRegistry, Registry};
use gcache_proxy::monitor::Monitor;
use gcache_proxy::server;
use gcache_proxy::session::ProxyContext;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Parse command line args
    let args: Vec<String> = std::env::args().skip(1).collect();
    let path = config::config_path(&args);
    let mut config = ProxyConfig::from_file(path)
        .with_context(|| format!("failed to load config from '{path}'"))?;
    config.apply_args(&args);

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.cpu_num > 0 {
        builder.worker_threads(config.cpu_num);
    }
    let runtime = builder.enable_all().build()?;
    info!(
        config = %path,
        clusters = config.clusters.len(),
        cpu_num = config.cpu_num,
        "starting proxy"
    );
    runtime.block_on(run(config))
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let monitor = Monitor::new();
    monitor.start(config.monitor_interval, &shutdown);
    let registry = LogRegistry::new(config.registry_servers.clone());

    let mut clusters: Vec<SharedCluster> = Vec::with_capacity(config.clusters.len());
    let mut listeners = JoinSet::new();
    for cluster_config in config.clusters {
        let cluster_config = Arc::new(cluster_config);
        let listener = server::bind(&cluster_config.listen, cluster_config.backlog)
            .await
            .with_context(|| format!("failed to bind {}", cluster_config.listen))?;
        let cluster: SharedCluster = Arc::new(
            RedisCluster::connect(&cluster_config)
                .await
                .with_context(|| format!("failed to connect cluster '{}'", cluster_config.name))?,
        );
        registry.register(
            &cluster_config.name,
            &discovery::advertise_addr(&cluster_config.listen),
        );
        clusters.push(cluster.clone());

        let ctx = ProxyContext {
            config: cluster_config,
            cluster,
            metrics: monitor.clone(),
        };
        listeners.spawn(server::run_listener(listener, ctx, shutdown.clone()));
    }

    shutdown_signal().await;
    info!("Shutting down...");
    shutdown.cancel();
    while let Some(result) = listeners.join_next().await {
        match result {
            Ok(Err(e)) => warn!(error = %e, "listener exited with error"),
            Err(e) => warn!(error = %e, "listener task failed"),
            Ok(Ok(())) => {}
        }
    }

    registry.close();
    for cluster in &clusters {
        cluster.close().await;
    }
    monitor.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
