// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! yardd: the Switchyard broker daemon.

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use yard_broker::{acquire, bind_tcp, cleanup, Broker, DaemonPaths, ListenCtx, Listener};
use yard_core::{BrokerConfig, SystemClock};
use yard_store::{MemoryStore, RedisStore, Store};

#[derive(Parser, Debug)]
#[command(name = "yardd", about = "Switchyard job broker daemon", version)]
struct Args {
    /// Path to a broker config file (toml)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Redis URL; defaults to $YARD_REDIS_URL or redis://127.0.0.1:6379
    #[arg(long)]
    store_url: Option<String>,

    /// Run against an embedded in-memory store (single process, no
    /// persistence) instead of Redis
    #[arg(long)]
    memory: bool,

    /// Also listen on this TCP address (host:port); clients must
    /// authenticate with $YARD_AUTH_TOKEN when it is set
    #[arg(long)]
    tcp: Option<String>,
}

fn main() {
    let args = Args::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("yardd: cannot start runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run(args)) {
        eprintln!("yardd: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let paths = DaemonPaths::load()?;
    init_tracing(&paths);

    let cfg = match &args.config {
        Some(path) => BrokerConfig::load(path)?,
        None => BrokerConfig::default(),
    };

    let (lock, unix) = acquire(&paths)?;

    if args.memory {
        info!("starting with embedded in-memory store");
        let store = Arc::new(MemoryStore::new());
        serve(store, cfg, unix, args, paths, lock).await
    } else {
        let url = args
            .store_url
            .clone()
            .or_else(|| std::env::var("YARD_REDIS_URL").ok())
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        info!(url = %url, "connecting to store");
        let store = Arc::new(RedisStore::connect(&url).await?);
        serve(store, cfg, unix, args, paths, lock).await
    }
}

async fn serve<S: Store>(
    store: Arc<S>,
    cfg: BrokerConfig,
    unix: tokio::net::UnixListener,
    args: Args,
    paths: DaemonPaths,
    lock: yard_broker::PidLock,
) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Broker::new(store, SystemClock, cfg);
    let shutdown = CancellationToken::new();
    broker.spawn_background(&shutdown);
    broker.ingress.refresh_webhook_cache().await.ok();

    let ctx = Arc::new(ListenCtx {
        broker,
        auth_token: std::env::var("YARD_AUTH_TOKEN").ok(),
        shutdown: shutdown.clone(),
    });

    let listener = match &args.tcp {
        Some(addr) => {
            let tcp = bind_tcp(addr).await?;
            info!(addr = %addr, "listening on tcp");
            Listener::with_tcp(unix, tcp, Arc::clone(&ctx))
        }
        None => Listener::new(unix, Arc::clone(&ctx)),
    };

    info!(socket = %paths.socket_path.display(), "broker started");
    let listener_task = tokio::spawn(listener.run());

    tokio::select! {
        _ = shutdown.cancelled() => info!("shutdown requested"),
        _ = wait_for_signal() => {
            info!("signal received, shutting down");
            shutdown.cancel();
        }
    }

    let _ = listener_task.await;
    cleanup(&paths);
    drop(lock);
    info!("broker stopped");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("cannot install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

fn init_tracing(paths: &DaemonPaths) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::fs::create_dir_all(&paths.state_dir).is_ok() {
        let appender = tracing_appender::rolling::never(
            &paths.state_dir,
            paths.log_path.file_name().unwrap_or_default(),
        );
        fmt().with_env_filter(filter).with_writer(appender).with_ansi(false).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
