//! armor-daemon entry point.
//!
//! Thin on purpose: load config, set up tracing, pick the policy store, wire
//! middleware and serve until a shutdown signal arrives. Handlers live in
//! `routes.rs`, the request pipeline in `orchestrator.rs`.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use anyhow::Context;
use armor_config::{secrets, ArmorConfig, LogFormat};
use armor_daemon::{routes, state};
use armor_store::{MemoryPolicyStore, PolicyStore, RestPolicyStore};
use axum::http::Method;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[derive(Debug, Parser)]
#[command(name = "armor-daemon", version, about = "Security policy reconciliation API")]
struct Cli {
    /// YAML config file; repeat to layer, later files win.
    #[arg(long = "config", value_name = "PATH")]
    config: Vec<String>,

    /// Listen address, e.g. 127.0.0.1:8080.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Serve from an in-memory policy store instead of the provider.
    #[arg(long)]
    development_mode: bool,

    #[arg(long)]
    log_level: Option<String>,

    /// json | text
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    fn apply(&self, cfg: &mut ArmorConfig) -> anyhow::Result<()> {
        if let Some(addr) = self.addr {
            cfg.addr = addr;
        }
        if self.development_mode {
            cfg.development_mode = true;
        }
        if let Some(level) = &self.log_level {
            cfg.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            cfg.log_format = LogFormat::parse(format)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if missing.
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();
    let paths: Vec<&str> = cli.config.iter().map(String::as_str).collect();
    let env: BTreeMap<String, String> = armor_config::env_overrides_from_process();
    let (mut cfg, loaded) = armor_config::load_config(&paths, &env).context("config load failed")?;
    cli.apply(&mut cfg).context("invalid command line")?;

    init_tracing(&cfg);

    info!(
        config_hash = %loaded.config_hash,
        development_mode = cfg.development_mode,
        protected_rules = ?cfg.protected_rules,
        request_timeout_secs = cfg.request_timeout_secs,
        "starting"
    );

    let secrets = secrets::resolve_secrets(&cfg).context("secret resolution failed")?;
    let store: Arc<dyn PolicyStore> = if cfg.development_mode {
        warn!("development mode: serving from an in-memory policy store");
        Arc::new(MemoryPolicyStore::new())
    } else {
        Arc::new(RestPolicyStore::new_with_base_url(
            secrets.provider_token.clone(),
            cfg.provider.base_url.clone(),
        ))
    };

    let shutdown = CancellationToken::new();
    let shared = Arc::new(state::AppState::from_config(&cfg, store, shutdown.clone()));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors());

    let listener = tokio::net::TcpListener::bind(cfg.addr)
        .await
        .with_context(|| format!("bind {} failed", cfg.addr))?;
    info!(
        service = shared.build.service,
        version = shared.build.version,
        store = shared.orchestrator.store_name(),
        "listening on http://{}",
        cfg.addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server crashed")?;

    info!("armor-daemon stopped");
    Ok(())
}

fn init_tracing(cfg: &ArmorConfig) {
    // RUST_LOG wins over the configured level.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cfg.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any)
}

/// Resolve on SIGINT or SIGTERM, cancelling in-flight provider calls.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received; cancelling in-flight provider calls");
    token.cancel();
}
