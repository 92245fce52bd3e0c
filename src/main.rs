use anyhow::{anyhow, Context, Result};
use req_telemetry::config::AppConfig;
use req_telemetry::http::{create_api_router, ApiState};
use req_telemetry::role::{NoVerification, RoleResolver, StaticTokenResolver};
use req_telemetry::store::{CounterStore, RedisStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal telemetry service error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::load().context("load configuration from environment")?;
    let listen_addr = config.listen_addr()?;

    // No connection is made here; the first store call connects.
    let store: Arc<dyn CounterStore> = Arc::new(
        RedisStore::new(config.redis_url.as_str(), config.store_options())
            .map_err(|e| anyhow!("create counter store client: {e}"))?,
    );

    let resolver: Arc<dyn RoleResolver> = match &config.role_tokens {
        Some(tokens) => Arc::new(
            StaticTokenResolver::parse(tokens).context("parse TELEMETRY__ROLE_TOKENS")?,
        ),
        None => {
            warn!("no role tokens configured; every caller resolves to anonymous");
            Arc::new(NoVerification)
        }
    };

    let state = ApiState::from_config(store.clone(), resolver, &config);

    let app = App {
        config: Arc::new(config),
        listen_addr,
        store,
        state,
    };
    app.run().await
}

struct App {
    config: Arc<AppConfig>,
    listen_addr: SocketAddr,
    store: Arc<dyn CounterStore>,
    state: ApiState,
}

impl App {
    async fn run(self) -> Result<()> {
        info!(
            address = %self.listen_addr,
            redis = %redacted(&self.config.redis_url),
            prefix = %self.config.key_prefix,
            recent_capacity = self.config.recent_capacity,
            "request telemetry service online"
        );

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .with_context(|| format!("bind API server address {}", self.listen_addr))?;
        let api_router = create_api_router(self.state.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                api_router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                warn!(error = %e, "API server error");
            }
        });

        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!(
                        store = %self.store.connection_state(),
                        pending_recordings = self.state.recorder.pending(),
                        "telemetry heartbeat"
                    );
                }
                res = tokio::signal::ctrl_c() => {
                    if let Err(err) = res {
                        warn!(error = %err, "ctrl_c listener error");
                    }
                    info!("Shutdown signal received, draining");
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(());
        if let Err(e) = server.await {
            warn!(error = %e, "API server task failed");
        }
        self.state.recorder.drain().await;
        info!("telemetry recordings flushed, exiting");
        Ok(())
    }
}

/// Endpoint for logging with any password stripped.
fn redacted(url: &url::Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }
    url.to_string()
}

fn init_tracing() -> Result<()> {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,hyper=warn,tower_http=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
