use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use modelgate_adapter::AdapterTable;
use modelgate_core::{
    AuthSnapshot, Channel, ChannelRegistry, ErrorLogSink, QuotaLedger, RelayEngine, TokenAuth,
    UpstreamClientConfig, WreqUpstreamClient,
};
use modelgate_router::{RouterState, relay_router};
use modelgate_storage::{SeaOrmStorage, Storage};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modelgate=info,tower_http=warn".into()),
        )
        .init();

    let mut patch = cli::env_patch();
    patch.overlay(cli::Cli::parse().into_patch());
    let config = Arc::new(patch.into_config().context("merging configuration")?);

    let storage = SeaOrmStorage::connect(&config.dsn)
        .await
        .context("connecting to database")?;
    storage.sync().await.context("syncing schema")?;
    let snapshot = storage.load_snapshot().await.context("loading snapshot")?;
    info!(
        event = "bootstrap",
        channels = snapshot.channels.len(),
        users = snapshot.users.len(),
        tokens = snapshot.tokens.len(),
    );

    let storage: Arc<dyn Storage> = Arc::new(storage);
    let registry = Arc::new(ChannelRegistry::new(
        snapshot.channels.iter().map(Channel::from_row),
    ));
    let ledger = QuotaLedger::new(
        &snapshot,
        storage.clone(),
        Duration::from_secs(config.relay.reservation_ttl_secs),
    );
    let auth = Arc::new(TokenAuth::new(
        AuthSnapshot::from_storage(&snapshot),
        config.relay.clone(),
    ));
    let upstream_config = UpstreamClientConfig::from_global(&config);
    let client = Arc::new(
        WreqUpstreamClient::new(upstream_config).context("building upstream client")?,
    );
    let error_log = ErrorLogSink::new(storage.clone(), 1024);
    let adapters = Arc::new(AdapterTable::standard());

    let engine = Arc::new(RelayEngine::new(
        config.clone(),
        registry,
        ledger,
        client,
        storage,
        error_log,
        adapters,
    ));

    let app = relay_router(RouterState {
        engine,
        auth,
    });

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(event = "listening", bind = %bind);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
