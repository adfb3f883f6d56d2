use std::{process, sync::Arc};

use inazuma::{
    cache::S3Store,
    config,
    error::AppError,
    infra::{
        error::InfraError,
        http::{AppState, EdgePurger, ReverseProxy, build_router},
        lock::{LockClient, RedisLockBackend},
        origin::OriginClient,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = Arc::new(S3Store::from_settings(&settings.s3).await);

    let lock_backend = RedisLockBackend::connect(&settings.redis)
        .await
        .map_err(|err| InfraError::connectivity(format!("lock KV unavailable: {err}")))?;
    let locks = LockClient::new(Arc::new(lock_backend));

    let origin = Arc::new(
        OriginClient::new(&settings.mediawiki.base_url)
            .map_err(|err| InfraError::configuration(err.to_string()))?,
    );
    let proxy = Arc::new(
        ReverseProxy::new(&settings.mediawiki.base_url)
            .map_err(|err| InfraError::configuration(err.to_string()))?,
    );
    let edge = match settings.purge.nginx_purge_url.as_deref() {
        Some(url) => Some(Arc::new(
            EdgePurger::new(url).map_err(|err| InfraError::configuration(err.to_string()))?,
        )),
        None => None,
    };

    let listen_addr = settings.server.listen_addr;
    let state = AppState {
        settings: Arc::new(settings),
        store,
        locks,
        origin,
        proxy,
        edge,
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(target = "inazuma::server", addr = %listen_addr, "listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!(
            target = "inazuma::server",
            "failed to listen for shutdown signal"
        );
        return;
    }
    info!(target = "inazuma::server", "shutdown signal received");
}
