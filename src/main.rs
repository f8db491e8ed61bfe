use std::{future::IntoFuture, process};

use contentproxy::{
    application::error::AppError,
    cache::{ConfigHandle, Coordinator, ProxyConfig},
    config::{self, CliArgs, Settings},
    infra::{
        self,
        error::InfraError,
        http::{self, HttpState, MetricsEndpoint},
        metrics, telemetry, upstream,
    },
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
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

    telemetry::init(&settings.logging)?;

    let command = cli_args
        .command
        .clone()
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => run_serve(cli_args, settings).await,
    }
}

async fn run_serve(cli_args: CliArgs, settings: Settings) -> Result<(), AppError> {
    let client = upstream::build_client(settings.backend.timeout)?;
    let config = ConfigHandle::new(ProxyConfig::from(&settings));
    let proxy = infra::build_proxy_service(client, config.clone());

    let scrape = if settings.metrics.enabled {
        Some(MetricsEndpoint {
            path: settings.metrics.path.clone(),
            handle: metrics::install()?,
        })
    } else {
        None
    };

    let state = HttpState {
        proxy,
        metrics: scrape,
    };

    let reload = spawn_config_reload(cli_args, config);
    let result = serve_http(&settings, state).await;
    reload.abort();

    result
}

async fn serve_http(settings: &Settings, state: HttpState) -> Result<(), AppError> {
    let coordinator = state.proxy.coordinator().clone();
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "listening");

    let (stopping_tx, stopping_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(stop_accepting(coordinator, stopping_tx))
        .into_future();

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            if stopping_rx.await.is_ok() {
                tokio::time::sleep(grace).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(grace_seconds = grace.as_secs(), "graceful shutdown deadline elapsed");
        }
    }

    Ok(())
}

/// Resolves once a stop signal arrived and the coordinator released its waiters.
async fn stop_accepting(coordinator: Coordinator, stopping: oneshot::Sender<()>) {
    shutdown_signal().await;
    let _ = stopping.send(());

    let released = coordinator.shutdown().await;
    info!(released_waiters = released, "shutdown signal received");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Reload settings on SIGHUP and publish a new snapshot. The listener is not re-bound.
fn spawn_config_reload(cli_args: CliArgs, config: ConfigHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut hangups = match signal(SignalKind::hangup()) {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "failed to listen for SIGHUP; reload disabled");
                    return;
                }
            };

            while hangups.recv().await.is_some() {
                match config::load(&cli_args) {
                    Ok(settings) => {
                        let version = config.replace(ProxyConfig::from(&settings));
                        info!(
                            version,
                            backend_url = %settings.backend.url,
                            webhooks = settings.webhooks.urls.len(),
                            "configuration reloaded"
                        );
                    }
                    Err(err) => {
                        error!(error = %err, "configuration reload failed; keeping current snapshot");
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (cli_args, config);
        }
    })
}
