#![forbid(unused_must_use)]
// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

use crate::handlers::*;
use app_config::uploads::UploadsConfig;
use app_config::AppConfig;
use axum::Router;
use clap::ArgMatches;
use directories::ProjectDirs;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use local_stash::LocalStash;
use rendezvous::Rendezvous;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use transfer_queue::{QueueOptions, TransferQueue};
use transport_ftp::FtpTransport;
use transport_traits::TryCreateFromConfig;

mod commands;
mod handlers;
mod health;
mod logging;
mod services;
#[cfg(test)]
mod test_support;
mod validation;

/// Multipart framing on top of the largest accepted batch of files.
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    shutdown_tx: broadcast::Sender<()>,
    queue: Arc<TransferQueue>,
    stash: LocalStash,
    uploads: Arc<UploadsConfig>,
    token: Arc<str>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let matches = commands::build_command().get_matches();
    logging::initialize_from_matches(&matches);

    info!("Hi. 👋");

    let dirs = match ProjectDirs::from("org", "eventfolio", "eventfolio") {
        Some(dirs) => dirs,
        None => {
            error!("Could not determine the project directories");
            return ExitCode::FAILURE;
        }
    };

    let cfg = match AppConfig::load(dirs.config_local_dir(), &matches) {
        Ok(config) => config,
        Err(_) => return ExitCode::from(exitcode::CONFIG as u8),
    };

    let token: Arc<str> = match cfg.uploads.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Arc::from(token),
        None => {
            error!("No upload token configured, set uploads.token or EVENTFOLIO__UPLOADS__TOKEN");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    let stash = match LocalStash::open(
        cfg.uploads.directory.clone(),
        cfg.uploads.allowed_extensions.clone(),
    )
    .await
    {
        Ok(stash) => stash,
        Err(e) => {
            error!("Unable to open the upload directory: {e}");
            return ExitCode::from(exitcode::CANTCREAT as u8);
        }
    };
    info!("Stashing uploads in {root:?}", root = stash.root());

    let transport = match FtpTransport::create(&cfg) {
        Ok(transport) => transport,
        Err(_) => return ExitCode::from(exitcode::CONFIG as u8),
    };

    // Provide a signal that can be used to shut down the server.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    register_shutdown_handler(shutdown_tx.clone());

    // Create a rendezvous channel to ensure all relevant tasks have been shut down.
    let rendezvous = Rendezvous::new();

    let options = QueueOptions::from_config(&cfg.queue, stash.root());
    let queue = match TransferQueue::start(
        options,
        transport,
        stash.clone(),
        rendezvous.fork_guard(),
    )
    .await
    {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!("Unable to start the transfer queue: {e}");
            return ExitCode::FAILURE;
        }
    };

    let body_limit = cfg
        .uploads
        .max_file_size_bytes()
        .saturating_mul(cfg.uploads.max_files_per_request)
        .saturating_add(BODY_LIMIT_OVERHEAD);

    // The application state is shared with the Axum servers.
    let app_state = AppState {
        shutdown_tx: shutdown_tx.clone(),
        queue: queue.clone(),
        stash,
        uploads: Arc::new(cfg.uploads),
        token,
    };

    let exit_code = serve_requests(matches, app_state, body_limit).await.err();

    // If all servers are shut down, ensure the news is broadcast as well.
    stop_all_servers(shutdown_tx);

    queue.shutdown().await;
    rendezvous.rendezvous_async().await.ok();

    info!("Bye. 👋");
    exit_code.unwrap_or(ExitCode::SUCCESS)
}

fn stop_all_servers(shutdown_tx: broadcast::Sender<()>) {
    // We take ownership of this channel so that it'll be closed after.
    shutdown_tx.send(()).ok();
}

/// Assembles the HTTP API.
fn build_router(app_state: AppState, body_limit: usize) -> Router {
    let shutdown_rx = app_state.shutdown_tx.subscribe();

    Router::new()
        .map_metrics_endpoint()
        .map_shutdown_endpoint()
        .map_health_endpoints()
        .map_upload_endpoint(body_limit)
        .map_admin_endpoints()
        .with_state(app_state)
        .layer(services::ShutdownLayer::new(shutdown_rx))
        .layer(services::RequestMetricsLayer)
}

async fn serve_requests(
    matches: ArgMatches,
    app_state: AppState,
    body_limit: usize,
) -> Result<(), ExitCode> {
    let shutdown_tx = app_state.shutdown_tx.clone();
    let app = build_router(app_state, body_limit);

    // Get the HTTP socket addresses to bind on.
    let http_sockets: Vec<SocketAddr> = matches
        .get_many("bind_http")
        .into_iter()
        .flatten()
        .cloned()
        .collect();

    let mut servers = FuturesUnordered::new();
    for addr in http_sockets {
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Unable to bind to {addr}: {e}");

                // No server is running yet since none was awaited so far.
                return Err(ExitCode::from(exitcode::NOPERM as u8));
            }
        };

        info!("Now listening on http://{addr}");
        let mut shutdown_rx = shutdown_tx.subscribe();
        let server = axum::serve(listener, app.clone()).with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
        });
        servers.push(async move { (addr, server.await) });
    }

    // Wait for all servers to stop.
    let mut exit_code = None;
    while let Some((addr, result)) = servers.next().await {
        match result {
            Ok(()) => info!("Server on {addr} stopped"),
            Err(e) => {
                error!("Server on {addr} failed: {e}");
                exit_code = Some(ExitCode::FAILURE);

                // Ensure that all other servers also shut down in presence
                // of an error of any one of them.
                shutdown_tx.send(()).ok();
            }
        }
    }

    match exit_code {
        Some(exit_code) => Err(exit_code),
        None => Ok(()),
    }
}

fn register_shutdown_handler(shutdown_tx: broadcast::Sender<()>) {
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Initiating shutdown from OS");
        shutdown_tx.send(()).ok();
    }) {
        error!("Unable to register the process termination handler: {e}");
    }
}
