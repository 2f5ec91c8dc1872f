use std::{error::Error, fs::create_dir_all, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use clap::Parser;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use pushrelay_core::{
    app::build_app,
    auth::{AccessTokenCache, Clock, DATASTORE_SCOPE, FCM_SCOPE, SystemClock, TokenMinter},
    config::CoreArgs,
    credentials::{Credentials, SERVICE_ACCOUNT_ENV},
    notify::NotificationSender,
    providers::FcmService,
    storage::{FirestoreSettings, new_store},
};

use crate::providers::GoogleTokenMinter;

mod providers;

const OAUTH_TIMEOUT: Duration = Duration::from_secs(60);
const FCM_SCOPES: &[&str] = &[FCM_SCOPE];
const DATASTORE_SCOPES: &[&str] = &[DATASTORE_SCOPE];

#[derive(Parser, Debug, Clone)]
#[command(name = "pushrelay", version, about = "FCM notification relay and token broker")]
struct Args {
    #[command(flatten)]
    core: CoreArgs,

    /// JSON-encoded Google service-account key.
    #[arg(env = SERVICE_ACCOUNT_ENV, long = "service-account-key", hide_env_values = true)]
    service_account_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.core.uses_local_store() {
        create_dir_all(&args.core.data_path).map_err(|err| {
            std::io::Error::new(
                err.kind(),
                format!(
                    "failed to create data directory {}: {err}",
                    args.core.data_path
                ),
            )
        })?;
    }

    let credentials = Credentials::from_env_value(args.service_account_key.as_deref());
    if let Err(err) = credentials.key() {
        tracing::warn!(error = %err, "service account key unavailable; token requests will fail");
    }

    let oauth_client = reqwest::Client::builder()
        .user_agent(concat!("pushrelay/", env!("CARGO_PKG_VERSION")))
        .timeout(OAUTH_TIMEOUT)
        .build()?;
    let minter: Arc<dyn TokenMinter> =
        Arc::new(GoogleTokenMinter::new(&credentials, oauth_client));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let fcm_tokens = Arc::new(AccessTokenCache::new(
        Arc::clone(&minter),
        Arc::clone(&clock),
        FCM_SCOPES,
    ));
    let store_tokens = Arc::new(AccessTokenCache::new(
        Arc::clone(&minter),
        Arc::clone(&clock),
        DATASTORE_SCOPES,
    ));

    let users = new_store(
        &args.core.data_path,
        args.core.store_url.as_deref(),
        FirestoreSettings {
            base_url: &args.core.firestore_url,
            credentials: &credentials,
            tokens: store_tokens,
        },
    )?;
    let fcm = Arc::new(FcmService::new(
        Arc::clone(&fcm_tokens),
        &credentials,
        &args.core.fcm_url,
    )?);
    let sender = Arc::new(NotificationSender::new(users, fcm));

    let app: Router = build_app(&args.core, sender, fcm_tokens, clock);
    let addr: SocketAddr = args.core.http_addr.parse()?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "pushrelay listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
