use std::sync::Arc;

use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use ytdl_proxy::{
    ApiError, AppState,
    config::{Config, build_cors_layer},
    extractor::{Extractor, YtDlp},
    router,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "ytdl_proxy=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.downloads_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create the downloads directory {:?}: {error}",
                config.downloads_dir
            ))
        })?;

    let extractor = Arc::new(YtDlp::new(&config.yt_dlp_bin));
    let state = AppState::new(extractor.clone(), config.downloads_dir.clone());
    let cors = build_cors_layer(&config.allowed_origins)?;
    let app = router(state).layer(cors);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not bind {}: {error}",
                config.bind_addr
            ))
        })?;

    info!("Server listening on http://{}", config.bind_addr);
    info!("Downloads directory: {:?}", config.downloads_dir);
    if extractor.probe().await {
        info!("yt-dlp is available and ready");
    } else {
        warn!("yt-dlp is not available. Install it first, e.g. `pip install yt-dlp`");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!("Could not listen for SIGTERM: {error}");
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

    info!("Shutting down server...");
}
