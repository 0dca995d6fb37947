use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use navplay_core::{RawUpstreamConfig, SubsonicClient};
use tracing::{error, info, warn};

/// navplay server: a small web player in front of a Navidrome / Subsonic server.
#[derive(Parser)]
#[command(name = "navplay-server")]
struct Args {
    /// Base URL of the Subsonic-compatible server.
    /// Also read from NAVIDROME_BASE_URL or SUBSONIC_URL.
    #[arg(long, env = "NAVIDROME_URL")]
    upstream_url: Option<String>,

    /// Upstream username. Also read from NAVIDROME_USER.
    #[arg(long, env = "SUBSONIC_USER")]
    user: Option<String>,

    /// Upstream password. Also read from NAVIDROME_PASS or NAVIDROME_PASSWORD.
    #[arg(long, env = "SUBSONIC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Pre-computed md5(password + salt), used instead of a password.
    #[arg(long, env = "SUBSONIC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Salt that goes with --token.
    #[arg(long, env = "SUBSONIC_SALT", hide_env_values = true)]
    salt: Option<String>,

    /// How the password is sent: "token" (salted md5) or "password" (hex encoded).
    #[arg(long, env = "SUBSONIC_AUTH")]
    auth_mode: Option<String>,

    /// Subsonic API version to announce.
    #[arg(long, default_value = "1.16.1", env = "SUBSONIC_VERSION")]
    api_version: String,

    /// Client name to announce.
    #[arg(long, default_value = "navplay", env = "SUBSONIC_CLIENT")]
    client_name: String,

    /// Seconds to wait for the upstream connection to open.
    #[arg(long, default_value = "10", env = "UPSTREAM_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Port to listen on.
    #[arg(long, default_value = "5069", env = "PORT")]
    port: u16,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "BIND")]
    bind: String,

    /// Directory holding index.html and its assets.
    #[arg(long, default_value = "web", env = "WEB_DIR")]
    web_dir: PathBuf,
}

impl Args {
    fn upstream(&self) -> RawUpstreamConfig {
        RawUpstreamConfig {
            url: self.upstream_url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            token: self.token.clone(),
            salt: self.salt.clone(),
            auth_mode: self.auth_mode.clone(),
            api_version: Some(self.api_version.clone()),
            client_name: Some(self.client_name.clone()),
            connect_timeout_secs: Some(self.connect_timeout),
        }
    }
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    configure_logging();

    if let Ok(path) = dotenvy::dotenv() {
        info!("loaded environment from {}", path.display());
    }

    let args = Args::parse();

    let config = args
        .upstream()
        .with_env_aliases(|name| std::env::var(name).ok())
        .resolve()
        .unwrap_or_else(|e| {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        });

    info!(
        "upstream {} as user {} ({:?} auth)",
        config.base_url, config.credentials.username, config.auth_mode
    );

    let client = SubsonicClient::new(Arc::new(config)).unwrap_or_else(|e| {
        error!("failed to create upstream client: {e}");
        std::process::exit(1);
    });

    if navplay_server::web::check_web_dir(&args.web_dir) {
        info!("serving web UI from {}", args.web_dir.display());
    }

    let app = navplay_server::app(Arc::new(client), &args.web_dir);
    let addr = format!("{}:{}", args.bind, args.port);

    info!("binding to {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!("failed to bind to {addr}: {e}");
            std::process::exit(1);
        });

    info!("navplay-server listening on http://{addr}");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {e}");
        std::process::exit(1);
    }

    info!("navplay-server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
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

    info!("shutdown signal received");
}
