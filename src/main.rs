//! env-injector - mutating admission webhook that injects environment variables into pods

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use env_injector::config::SharedInjectionSet;
use env_injector::policy::KubeNamespaceLookup;
use env_injector::webhook::{webhook_router, WebhookState};
use env_injector::{DEFAULT_CONFIG_PATH, DEFAULT_WEBHOOK_PORT};

/// env-injector - inject environment variables into pods at admission time
#[derive(Parser, Debug)]
#[command(name = "env-injector", version, about, long_about = None)]
struct Cli {
    /// File containing the x509 certificate for HTTPS
    ///
    /// CA cert, if any, concatenated after the server cert.
    #[arg(long = "tls-cert-file", env = "TLS_CERT_FILE")]
    tls_cert_file: PathBuf,

    /// File containing the x509 private key matching --tls-cert-file
    #[arg(long = "tls-private-key-file", env = "TLS_PRIVATE_KEY_FILE")]
    tls_private_key_file: PathBuf,

    /// File containing the env vars to be injected
    #[arg(long = "env-cfg-file", env = "ENV_CFG_FILE", default_value = DEFAULT_CONFIG_PATH)]
    env_cfg_file: PathBuf,

    /// Port for the HTTPS server
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    port: u16,

    /// Do not re-read the env var config before each mutation
    #[arg(long)]
    no_reload: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(cli.log_json.then(|| fmt::layer().json()))
        .with((!cli.log_json).then(fmt::layer))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("Starting env-injector webhook");

    // A missing or broken config at startup is fatal; later reloads are not
    let injection = SharedInjectionSet::from_path(&cli.env_cfg_file)
        .await
        .map_err(|e| anyhow::anyhow!("Unable to load env var config: {}", e))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let state = WebhookState::new(injection, Arc::new(KubeNamespaceLookup::new(client)))
        .with_reload_on_mutate(!cli.no_reload);
    let app = webhook_router(Arc::new(state));

    tracing::info!(
        cert = %cli.tls_cert_file.display(),
        key = %cli.tls_private_key_file.display(),
        "Loading certs"
    );
    let tls_config = RustlsConfig::from_pem_file(&cli.tls_cert_file, &cli.tls_private_key_file)
        .await
        .map_err(|e| anyhow::anyhow!("TLS config error: {}", e))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!(addr = %addr, reload = !cli.no_reload, "Webhook server listening");

    axum_server::bind_rustls(addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
