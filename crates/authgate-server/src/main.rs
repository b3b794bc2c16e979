use authgate_core::event::{EventSink, FanoutSink};
use authgate_server::{shutdown_channel, AuditLogger, AuthService, Config, TracingSink};
use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// authgate - OAuth2 authentication with automatic mTLS fallback
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "authgate")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "authgate.json")]
    config_path: String,

    /// Validate configuration and exit
    #[arg(short, long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate || std::path::Path::new(&cli.config_path).exists() {
                eprintln!("Configuration error in {}: {}", cli.config_path, e);
                process::exit(1);
            }

            warn!("Could not load config file from: {}", cli.config_path);
            info!("Creating example configuration at: {}", cli.config_path);

            if let Err(e) = Config::example().to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }

            info!("Please edit {} and restart authgate", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        print_summary(&config);
        process::exit(0);
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("authgate v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);

    let mut sinks = FanoutSink::new().with(Arc::new(TracingSink));
    let mut audit_writer = None;
    if let Some(ref path) = config.audit_log_path {
        match AuditLogger::spawn(path).await {
            Ok((logger, handle)) => {
                sinks = sinks.with(Arc::new(logger));
                audit_writer = Some(handle);
            }
            Err(e) => {
                error!("Failed to open audit log {}: {}", path, e);
                process::exit(1);
            }
        }
    }
    let events: Arc<dyn EventSink> = Arc::new(sinks);

    let service = match AuthService::from_config(&config, events) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("Failed to start: {}", e);
            process::exit(1);
        }
    };

    let status_addr = match config.status_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut tasks = service.spawn_background(shutdown_rx.clone());

    match status_addr {
        #[cfg(feature = "status")]
        Some(addr) => {
            let service = Arc::clone(&service);
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) =
                    authgate_server::status::start_status_server(addr, service, shutdown).await
                {
                    error!("Status server error: {}", e);
                }
            }));
        }
        #[cfg(not(feature = "status"))]
        Some(addr) => warn!("Status endpoints not compiled in; ignoring {}", addr),
        None => {}
    }

    info!("authgate started, press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    // Drop every sender so the audit writer drains and exits
    drop(service);
    if let Some(handle) = audit_writer {
        let _ = handle.await;
    }
}

fn print_summary(config: &Config) {
    println!("Configuration validated successfully");
    println!();
    println!(
        "  Health thresholds: {} failures / {} successes",
        config.failure_threshold, config.success_threshold
    );
    match &config.idp {
        Some(idp) => println!("  IdP: {} (client {})", idp.issuer_url, idp.client_id),
        None => println!("  IdP: none (mTLS only)"),
    }
    match (&config.crl.url, &config.crl.path) {
        (Some(url), _) => println!("  CRL: {}", url),
        (None, Some(path)) => println!("  CRL: {}", path),
        (None, None) => {}
    }
    println!(
        "  CRL refresh / staleness: {}s / {}s",
        config.crl_refresh_interval_secs, config.crl_staleness_threshold_secs
    );
    println!("  Session TTL: {}s", config.session_ttl_secs);
    println!("  Allowed certificate CNs: {}", config.cert_allowlist.len());
    if let Some(ref path) = config.audit_log_path {
        println!("  Audit log: {}", path);
    }
    if let Some(ref addr) = config.status_listen_address {
        println!("  Status endpoints: {}", addr);
    }
}
