//! Print-queue discovery and reconciliation daemon: learns about remote
//! print servers and standalone network printers, and maintains a matching
//! local queue for each in the local print service.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cups_browsed_rs::config::{AppConfig, Cli};
use cups_browsed_rs::daemon::Daemon;
use cups_browsed_rs::errors::Result;
use cups_browsed_rs::print_service::{IppPrintService, PrintServiceClient};

fn main() {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("fatal: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(run(cli));
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let cfg = match AppConfig::load(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("fatal: failed to load configuration: {e}");
            return 1;
        }
    };

    if let Err(e) = init_logging(&cfg) {
        eprintln!("fatal: failed to initialize logging: {e}");
        return 1;
    }

    // CUPS_SERVER is pinned at startup so the daemon's own RPCs never pick
    // up a client-side override.
    std::env::set_var("CUPS_SERVER", cfg.cups_server_env());

    if cfg.browse_local_protocols.is_empty() && cfg.browse_remote_protocols.is_empty() && cfg.browse_poll.is_empty() {
        tracing::info!("no browse directions enabled and no poll servers configured; exiting cleanly");
        return 0;
    }

    let client: Arc<dyn PrintServiceClient> = match build_print_service_client() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "fatal: could not construct local print service client");
            return 1;
        }
    };

    tracing::info!(
        debug = cfg.debug,
        autoshutdown = ?cfg.autoshutdown,
        poll_servers = cfg.browse_poll.len(),
        "cups-browsed-rs starting"
    );

    let daemon = Daemon::new(cfg, client);
    match daemon.run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "daemon loop exited with error");
            1
        }
    }
}

fn build_print_service_client() -> Result<Arc<dyn PrintServiceClient>> {
    let base = std::env::var("CUPS_SERVER").unwrap_or_else(|_| "localhost".to_string());
    let base_uri = if base.starts_with("http://") || base.starts_with("https://") {
        base
    } else {
        format!("http://{base}:631")
    };
    Ok(Arc::new(IppPrintService::new(&base_uri)?))
}

fn init_logging(cfg: &AppConfig) -> Result<()> {
    let default_filter = if cfg.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (appender, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        std::env::temp_dir(),
        "cups-browsed-rs.log",
    ));
    // Leak the guard: it must outlive the process, and the daemon never
    // tears logging down before exit.
    Box::leak(Box::new(guard));

    let stderr_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = tracing_subscriber::fmt::layer().with_writer(appender).with_ansi(false).with_target(false);

    tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer).try_init().map_err(|e| {
        cups_browsed_rs::errors::DaemonError::Config(format!("failed to install tracing subscriber: {e}"))
    })
}
