use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lib_usbctl::configs::ConfigStore;
use lib_usbctl::loggers::init_tracing;
use lib_usbctl::{
    BindOrchestrator, BindProbe, CommandSet, DeviceRegistry, Dispatcher, Gateway, Platform, Poller,
    ProcessRunner, SysfsProbe, UnboundProbe,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod usbctl_logic;
use usbctl_logic::{config, downstream, state::AppState};

/// Time allowed for tasks to wind down after the first signal.
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(10);

#[tokio::main]
/// # Main Entry Point
///
/// 1.  Sets up `tracing` from flags and env.
/// 2.  Resolves settings from defaults, the config file, env and flags.
/// 3.  Builds the gateway, registry, dispatcher and orchestrator.
/// 4.  Binds the devices remembered in the config file again.
/// 5.  Starts the poller and the HTTP server under `tokio-graceful`.
/// 6.  On SIGINT/SIGTERM cancels everything and waits up to
///     [`SHUTDOWN_LIMIT`]. A second signal exits immediately.
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let _log_guard = init_tracing(&cli.log_options()).context("failed to initialize logging")?;

    let config_path = cli.config_path();
    let file_record = config::load_record(&config_path).await;
    let settings = config::Settings::resolve(cli, file_record, config_path);
    info!("{}", settings);

    let token = CancellationToken::new();
    let shutdown = Shutdown::new(wait_for_shutdown(token.clone()));

    // --- Core ---
    let gateway = Gateway::new(Arc::new(ProcessRunner::new())).with_timeout(settings.command_timeout);
    let commands = CommandSet::for_current_platform();
    let probe: Arc<dyn BindProbe> = match commands.platform() {
        Platform::Linux => Arc::new(SysfsProbe::new()),
        Platform::Windows => Arc::new(UnboundProbe),
    };
    let dispatcher = Arc::new(Dispatcher::new());
    let registry = Arc::new(DeviceRegistry::new(gateway.clone(), commands, probe, dispatcher.clone()));
    let store = Arc::new(ConfigStore::with_record(settings.config_path.clone(), settings.persisted_record()));
    let orchestrator = Arc::new(BindOrchestrator::new(gateway, commands, registry.clone(), store));

    // --- Restore ---
    let report = registry.restore(&settings.bound_devices, &orchestrator).await;
    for (busid, reason) in &report.failed {
        warn!(%busid, %reason, "device was not restored");
    }

    // --- Poller ---
    let poller = Poller::new(registry.clone(), settings.poll_interval);
    let poll_token = token.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        let _guard = guard;
        poller.run(poll_token).await;
    });

    // --- Subscriber teardown ---
    let hub = dispatcher.clone();
    let close_token = token.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        let _guard = guard;
        close_token.cancelled().await;
        hub.close_all();
    });

    // --- HTTP ---
    let listener = match TcpListener::bind((settings.bind_address.as_str(), settings.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            token.cancel();
            let _ = shutdown.shutdown_with_limit(SHUTDOWN_LIMIT).await;
            return Err(e).with_context(|| format!("failed to listen on {}:{}", settings.bind_address, settings.port));
        }
    };
    announce(&listener);

    let app_state = AppState {
        registry,
        orchestrator,
        dispatcher,
        shutdown: token.clone(),
        heartbeat: settings.heartbeat,
    };
    let server_token = token.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        let _guard = guard;
        if let Err(e) = downstream::serve(listener, app_state).await {
            error!(error = %e, "HTTP server failed");
            server_token.cancel();
        }
    });

    match shutdown.shutdown_with_limit(SHUTDOWN_LIMIT).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            warn!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");
    Ok(())
}

/// Resolves on the first SIGINT/SIGTERM (or an internal cancel), cancels
/// `token` and arms the second-signal hard exit.
async fn wait_for_shutdown(token: CancellationToken) {
    tokio::select! {
        _ = os_signal() => info!("shutdown signal received, stopping"),
        _ = token.cancelled() => info!("shutdown requested internally, stopping"),
    }
    token.cancel();

    tokio::spawn(async {
        os_signal().await;
        error!("second shutdown signal received, exiting immediately");
        std::process::exit(1);
    });
}

async fn os_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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
}

fn announce(listener: &TcpListener) {
    let Ok(local) = listener.local_addr() else {
        return;
    };
    info!(address = %local, "usbctl listening");
    if local.ip().is_unspecified() {
        match local_ip_address::local_ip() {
            Ok(ip) => info!("open http://{}:{}/ from another machine on the LAN", ip, local.port()),
            Err(e) => warn!(error = %e, "could not determine LAN address"),
        }
    }
}
