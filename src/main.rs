use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use washslot::admission::AdmissionController;
use washslot::config::Config;
use washslot::console::Console;
use washslot::engine::Engine;
use washslot::notify::NotifyHub;
use washslot::reaper::{run_compactor, run_reaper};
use washslot::time::SystemClock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries command results; logs go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::from_env();
    if let Err(e) = washslot::observability::init(config.metrics_port) {
        error!("metrics exporter failed to start: {e}");
    }

    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        &config.resources,
        config.lock_expiration_ms,
        notify.clone(),
    )?);
    info!("washslot ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  machines: {}",
        config
            .resources
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("  booking_limit: {}", config.booking_limit);
    info!("  require_pin: {}", config.require_pin);

    tokio::spawn(run_reaper(engine.clone()));
    tokio::spawn(run_compactor(engine.clone(), config.compact_threshold));

    let controller = Arc::new(AdmissionController::new(
        engine,
        Arc::new(config),
        Arc::new(SystemClock),
    ));

    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if let Err(e) = written.await {
                warn!("stdout closed: {e}");
                break;
            }
        }
    });
    let console = Console::new(controller, notify, out_tx.clone());

    // Stop on EOF, SIGTERM or ctrl-c; in-flight commits finish on their own tasks.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("input closed");
                        break;
                    }
                    Err(e) => {
                        error!("read error: {e}");
                        break;
                    }
                };
                if let Some(reply) = console.handle_line(&line).await {
                    if out_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Dropping the console stops its watchers; the printer drains what is queued.
    drop(console);
    drop(out_tx);
    let _ = printer.await;

    info!("washslot stopped");
    Ok(())
}
