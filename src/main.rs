use anyhow::Context;
use hotword_listener::control_bridge::{BridgeMessage, ControlBridge, ControlCommand};
use hotword_listener::{HotwordConfig, ListenOutcome, NativeBackend, SessionCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// How long shutdown waits for the capture thread to release the device
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // First argument is the config file, otherwise ./hotword.toml if present
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = HotwordConfig::load(config_path.as_deref())
        .context("failed to load configuration")?;

    log::info!(
        "{}: hotword '{}', device {}, {}Hz, {} byte frames",
        config.name,
        config.hotword,
        config.audio_device.as_deref().unwrap_or("default"),
        config.sample_rate,
        config.buffer_size,
    );

    if !NativeBackend::has_keyword_spotter() {
        log::warn!(
            "built without a keyword spotter, every listen request will fail \
             (rebuild with `--features rustpotter`)"
        );
    }

    let coordinator = SessionCoordinator::new(config.clone(), Arc::new(NativeBackend));

    let (tx_cmd, mut rx_cmd) = mpsc::channel::<ControlCommand>(16);
    let bridge = Arc::new(
        ControlBridge::new(&config.bridge, tx_cmd)
            .await
            .with_context(|| format!("failed to bind control port {}", config.bridge.local_port))?,
    );
    let bridge_clone = bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = bridge_clone.run().await {
            log::error!("ControlBridge error: {}", e);
        }
    });

    let mut status_rx = coordinator.subscribe_status();
    let mut events_rx = coordinator.subscribe_events();

    // Announce the initial idle state
    let initial = status_rx.borrow_and_update().clone();
    if let Err(e) = bridge.send(&BridgeMessage::State(initial)).await {
        log::warn!("Failed to send state to host: {}", e);
    }

    // Installed once so a signal arriving while an arm body runs is still seen
    let mut signals = ShutdownSignals::install().context("failed to install signal handlers")?;

    log::info!("Started");

    loop {
        tokio::select! {
            name = signals.recv() => {
                log::info!("Received {}, shutting down...", name);
                break;
            }

            Some(cmd) = rx_cmd.recv() => match cmd {
                ControlCommand::Listen => {
                    let coordinator = coordinator.clone();
                    let bridge = bridge.clone();
                    tokio::spawn(async move {
                        match coordinator.listen().await {
                            Ok(ListenOutcome::Detected { phrase, .. }) => {
                                log::info!("Hotword detected: {}", phrase);
                            }
                            Ok(ListenOutcome::NoDetection(reason)) => {
                                log::info!("Listen ended without detection: {:?}", reason);
                            }
                            Err(e) => {
                                log::warn!("Listen failed: {}", e);
                                let msg = BridgeMessage::Error {
                                    error: e.kind().to_string(),
                                    message: e.to_string(),
                                };
                                if let Err(e) = bridge.send(&msg).await {
                                    log::warn!("Failed to send error to host: {}", e);
                                }
                            }
                        }
                    });
                }
                ControlCommand::Shutdown => {
                    log::info!("Host requested shutdown");
                    break;
                }
            },

            Ok(()) = status_rx.changed() => {
                let state = status_rx.borrow_and_update().clone();
                if let Err(e) = bridge.send(&BridgeMessage::State(state)).await {
                    log::warn!("Failed to send state to host: {}", e);
                }
            }

            Ok(event) = events_rx.recv() => {
                if let Err(e) = bridge.send(&BridgeMessage::Event(event)).await {
                    log::warn!("Failed to send event to host: {}", e);
                }
            }
        }
    }

    coordinator.request_shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, coordinator.wait_idle())
        .await
        .is_err()
    {
        log::warn!("Capture thread did not stop within {:?}", SHUTDOWN_GRACE);
    }
    Ok(())
}

/// SIGINT and SIGTERM, registered up front.
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves on the next delivery, including one that landed since the last call.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "Ctrl+C",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
struct ShutdownSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        self.ctrl_c.recv().await;
        "Ctrl+C"
    }
}
