use color_eyre::{eyre::eyre, Result};
use rcbridge::config::AppConfig;
use rcbridge::controller::ControllerHandle;
use rcbridge::sink::{BridgeMessage, BridgeSink, KeyAction};
use rcbridge::transport::ReplayTransport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = AppConfig::load().await?;
    info!("Starting bridge with config: {:?}", config.controller);

    let transport = Arc::new(ReplayTransport::from_settings(&config.replay));

    // Host side of the bridge; here it only logs what it would dispatch
    let (bridge_tx, mut bridge_rx) = mpsc::channel(config.controller.event_buffer);
    let host = tokio::spawn(async move {
        while let Some(message) = bridge_rx.recv().await {
            match &message {
                BridgeMessage::KeyStroke {
                    code,
                    action: KeyAction::Down,
                } => info!("{} {:?} ({})", message.method_name(), code, code.android_code()),
                BridgeMessage::KeyStroke { .. } => debug!("{}: {:?}", message.method_name(), message),
                BridgeMessage::LeftButtonPressed | BridgeMessage::RightButtonPressed => {
                    info!("{}", message.method_name())
                }
                BridgeMessage::KeyChannels(channels) => {
                    debug!("{}: {:?}", message.method_name(), channels)
                }
            }
        }
        info!("Bridge channel closed");
    });

    let controller = ControllerHandle::spawn(
        Some(config.controller.clone()),
        transport,
        Arc::new(BridgeSink::new(bridge_tx)),
    )
    .map_err(|e| eyre!("Failed to spawn controller: {}", e))?;

    let mut state = controller.subscribe();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            info!("Link state: {}", *state.borrow_and_update());
        }
    });

    controller
        .connect()
        .await
        .map_err(|e| eyre!("Failed to connect: {}", e))?;

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    controller
        .shutdown()
        .await
        .map_err(|e| eyre!("Failed to shut down controller: {}", e))?;
    host.await?;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
