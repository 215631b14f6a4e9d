use crossbeam_channel::unbounded;
use log::{error, info};
use tokio::sync::broadcast;

use nfc_text_service::config::ServiceConfig;
use nfc_text_service::types::{NfcCommand, OutgoingMessage};
use nfc_text_service::{nfc_service, ws};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {}", err);
            std::process::exit(2);
        }
    };
    info!("Starting NFC Text Service (default language {:?})...", config.default_language);

    // Channel: WS -> NFC (Commands)
    // We use Crossbeam (Sync) because NFC thread is blocking
    let (cmd_tx, cmd_rx) = unbounded::<NfcCommand>();

    // Channel: NFC -> WS (Events)
    // We use Tokio Broadcast for distribution to WS clients
    let (event_tx, event_rx) = broadcast::channel::<OutgoingMessage>(100);

    // NFC thread -> bridge -> broadcast
    let (bridge_tx, bridge_rx) = unbounded::<OutgoingMessage>();

    let nfc_config = config.clone();
    std::thread::spawn(move || {
        nfc_service::run(&nfc_config, bridge_tx, cmd_rx);
    });

    std::thread::spawn(move || {
        while let Ok(msg) = bridge_rx.recv() {
            let _ = event_tx.send(msg);
        }
    });

    ws::start_server(config.listen_addr, config.default_language, cmd_tx, event_rx).await;
}
