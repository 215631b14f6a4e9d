// src/ws.rs
use crate::types::{IncomingMessage, NfcCommand, OperationRequest, OutgoingMessage};
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use warp::Filter;

pub async fn start_server(
    addr: SocketAddr,
    default_language: String,
    nfc_cmd_tx: Sender<NfcCommand>,
    nfc_event_rx: broadcast::Receiver<OutgoingMessage>,
) {
    // Shared Broadcast Channel for WS Clients
    let (ws_tx, _) = broadcast::channel::<OutgoingMessage>(32);
    let ws_tx = Arc::new(ws_tx);

    // 1. Task to forward NFC Events -> All WS Clients
    tokio::spawn(forward_events(nfc_event_rx, ws_tx.clone()));

    // 2. Define WS Route (Matches root path "/")
    let default_language = Arc::new(default_language);
    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let nfc_cmd_tx = nfc_cmd_tx.clone();
            let ws_tx = ws_tx.clone();
            let default_language = default_language.clone();

            ws.on_upgrade(move |socket| {
                handle_connection(socket, nfc_cmd_tx, ws_tx, default_language)
            })
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{}", addr);
    warp::serve(routes).run(addr).await;
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    nfc_cmd_tx: Sender<NfcCommand>,
    ws_tx: Arc<broadcast::Sender<OutgoingMessage>>,
    default_language: Arc<String>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut rx_broadcast = ws_tx.subscribe();
    // Replies meant for this client only
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<OutgoingMessage>();

    // Spawn task to send Broadcasts and replies -> Client
    tokio::spawn(async move {
        while let Some(msg) = next_outgoing(&mut rx_broadcast, &mut reply_rx).await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {:?}: {}", msg, e);
                    continue;
                }
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Handle incoming messages from Client
    while let Some(result) = client_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                break;
            }
        };
        let Ok(text) = msg.to_str() else {
            continue;
        };

        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(parsed) => {
                if let Some(reply) = dispatch(parsed, &nfc_cmd_tx, &default_language) {
                    let _ = reply_tx.send(reply);
                }
            }
            Err(e) => warn!("Ignoring malformed client message: {}", e),
        }
    }
}

// Relays NFC events to the client broadcast until the NFC side hangs up.
async fn forward_events(
    mut nfc_event_rx: broadcast::Receiver<OutgoingMessage>,
    ws_tx: Arc<broadcast::Sender<OutgoingMessage>>,
) {
    loop {
        match nfc_event_rx.recv().await {
            Ok(msg) => {
                let _ = ws_tx.send(msg);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event forwarder lagged, {} NFC events dropped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

// Next message for one client: its own replies or a broadcast event. A client
// that lags skips what it missed; `None` once the broadcast is closed.
async fn next_outgoing(
    events: &mut broadcast::Receiver<OutgoingMessage>,
    replies: &mut mpsc::UnboundedReceiver<OutgoingMessage>,
) -> Option<OutgoingMessage> {
    loop {
        tokio::select! {
            Some(reply) = replies.recv() => return Some(reply),
            event = events.recv() => match event {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Client lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            },
        }
    }
}

// Forwards a client message to the NFC thread. Returns a reply for requests
// rejected before reaching it.
fn dispatch(
    message: IncomingMessage,
    nfc_cmd_tx: &Sender<NfcCommand>,
    default_language: &str,
) -> Option<OutgoingMessage> {
    let command = match message {
        IncomingMessage::GET_READER_STATUS => NfcCommand::CheckReaderStatus,
        IncomingMessage::WRITE_TEXT { text, language } => {
            if text.is_empty() {
                return Some(OutgoingMessage::DATA_WRITE_ERROR {
                    error: "Enter some text to write".into(),
                });
            }
            let language = language.unwrap_or_else(|| default_language.to_string());
            NfcCommand::Arm(OperationRequest::write(text, language))
        }
        IncomingMessage::READ_TEXT => NfcCommand::Arm(OperationRequest::read()),
        IncomingMessage::CANCEL => NfcCommand::Cancel,
    };

    if nfc_cmd_tx.send(command).is_err() {
        return Some(OutgoingMessage::READER_ERROR {
            error: "NFC service is not running".into(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Mode;
    use crossbeam_channel::unbounded;

    #[test]
    fn write_uses_default_language() {
        let (tx, rx) = unbounded();
        let message = IncomingMessage::WRITE_TEXT {
            text: "Hello".into(),
            language: None,
        };

        assert_eq!(dispatch(message, &tx, "de"), None);
        match rx.try_recv() {
            Ok(NfcCommand::Arm(request)) => assert_eq!(
                request.mode,
                Mode::Write {
                    text: "Hello".into(),
                    language: "de".into()
                }
            ),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn empty_write_is_rejected_before_arming() {
        let (tx, rx) = unbounded();
        let message = IncomingMessage::WRITE_TEXT {
            text: String::new(),
            language: None,
        };

        assert!(matches!(
            dispatch(message, &tx, "en"),
            Some(OutgoingMessage::DATA_WRITE_ERROR { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    fn card_status(message: &str) -> OutgoingMessage {
        OutgoingMessage::CARD_STATUS {
            success: true,
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn forwarder_survives_lag() {
        let (nfc_tx, nfc_rx) = broadcast::channel(2);
        let (ws_tx, mut client_rx) = broadcast::channel(8);
        for i in 0..4 {
            nfc_tx.send(card_status(&i.to_string())).unwrap();
        }
        drop(nfc_tx);

        forward_events(nfc_rx, Arc::new(ws_tx)).await;

        // the two oldest events were overwritten, the rest still arrive
        assert_eq!(client_rx.try_recv().unwrap(), card_status("2"));
        assert_eq!(client_rx.try_recv().unwrap(), card_status("3"));
    }

    #[tokio::test]
    async fn lagging_client_keeps_receiving() {
        let (ws_tx, mut events) = broadcast::channel(2);
        let (_reply_tx, mut replies) = mpsc::unbounded_channel();
        for i in 0..4 {
            ws_tx.send(card_status(&i.to_string())).unwrap();
        }

        assert_eq!(next_outgoing(&mut events, &mut replies).await, Some(card_status("2")));
        assert_eq!(next_outgoing(&mut events, &mut replies).await, Some(card_status("3")));

        drop(ws_tx);
        assert_eq!(next_outgoing(&mut events, &mut replies).await, None);
    }

    #[tokio::test]
    async fn rejection_reaches_only_the_sender() {
        let (ws_tx, _) = broadcast::channel::<OutgoingMessage>(8);
        let (cmd_tx, _cmd_rx) = unbounded();

        let mut sender_events = ws_tx.subscribe();
        let (sender_reply_tx, mut sender_replies) = mpsc::unbounded_channel();
        let mut other_events = ws_tx.subscribe();
        let (_other_reply_tx, mut other_replies) = mpsc::unbounded_channel();

        let message = IncomingMessage::WRITE_TEXT {
            text: String::new(),
            language: None,
        };
        let reply = dispatch(message, &cmd_tx, "en").unwrap();
        sender_reply_tx.send(reply.clone()).unwrap();

        assert_eq!(
            next_outgoing(&mut sender_events, &mut sender_replies).await,
            Some(reply)
        );
        let other = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            next_outgoing(&mut other_events, &mut other_replies),
        )
        .await;
        assert!(other.is_err(), "other client got {:?}", other);
    }

    #[test]
    fn stopped_service_is_reported() {
        let (tx, rx) = unbounded();
        drop(rx);
        assert!(matches!(
            dispatch(IncomingMessage::READ_TEXT, &tx, "en"),
            Some(OutgoingMessage::READER_ERROR { .. })
        ));
    }
}
