// src/nfc_service.rs
use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use pcsc::{Context, PNP_NOTIFICATION, ReaderState, Scope, State};
use std::ffi::{CStr, CString};
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::pcsc_tag::PcscTag;
use crate::tag::TagHandle;
use crate::transaction::{self, ReadOutcome};
use crate::types::{Mode, NfcCommand, OperationRequest, OutgoingMessage};

const PREVIEW_CHARS: usize = 60;

pub fn run(config: &ServiceConfig, tx: Sender<OutgoingMessage>, rx: Receiver<NfcCommand>) {
    info!("Starting NFC Service (Event Driven)...");

    let ctx = match Context::establish(Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("Failed to establish context: {}", err);
            let _ = tx.send(OutgoingMessage::READER_ERROR {
                error: err.to_string(),
            });
            return;
        }
    };

    let mut readers_buf = [0; 2048];
    let mut reader_names: Vec<CString> = Vec::new();
    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];

    // Owned by this thread only; the next card insertion consumes it.
    let mut pending: Option<OperationRequest> = None;

    loop {
        // 1. Wait for State Change
        if let Err(err) = ctx.get_status_change(config.poll_interval, &mut reader_states) {
            if err != pcsc::Error::Timeout {
                error!("PCSC Error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        }

        // 2. CHECK FOR COMMANDS
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                NfcCommand::Arm(request) => {
                    info!("Armed {} operation", request.mode_name());
                    let _ = tx.send(mode_status(&request));
                    pending = Some(request);
                }
                NfcCommand::Cancel => {
                    if pending.take().is_some() {
                        info!("Pending operation cancelled");
                    }
                    let _ = tx.send(OutgoingMessage::MODE_STATUS {
                        mode: "IDLE".into(),
                        message: "No operation armed".into(),
                    });
                }
                NfcCommand::CheckReaderStatus => {
                    refresh_readers(&ctx, &mut readers_buf, &mut reader_names, &mut reader_states, &tx);
                }
            }
        }

        // 3. PROCESS EVENTS
        let mut readers_changed = false;

        // Check PnP (Index 0)
        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("Hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        // Check Readers (Indices 1..)
        for i in 1..reader_states.len() {
            let Some(name) = reader_names.get(i - 1).cloned() else {
                continue;
            };
            let rs = &reader_states[i];

            if rs.event_state().intersects(State::CHANGED) {
                let current = rs.event_state();
                let previous = rs.current_state();

                // Card Inserted
                if current.intersects(State::PRESENT) && !previous.intersects(State::PRESENT) {
                    info!("Card Inserted on {:?}", name);
                    handle_card_insertion(&ctx, &name, pending.take(), &tx);
                }

                // Card Removed
                if current.intersects(State::EMPTY) && previous.intersects(State::PRESENT) {
                    info!("Card Removed from {:?}", name);
                    let _ = tx.send(OutgoingMessage::CARD_STATUS {
                        success: false,
                        message: "Card removed!".into(),
                    });
                }

                reader_states[i].sync_current_state();
            }
        }

        // 4. REFRESH LIST
        if readers_changed {
            refresh_readers(&ctx, &mut readers_buf, &mut reader_names, &mut reader_states, &tx);
        }
    }
}

fn refresh_readers(
    ctx: &Context,
    readers_buf: &mut [u8],
    reader_names: &mut Vec<CString>,
    reader_states: &mut Vec<ReaderState>,
    tx: &Sender<OutgoingMessage>,
) {
    // Index 0 is the PnP state and survives every refresh
    reader_states.truncate(1);

    match ctx.list_readers(readers_buf) {
        Ok(iter) => {
            *reader_names = iter.map(CString::from).collect();
            for name in reader_names.iter() {
                reader_states.push(ReaderState::new(name.clone(), State::UNAWARE));
            }
        }
        Err(err) => {
            warn!("Failed to list readers: {}", err);
            reader_names.clear();
        }
    }

    let _ = tx.send(OutgoingMessage::READER_STATUS {
        success: !reader_names.is_empty(),
    });
}

fn handle_card_insertion(
    ctx: &Context,
    reader_name: &CStr,
    request: Option<OperationRequest>,
    tx: &Sender<OutgoingMessage>,
) {
    let _ = tx.send(OutgoingMessage::CARD_STATUS {
        success: true,
        message: "Card detected!".into(),
    });

    let mut tag = PcscTag::new(ctx, reader_name);
    let events = match request {
        Some(request) => process_request(&request, &mut tag),
        // idle: only report what was presented
        None => vec![OutgoingMessage::from(&transaction::describe_tag(&mut tag))],
    };

    for event in events {
        let _ = tx.send(event);
    }
}

/// Runs one armed operation against `tag` and turns the outcome into events.
///
/// Every failure becomes exactly one error event; a tag summary follows
/// successful operations.
pub fn process_request<T: TagHandle + ?Sized>(
    request: &OperationRequest,
    tag: &mut T,
) -> Vec<OutgoingMessage> {
    let result = match &request.mode {
        Mode::Write { text, language } => match transaction::write(tag, text, language) {
            Ok(receipt) => OutgoingMessage::DATA_WRITE_SUCCESS {
                message: format!(
                    "Write OK ({}) - tag NOT locked, you can rewrite anytime.",
                    preview(text, PREVIEW_CHARS)
                ),
                bytes_written: receipt.bytes_written,
                formatted: receipt.formatted,
            },
            Err(err) => {
                warn!("Write failed: {}", err);
                return vec![OutgoingMessage::DATA_WRITE_ERROR {
                    error: err.to_string(),
                }];
            }
        },
        Mode::Read => match transaction::read(tag) {
            Ok(ReadOutcome::Text(data)) => OutgoingMessage::DATA_READ_SUCCESS { data },
            Ok(ReadOutcome::NoNdefMessage) => OutgoingMessage::NO_NDEF_MESSAGE {
                message: "No NDEF Text record on tag".into(),
            },
            Err(err) => {
                warn!("Read failed: {}", err);
                return vec![OutgoingMessage::DATA_READ_ERROR {
                    error: err.to_string(),
                }];
            }
        },
    };

    let info = transaction::describe_tag(tag);
    vec![result, OutgoingMessage::from(&info)]
}

fn mode_status(request: &OperationRequest) -> OutgoingMessage {
    let message = match &request.mode {
        Mode::Read => "Read mode: hold a tag to the reader".to_string(),
        Mode::Write { .. } => {
            "Write mode: hold a tag to the reader (tag stays rewritable)".to_string()
        }
    };
    OutgoingMessage::MODE_STATUS {
        mode: request.mode_name().into(),
        message,
    }
}

fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}
