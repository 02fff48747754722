use anyhow::Result;
use chrono::Utc;
use log::{error, info};
use peerline::calls::{CallController, LocalUser};
use peerline::config::CallConfig;
use peerline::media::WebRtcEngine;
use peerline::store::MemoryStore;
use peerline::types::call::MediaKind;
use peerline::types::events::CallEvent;
use std::sync::Arc;
use std::time::Duration;

// This is a demo that places a loopback call between two controllers in a
// single process: both ends share an in-memory signaling store and negotiate
// a real WebRTC transport across the local interfaces.
//
// Usage:
//   cargo run --bin loopback                   # audio call, 15 seconds
//   cargo run --bin loopback -- --video        # video call
//   cargo run --bin loopback -- --seconds 30   # stay connected longer

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let video = args.iter().any(|a| a == "--video");
    let seconds = parse_arg(&args, "--seconds", "-s")
        .and_then(|s| s.parse().ok())
        .unwrap_or(15u64);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Utc::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let kind = if video {
        MediaKind::Video
    } else {
        MediaKind::Audio
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");
    rt.block_on(run(kind, seconds))
}

async fn run(kind: MediaKind, seconds: u64) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = CallConfig::default();

    let alice = CallController::new(
        LocalUser::new("alice", "Alice"),
        config.clone(),
        store.clone(),
        Arc::new(WebRtcEngine::new(config.media_config())),
    );
    let bob = CallController::new(
        LocalUser::new("bob", "Bob"),
        config.clone(),
        store.clone(),
        Arc::new(WebRtcEngine::new(config.media_config())),
    );

    let mut alice_events = alice.subscribe_events();
    let mut bob_events = bob.subscribe_events();
    bob.spawn_incoming_watcher();

    // Bob answers as soon as the call rings.
    let bob_answerer = bob.clone();
    tokio::spawn(async move {
        while let Ok(event) = bob_events.recv().await {
            if let CallEvent::IncomingCall(record) = event {
                info!(
                    "Bob: incoming {:?} call from {}",
                    record.media_kind, record.caller_name
                );
                if let Err(e) = bob_answerer.answer_call(&record.id).await {
                    error!("Bob: answering failed: {e}");
                }
                break;
            }
        }
    });

    let call_id = alice.start_call("bob", kind).await?;
    info!("Alice: offering {:?} call {}", kind, call_id);

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = alice_events.recv() => match event {
                Ok(CallEvent::StatusChanged { status, .. }) => {
                    info!("Alice: call is {status}");
                    if status.is_terminal() {
                        return Ok(());
                    }
                }
                Ok(CallEvent::QualityChanged { level, .. }) => {
                    info!("Alice: link quality {:?} ({} bars)", level, level.bars());
                }
                Ok(CallEvent::RemoteTrackAdded { kind, .. }) => {
                    info!("Alice: remote {:?} track arrived", kind);
                }
                Ok(_) => {}
                Err(_) => break,
            },
            _ = &mut deadline => break,
        }
    }

    alice.end_call().await?;
    info!("Alice: hung up");
    Ok(())
}

fn parse_arg(args: &[String], long: &str, short: &str) -> Option<String> {
    args.iter()
        .position(|a| a == long || a == short)
        .and_then(|i| args.get(i + 1).cloned())
}
