//! Headless stand-in for the GUI: drives an [`axterm_engine::Engine`] from a
//! config file and a line-oriented stdin console, printing engine events to
//! stdout. Exists so the engine can be exercised end to end without a
//! windowing toolkit.

use axterm_engine::config::{load_config, save_config};
use axterm_engine::{Engine, EngineCommand, EngineEvent};
use axterm_link::{LinkKind, LinkSettings};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "AXTerm headless console")]
struct Args {
    /// SQLite database path; `:memory:` runs with no persistence file.
    #[arg(long, default_value = "axterm.db")]
    db: String,
    /// Directory holding config.json; created with defaults if missing.
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
    #[arg(long)]
    callsign: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = load_config(&args.config_dir);
    if let Some(callsign) = args.callsign {
        config.my_callsign = callsign;
    }
    if let Err(e) = save_config(&args.config_dir, &config) {
        error!(error = %e, "failed to write config");
    }

    let (handle, mut events) = if args.db == ":memory:" {
        Engine::spawn_in_memory(config)
    } else {
        Engine::spawn(config, PathBuf::from(&args.db))
    }
    .expect("failed to start engine");

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    println!("axterm ready; type `help` for commands");
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            handle.send(EngineCommand::Shutdown);
            break;
        }
        match parse_command(line) {
            Ok(cmd) => handle.send(cmd),
            Err(msg) => eprintln!("{msg}"),
        }
    }

    if let Err(e) = handle.task.await {
        error!(error = %e, "engine task panicked");
    }
    info!("console exiting");
}

fn print_event(event: EngineEvent) {
    match event {
        EngineEvent::PacketReceived(p) => {
            println!("[{}] {} -> {} via {:?}: {:?}", p.timestamp, p.from, p.to, p.via, p.decoded_text());
        }
        EngineEvent::LinkStateChanged(state) => println!("link: {state:?}"),
        EngineEvent::WatchHit(hit) => println!("watch hit: rule {} ({} -> {})", hit.rule_index, hit.from, hit.to),
        EngineEvent::ChatReceived { peer, text } => println!("chat from {peer}: {text}"),
        EngineEvent::FileOffered { peer, transfer_id, file_name, file_size } => {
            println!("file offer from {peer}: #{transfer_id} {file_name} ({file_size} bytes)");
        }
        EngineEvent::FileProgress { peer, transfer_id, received, total } => {
            println!("transfer {peer}/{transfer_id}: {received}/{total} chunks");
        }
        EngineEvent::FileCompleted { peer, transfer_id, .. } => {
            println!("transfer {peer}/{transfer_id} complete");
        }
        EngineEvent::FileFailed { peer, transfer_id, reason } => {
            println!("transfer {peer}/{transfer_id} failed: {reason}");
        }
        EngineEvent::SessionStateChanged { peer, state } => println!("session {peer}: {state:?}"),
        EngineEvent::Error(msg) => eprintln!("error: {msg}"),
        other => println!("{other:?}"),
    }
}

fn parse_command(line: &str) -> Result<EngineCommand, String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    match verb {
        "help" => Err(HELP.to_string()),
        "connect" => match parts.next() {
            Some("tcp") => {
                let host = parts.next().ok_or("usage: connect tcp <host> <port>")?.to_string();
                let port: u16 = parts
                    .next()
                    .ok_or("usage: connect tcp <host> <port>")?
                    .parse()
                    .map_err(|_| "bad port".to_string())?;
                Ok(EngineCommand::ConnectTcp { host, port })
            }
            Some("serial") => {
                let path = parts.next().ok_or("usage: connect serial <path> <baud>")?.to_string();
                let baud: u32 = parts
                    .next()
                    .unwrap_or("9600")
                    .parse()
                    .map_err(|_| "bad baud".to_string())?;
                Ok(EngineCommand::ConnectSerial { path, baud })
            }
            _ => Err("usage: connect tcp|serial ...".to_string()),
        },
        "disconnect" => Ok(EngineCommand::Disconnect),
        "send" => {
            let to = parts.next().ok_or("usage: send <to> <via|-> <text...>")?.to_string();
            let via_field = parts.next().ok_or("usage: send <to> <via|-> <text...>")?;
            let via = if via_field == "-" {
                Vec::new()
            } else {
                via_field.split(',').map(str::to_string).collect()
            };
            let text: String = parts.collect::<Vec<_>>().join(" ");
            Ok(EngineCommand::SendOutbound { to, via, text })
        }
        "mobilinkd" => match parts.next() {
            Some("poll") => Ok(EngineCommand::MobilinkdPollInputLevel),
            Some("adjust") => Ok(EngineCommand::MobilinkdAdjustInputLevels),
            Some("reset") => Ok(EngineCommand::MobilinkdReset),
            Some("gain") => {
                let level: u8 = parts
                    .next()
                    .ok_or("usage: mobilinkd gain <0-4>")?
                    .parse()
                    .map_err(|_| "bad gain level".to_string())?;
                Ok(EngineCommand::MobilinkdSetInputGain(level))
            }
            _ => Err("usage: mobilinkd poll|adjust|reset|gain <n>".to_string()),
        },
        "session" => match parts.next() {
            Some("connect") => {
                let peer = parts.next().ok_or("usage: session connect <peer>")?.to_string();
                Ok(EngineCommand::ConnectSession { peer })
            }
            Some("disconnect") => {
                let peer = parts.next().ok_or("usage: session disconnect <peer>")?.to_string();
                Ok(EngineCommand::DisconnectSession { peer })
            }
            _ => Err("usage: session connect|disconnect <peer>".to_string()),
        },
        "chat" => {
            let peer = parts.next().ok_or("usage: chat <peer> <text...>")?.to_string();
            let text: String = parts.collect::<Vec<_>>().join(" ");
            Ok(EngineCommand::SendChat { peer, text })
        }
        "transfer" => match parts.next() {
            Some("accept") => {
                let (peer, transfer_id) = parse_peer_transfer(&mut parts, "transfer accept <peer> <id>")?;
                Ok(EngineCommand::AcceptIncoming { peer, transfer_id })
            }
            Some("decline") => {
                let (peer, transfer_id) =
                    parse_peer_transfer(&mut parts, "transfer decline <peer> <id> <reason...>")?;
                let reason: String = parts.collect::<Vec<_>>().join(" ");
                Ok(EngineCommand::DeclineIncoming { peer, transfer_id, reason })
            }
            Some("pause") => {
                let (peer, transfer_id) = parse_peer_transfer(&mut parts, "transfer pause <peer> <id>")?;
                Ok(EngineCommand::PauseTransfer { peer, transfer_id })
            }
            Some("resume") => {
                let (peer, transfer_id) = parse_peer_transfer(&mut parts, "transfer resume <peer> <id>")?;
                Ok(EngineCommand::ResumeTransfer { peer, transfer_id })
            }
            Some("cancel") => {
                let (peer, transfer_id) = parse_peer_transfer(&mut parts, "transfer cancel <peer> <id>")?;
                Ok(EngineCommand::CancelTransfer { peer, transfer_id })
            }
            _ => Err("usage: transfer accept|decline|pause|resume|cancel <peer> <id> ...".to_string()),
        },
        _ => Err(format!("unknown command: {verb}")),
    }
}

fn parse_peer_transfer<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    usage: &str,
) -> Result<(String, u64), String> {
    let peer = parts.next().ok_or(usage)?.to_string();
    let transfer_id: u64 = parts.next().ok_or(usage)?.parse().map_err(|_| "bad transfer id".to_string())?;
    Ok((peer, transfer_id))
}

#[allow(dead_code)]
fn default_link_settings() -> LinkSettings {
    LinkSettings { kind: LinkKind::Network, ..LinkSettings::default() }
}

const HELP: &str = "commands: connect tcp <host> <port> | connect serial <path> <baud> | disconnect | send <to> <via|-> <text> | mobilinkd poll|adjust|reset|gain <n> | session connect|disconnect <peer> | chat <peer> <text> | transfer accept|decline|pause|resume|cancel <peer> <id> | quit";
