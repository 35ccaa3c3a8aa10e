use crate::backoff::ReconnectBackoff;
use crate::mobilinkd::{self, MobilinkdConfig};
use crate::settings::{LinkSettings, MobilinkdSettings};
use crate::{LinkCommand, LinkEvent, LinkState};
use axterm_proto::kiss::KissParser;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const READ_TIMEOUT: Duration = Duration::from_millis(200);
const READ_CHUNK: usize = 4096;

/// Finds CDC-ACM serial devices when no explicit path is configured. Never
/// mutates the caller's settings; the caller decides whether to persist
/// whatever we pick.
fn autodetect_path() -> Option<String> {
    let ports = serialport::available_ports().ok()?;
    ports
        .into_iter()
        .find(|p| matches!(p.port_type, serialport::SerialPortType::UsbPort(_)))
        .map(|p| p.port_name)
}

pub async fn run(
    settings: LinkSettings,
    mobilinkd: MobilinkdSettings,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let mut backoff = ReconnectBackoff::new();

    let (cmd_tx, mut cmd_rx) = std_mpsc::channel::<LinkCommand>();
    tokio::spawn(async move {
        while let Some(cmd) = commands.recv().await {
            let disconnect = matches!(cmd, LinkCommand::Disconnect);
            if cmd_tx.send(cmd).is_err() || disconnect {
                break;
            }
        }
    });

    'reconnect: loop {
        let _ = events.send(LinkEvent::StateChanged(LinkState::Connecting));

        let path = if settings.serial_path.is_empty() {
            match autodetect_path() {
                Some(p) => p,
                None => {
                    let _ = events.send(LinkEvent::StateChanged(LinkState::Failed(
                        "no CDC-ACM serial device found".into(),
                    )));
                    if !settings.serial_auto_reconnect {
                        return;
                    }
                    tokio::time::sleep(backoff.next_delay()).await;
                    continue 'reconnect;
                }
            }
        } else {
            settings.serial_path.clone()
        };

        let port = serialport::new(path.clone(), settings.serial_baud)
            .timeout(READ_TIMEOUT)
            .open();
        let mut port = match port {
            Ok(p) => p,
            Err(e) => {
                let _ = events.send(LinkEvent::StateChanged(LinkState::Failed(format!(
                    "open {path} failed: {e}"
                ))));
                if !settings.serial_auto_reconnect {
                    return;
                }
                tokio::time::sleep(backoff.next_delay()).await;
                continue 'reconnect;
            }
        };

        info!(%path, baud = settings.serial_baud, "serial link opened");
        backoff.reset();

        if mobilinkd.enabled {
            let _ = port.write_all(&mobilinkd::probe_frame());
            for frame in mobilinkd::init_sequence(&MobilinkdConfig {
                modem_type: mobilinkd.modem_type,
                input_gain: mobilinkd.input_gain,
                output_gain: mobilinkd.output_gain,
            }) {
                let _ = port.write_all(&frame);
            }
        }

        let _ = events.send(LinkEvent::StateChanged(LinkState::Connected));

        let events_blocking = events.clone();
        let blocking =
            tokio::task::spawn_blocking(move || blocking_read_loop(port, events_blocking, cmd_rx));

        let (outcome, returned_rx) = match blocking.await {
            Ok(result) => result,
            Err(_) => return,
        };
        cmd_rx = returned_rx;

        match outcome {
            ShouldReconnect::No => return,
            ShouldReconnect::Yes => {
                if !settings.serial_auto_reconnect {
                    return;
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }
    }
}

enum ShouldReconnect {
    Yes,
    No,
}

/// Runs until the port fails, the host asks to disconnect, or a send
/// errors out. Returns the command receiver back to the caller so a
/// reconnect attempt can keep draining the same channel.
fn blocking_read_loop(
    mut port: Box<dyn serialport::SerialPort>,
    events: mpsc::UnboundedSender<LinkEvent>,
    commands: std_mpsc::Receiver<LinkCommand>,
) -> (ShouldReconnect, std_mpsc::Receiver<LinkCommand>) {
    let mut kiss = KissParser::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                let _ = events.send(LinkEvent::Data(buf[..n].to_vec()));
                let (frames, _errors) = kiss.feed(&buf[..n]);
                for frame in frames {
                    if frame.opcode() == axterm_proto::kiss::OPCODE_SET_HARDWARE {
                        if let Some(telemetry) = mobilinkd::parse_telemetry(&frame.payload) {
                            let _ = events.send(LinkEvent::Telemetry(telemetry));
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                let _ = events.send(LinkEvent::StateChanged(LinkState::Failed(format!(
                    "read failed: {e}"
                ))));
                return (ShouldReconnect::Yes, commands);
            }
        }

        while let Ok(cmd) = commands.try_recv() {
            match cmd {
                LinkCommand::Send(data) => {
                    if let Err(e) = port.write_all(&data) {
                        warn!(error = %e, "serial link write failed");
                        let _ = events.send(LinkEvent::StateChanged(LinkState::Failed(format!(
                            "send failed: {e}"
                        ))));
                        return (ShouldReconnect::Yes, commands);
                    }
                }
                LinkCommand::Disconnect => {
                    let _ = events.send(LinkEvent::StateChanged(LinkState::Disconnected));
                    return (ShouldReconnect::No, commands);
                }
            }
        }
    }
}
