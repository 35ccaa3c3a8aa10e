use crate::settings::LinkSettings;
use crate::{LinkCommand, LinkEvent, LinkState};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::warn;

const READ_CAP: usize = 64 * 1024;

pub async fn run(
    settings: LinkSettings,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let _ = events.send(LinkEvent::StateChanged(LinkState::Connecting));

    let stream = match TcpStream::connect((settings.host.as_str(), settings.port)).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(LinkEvent::StateChanged(LinkState::Failed(format!(
                "connect to {}:{} failed: {e}",
                settings.host, settings.port
            ))));
            return;
        }
    };
    let _ = events.send(LinkEvent::StateChanged(LinkState::Connected));

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_CAP];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        let _ = events.send(LinkEvent::StateChanged(LinkState::Disconnected));
                        return;
                    }
                    Ok(n) => {
                        let _ = events.send(LinkEvent::Data(buf[..n].to_vec()));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        warn!(host = %settings.host, "tcp link read would block");
                    }
                    Err(e) => {
                        let _ = events.send(LinkEvent::StateChanged(LinkState::Failed(format!(
                            "read failed: {e}"
                        ))));
                        return;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(LinkCommand::Send(data)) => {
                        use tokio::io::AsyncWriteExt;
                        if let Err(e) = writer.write_all(&data).await {
                            let _ = events.send(LinkEvent::StateChanged(LinkState::Failed(format!(
                                "send failed: {e}"
                            ))));
                            return;
                        }
                    }
                    Some(LinkCommand::Disconnect) | None => {
                        let _ = events.send(LinkEvent::StateChanged(LinkState::Disconnected));
                        return;
                    }
                }
            }
        }
    }
}
