use crate::backoff::ReconnectBackoff;
use crate::settings::LinkSettings;
use crate::{LinkCommand, LinkEvent, LinkState};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::Manager;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

/// Nordic UART Service, used by Mobilinkd and most KISS-over-BLE TNCs to
/// expose a byte-stream characteristic pair.
const NUS_TX_CHAR: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";
const NUS_RX_CHAR: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";
const BLE_MTU: usize = 20;

pub async fn run(
    settings: LinkSettings,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let mut backoff = ReconnectBackoff::new();

    loop {
        let _ = events.send(LinkEvent::StateChanged(LinkState::Connecting));

        match connect_and_run(&settings, &events, &mut commands).await {
            Ok(()) => return,
            Err(e) => {
                let _ = events.send(LinkEvent::StateChanged(LinkState::Failed(e)));
                if !settings.ble_auto_reconnect {
                    return;
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
        }
    }
}

async fn connect_and_run(
    settings: &LinkSettings,
    events: &mpsc::UnboundedSender<LinkEvent>,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> Result<(), String> {
    let manager = Manager::new()
        .await
        .map_err(|e| format!("bluetooth manager init failed: {e}"))?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|e| format!("no bluetooth adapter: {e}"))?;
    let adapter = adapters
        .into_iter()
        .next()
        .ok_or_else(|| "no bluetooth adapter present".to_string())?;

    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| format!("scan failed: {e}"))?;
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| format!("peripheral enumeration failed: {e}"))?;

    let mut target = None;
    for p in peripherals {
        if let Ok(Some(props)) = p.properties().await {
            let id_matches = props.address.to_string() == settings.ble_id;
            let name_matches = !settings.ble_name.is_empty()
                && props.local_name.as_deref() == Some(settings.ble_name.as_str());
            if id_matches || name_matches {
                target = Some(p);
                break;
            }
        }
    }
    let peripheral = target.ok_or_else(|| format!("peripheral '{}' not found", settings.ble_id))?;

    peripheral
        .connect()
        .await
        .map_err(|e| format!("connect failed: {e}"))?;
    peripheral
        .discover_services()
        .await
        .map_err(|e| format!("service discovery failed: {e}"))?;

    let characteristics = peripheral.characteristics();
    let tx_char = characteristics
        .iter()
        .find(|c| c.uuid.to_string() == NUS_TX_CHAR)
        .ok_or_else(|| "TX characteristic not found".to_string())?
        .clone();
    let rx_char = characteristics
        .iter()
        .find(|c| c.uuid.to_string() == NUS_RX_CHAR)
        .ok_or_else(|| "RX characteristic not found".to_string())?
        .clone();

    peripheral
        .subscribe(&tx_char)
        .await
        .map_err(|e| format!("subscribe failed: {e}"))?;

    let _ = events.send(LinkEvent::StateChanged(LinkState::Connected));

    let mut notifications = peripheral
        .notifications()
        .await
        .map_err(|e| format!("notification stream failed: {e}"))?;

    loop {
        tokio::select! {
            notification = notifications.next() => {
                match notification {
                    Some(n) => {
                        let _ = events.send(LinkEvent::Data(n.value));
                    }
                    None => {
                        let _ = events.send(LinkEvent::StateChanged(LinkState::Disconnected));
                        return Ok(());
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(LinkCommand::Send(data)) => {
                        for chunk in data.chunks(BLE_MTU) {
                            if let Err(e) = peripheral
                                .write(&rx_char, chunk, WriteType::WithoutResponse)
                                .await
                            {
                                warn!(error = %e, "ble link write failed");
                                return Err(format!("send failed: {e}"));
                            }
                        }
                    }
                    Some(LinkCommand::Disconnect) | None => {
                        let _ = peripheral.disconnect().await;
                        let _ = events.send(LinkEvent::StateChanged(LinkState::Disconnected));
                        return Ok(());
                    }
                }
            }
        }
    }
}
