use std::sync::Arc;

use shared::protocol::ClientFrame;
use tokio::{
    sync::mpsc,
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    transport::{Channel, ChannelSignal, Endpoint},
    SyncClient,
};

/// Connection driver for one channel: connect, pump frames both ways, keep
/// the heartbeat, and reconnect after abnormal closure. All of its timers
/// live inside this task, so aborting it cancels the heartbeat and any
/// pending reconnect in one step.
pub(crate) async fn drive(
    client: Arc<SyncClient>,
    endpoint: Endpoint,
    epoch: u64,
    mut commands: mpsc::UnboundedReceiver<ClientFrame>,
) {
    let mut delay = client.config.reconnect_delay;
    loop {
        match client.credentials.bearer_token() {
            Some(token) => match client.transport.connect(&endpoint, &token).await {
                Ok(channel) => {
                    info!(%endpoint, "channel connected");
                    delay = client.config.reconnect_delay;
                    if !run_connection(&client, &endpoint, epoch, channel, &mut commands).await {
                        return;
                    }
                }
                Err(err) => {
                    warn!(%endpoint, error = %err, "channel connect failed");
                }
            },
            None => {
                warn!(%endpoint, "no bearer credential available; deferring connect");
            }
        }

        client.on_channel_closed(&endpoint, epoch).await;
        debug!(%endpoint, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        sleep(delay).await;
        if let Some(max_delay) = client.config.reconnect_max_delay {
            delay = (delay * 2).min(max_delay);
        }
    }
}

/// Pump one open connection until it closes. Returns false when the engine
/// dropped the command sender, i.e. the channel was torn down on purpose and
/// the driver should exit instead of reconnecting.
async fn run_connection(
    client: &Arc<SyncClient>,
    endpoint: &Endpoint,
    epoch: u64,
    mut channel: Channel,
    commands: &mut mpsc::UnboundedReceiver<ClientFrame>,
) -> bool {
    let period = client.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if channel.frames_out.send(ClientFrame::Ping).is_err() {
                    return true;
                }
            }
            command = commands.recv() => match command {
                Some(frame) => {
                    if channel.frames_out.send(frame).is_err() {
                        return true;
                    }
                }
                None => return false,
            },
            signal = channel.signals_in.recv() => match signal {
                Some(ChannelSignal::Frame(frame)) => {
                    client.handle_frame(endpoint, epoch, frame).await;
                }
                Some(ChannelSignal::Closed { reason }) => {
                    warn!(
                        %endpoint,
                        reason = reason.as_deref().unwrap_or("connection lost"),
                        "channel closed"
                    );
                    return true;
                }
                None => {
                    warn!(%endpoint, "channel closed");
                    return true;
                }
            },
        }
    }
}
