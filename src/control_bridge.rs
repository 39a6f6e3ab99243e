use crate::config::BridgeConfig;
use crate::status::{EntityState, HotwordEvent};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Requests arriving from the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Run one listen call
    Listen,
    /// The host is stopping
    Shutdown,
}

#[derive(Deserialize)]
struct ServiceCall {
    service: String,
}

/// Accepts `{"service":"listen"}` or the bare word `listen` (same for `shutdown`).
pub fn parse_command(datagram: &[u8]) -> Option<ControlCommand> {
    let text = std::str::from_utf8(datagram).ok()?.trim();
    let service = match serde_json::from_str::<ServiceCall>(text) {
        Ok(call) => call.service,
        Err(_) => text.to_string(),
    };
    match service.as_str() {
        "listen" => Some(ControlCommand::Listen),
        "shutdown" => Some(ControlCommand::Shutdown),
        _ => None,
    }
}

/// Messages pushed to the host.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeMessage {
    State(EntityState),
    Event(HotwordEvent),
    Error { error: String, message: String },
}

pub struct ControlBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<ControlCommand>,
}

// The host talks to the listener over local UDP, ports come from the config
impl ControlBridge {
    pub async fn new(
        config: &BridgeConfig,
        tx: mpsc::Sender<ControlCommand>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(format!("127.0.0.1:{}", config.local_port)).await?;

        Ok(Self {
            socket: Arc::new(socket),
            target_addr: config.remote_addr.clone(),
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 1024];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            match parse_command(&buf[..len]) {
                Some(cmd) => {
                    log::debug!("control command {:?} from {}", cmd, from);
                    if self.tx.send(cmd).await.is_err() {
                        log::warn!("control receiver dropped, bridge exiting");
                        break;
                    }
                }
                None => log::warn!("ignoring unknown control message from {}", from),
            }
        }
        Ok(())
    }

    pub async fn send(&self, msg: &BridgeMessage) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg)?;
        self.socket.send_to(&payload, &self.target_addr).await?;
        Ok(())
    }
}
