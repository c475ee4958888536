use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant};
use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use super::{cipher, frame, frame::Frame, LanDiscovery};

/// Announcements from pre-3.3 firmware, sent in clear
pub const PLAIN_PORT: u16 = 6666;
/// Announcements encrypted with the shared broadcast key
pub const ENCRYPTED_PORT: u16 = 6667;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Collects the periodic UDP announcements outlets broadcast on the LAN
pub struct UdpBroadcastDiscovery {
    listen_window: Duration,
}

impl UdpBroadcastDiscovery {
    pub fn new(listen_window: Duration) -> Self {
        Self { listen_window }
    }
}

fn bind_listener(port: u16) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .with_context(|| format!("Failed to bind UDP port {}", port))?;
    socket
        .set_read_timeout(Some(POLL_INTERVAL))
        .context("Failed to set UDP read timeout")?;
    Ok(socket)
}

impl LanDiscovery for UdpBroadcastDiscovery {
    fn scan(&self) -> Result<Value> {
        let plain = bind_listener(PLAIN_PORT)?;
        let encrypted = bind_listener(ENCRYPTED_PORT)?;
        let key = cipher::broadcast_key();

        let deadline = Instant::now() + self.listen_window;
        let mut devices = Map::new();
        let mut buf = [0u8; 4096];

        while Instant::now() < deadline {
            for (socket, key) in [(&plain, None), (&encrypted, Some(&key))] {
                let (n, from) = match socket.recv_from(&mut buf) {
                    Ok(received) => received,
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        continue
                    }
                    Err(e) => return Err(e).context("Failed to receive UDP announcement"),
                };

                match parse_announcement(&buf[..n], key) {
                    Ok(info) => {
                        let ip = info
                            .get("ip")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| from.ip().to_string());
                        if !devices.contains_key(&ip) {
                            tracing::debug!("Announcement from {}", ip);
                        }
                        devices.insert(ip, Value::Object(info));
                    }
                    Err(e) => tracing::debug!("Ignoring datagram from {}: {:#}", from, e),
                }
            }
        }

        Ok(Value::Object(devices))
    }
}

/// Decode one announcement datagram into its JSON object
pub fn parse_announcement(datagram: &[u8], key: Option<&[u8; 16]>) -> Result<Map<String, Value>> {
    let (frame, _) = Frame::decode(datagram)?;
    if !matches!(frame.cmd, frame::CMD_UDP | frame::CMD_UDP_NEW) {
        bail!("unexpected command {} in announcement", frame.cmd);
    }
    let (_, body) = frame.split_return_code();

    let json = match key {
        Some(key) => cipher::decrypt(key, body)?,
        None => body.to_vec(),
    };

    match serde_json::from_slice(&json).context("Announcement is not JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("announcement is not an object: {}", other),
    }
}
