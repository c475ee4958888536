use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde_json::{json, Value};
use shared::protocol::DEFAULT_PROTOCOL_VERSION;
use crate::config::DeviceConfig;
use super::{cipher, frame, frame::Frame, OutletConnector, OutletSession};

pub const COMMAND_PORT: u16 = 6668;

/// Data point holding the relay state on single-socket outlets
const SWITCH_DP: &str = "1";

/// 3.2/3.3 payloads carry the version string followed by twelve zero bytes
const VERSION_HEADER_LEN: usize = 15;

/// Opens TCP command sessions on port 6668
pub struct TcpOutletConnector {
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TcpOutletConnector {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            port: COMMAND_PORT,
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
        }
    }

    #[cfg(test)]
    fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl OutletConnector for TcpOutletConnector {
    fn open(
        &self,
        device_id: &str,
        address: &str,
        local_key: &str,
    ) -> Result<Box<dyn OutletSession>> {
        let addr = (address, self.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid device address '{}'", address))?
            .next()
            .with_context(|| format!("Device address '{}' did not resolve", address))?;

        Ok(Box::new(TcpOutletSession {
            device_id: device_id.to_string(),
            addr,
            local_key: local_key.to_string(),
            version: DEFAULT_PROTOCOL_VERSION,
            seq: 0,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }))
    }
}

struct TcpOutletSession {
    device_id: String,
    addr: SocketAddr,
    local_key: String,
    version: f64,
    seq: u32,
    connect_timeout: Duration,
    io_timeout: Duration,
}

/// Map a numeric protocol version onto the wire label this session can speak
fn wire_version(version: f64) -> Result<&'static str> {
    match (version * 10.0).round() as i64 {
        31 => Ok("3.1"),
        32 => Ok("3.2"),
        33 => Ok("3.3"),
        _ => bail!("protocol version {} is not supported (3.1 to 3.3 only)", version),
    }
}

impl TcpOutletSession {
    fn control_payload(&self, on: bool) -> Result<Vec<u8>> {
        let command = json!({
            "devId": self.device_id,
            "uid": self.device_id,
            "t": Utc::now().timestamp().to_string(),
            "dps": { SWITCH_DP: on },
        });
        let plain = serde_json::to_vec(&command)?;
        let key = self.local_key.as_bytes();
        let label = wire_version(self.version)?;

        let mut out = label.as_bytes().to_vec();
        if label == "3.1" {
            let body = STANDARD.encode(cipher::encrypt(key, &plain)?);
            let digest = format!(
                "{:x}",
                md5::compute(format!("data={}||lpv=3.1||{}", body, self.local_key))
            );
            out.extend_from_slice(digest[8..24].as_bytes());
            out.extend_from_slice(body.as_bytes());
        } else {
            out.extend_from_slice(&[0u8; VERSION_HEADER_LEN - 3]);
            out.extend_from_slice(&cipher::encrypt(key, &plain)?);
        }
        Ok(out)
    }

    fn set_switch(&mut self, on: bool) -> Result<Option<Value>> {
        let payload = self.control_payload(on)?;
        self.seq = self.seq.wrapping_add(1);
        let request = Frame { seq: self.seq, cmd: frame::CMD_CONTROL, payload }.encode();

        let mut stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout)
            .with_context(|| format!("Failed to connect to {}", self.addr))?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;

        stream
            .write_all(&request)
            .with_context(|| format!("Failed to send command to {}", self.addr))?;

        let reply = frame::read_frame(&mut stream)
            .with_context(|| format!("No valid reply from {}", self.addr))?;

        let (code, body) = reply.split_return_code();
        if let Some(code) = code.filter(|&c| c != 0) {
            bail!("device rejected command with return code {}", code);
        }
        Ok(self.decode_reply(body))
    }

    /// Best effort: many firmwares ack with an empty body
    fn decode_reply(&self, body: &[u8]) -> Option<Value> {
        if body.is_empty() {
            return None;
        }
        let body = if body.starts_with(b"3.") && body.len() > VERSION_HEADER_LEN {
            &body[VERSION_HEADER_LEN..]
        } else {
            body
        };

        let plain = cipher::decrypt(self.local_key.as_bytes(), body).unwrap_or_else(|_| body.to_vec());
        match serde_json::from_slice(&plain) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("Undecodable reply from {}: {}", self.device_id, e);
                None
            }
        }
    }
}

impl OutletSession for TcpOutletSession {
    fn set_version(&mut self, version: f64) {
        self.version = version;
    }

    fn turn_on(&mut self) -> Result<Option<Value>> {
        self.set_switch(true)
    }

    fn turn_off(&mut self) -> Result<Option<Value>> {
        self.set_switch(false)
    }
}
