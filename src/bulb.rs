//! WiZ bulb control over UDP
//!
//! Fire-and-forget `setPilot` datagrams on port 38899. The bulb never
//! acknowledges, so a send either leaves the socket or it doesn't; the next
//! tick is the retry.

use crate::color::Rgb;
use crate::error::AppError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// WiZ local control port
pub const BULB_PORT: u16 = 38899;

/// Where color commands go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulbTarget {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl BulbTarget {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            port: BULB_PORT,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.port))
    }
}

impl std::fmt::Display for BulbTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr())
    }
}

/// Anything the sample loop can hand a finished color to
#[async_trait]
pub trait ColorSink: Send + Sync {
    async fn send(&self, color: Rgb) -> Result<(), AppError>;
}

#[derive(Serialize)]
struct PilotCommand {
    method: &'static str,
    params: Rgb,
}

/// JSON formatter with `": "` and `", "` separators, the layout the bulb's
/// own tooling emits
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serialize a `setPilot` command for `color`
pub fn set_pilot_payload(color: Rgb) -> Result<Vec<u8>, AppError> {
    let command = PilotCommand {
        method: "setPilot",
        params: color,
    };

    let mut payload = Vec::with_capacity(64);
    let mut ser = Serializer::with_formatter(&mut payload, SpacedFormatter);
    command
        .serialize(&mut ser)
        .map_err(|e| AppError::Transmit(format!("Failed to encode setPilot: {}", e)))?;

    Ok(payload)
}

/// UDP client for a single bulb
pub struct BulbClient {
    socket: UdpSocket,
    target: BulbTarget,
    send_timeout: Duration,
}

impl BulbClient {
    /// Bind an ephemeral local IPv4 socket
    pub async fn connect(target: BulbTarget, send_timeout: Duration) -> Result<Self, AppError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| AppError::Transmit(format!("Failed to bind UDP socket: {}", e)))?;

        tracing::debug!("Bound {:?} for bulb {}", socket.local_addr().ok(), target);

        Ok(Self {
            socket,
            target,
            send_timeout,
        })
    }

    pub fn target(&self) -> BulbTarget {
        self.target
    }
}

#[async_trait]
impl ColorSink for BulbClient {
    async fn send(&self, color: Rgb) -> Result<(), AppError> {
        let payload = set_pilot_payload(color)?;

        match tokio::time::timeout(
            self.send_timeout,
            self.socket.send_to(&payload, self.target.addr()),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::Transmit(format!("send to {} failed: {}", self.target, e))),
            Err(_) => Err(AppError::Transmit(format!(
                "send to {} timed out after {:?}",
                self.target, self.send_timeout
            ))),
        }
    }
}
