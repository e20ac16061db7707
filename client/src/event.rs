//! Coordinator ingress events and commands.
use std::collections::HashMap;
use std::fmt;

use crossbeam_channel as chan;
use serde_json::Value;

use tumbaga_common::server::{Protocol, ServerId, ServerRecord};
use tumbaga_common::Height;

use crate::interface::Conn;

/// Connection status of the coordinator as a whole, tracking the main
/// interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No main interface yet; a connection attempt is under way.
    Connecting,
    /// The main interface is connected.
    Connected,
    /// The main interface was lost.
    Disconnected,
}

impl ConnectionStatus {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Connecting,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// User-tunable connection parameters.
#[derive(Debug, Clone)]
pub struct Parameters {
    /// Host of the intended main server.
    pub host: String,
    /// Port of the intended main server.
    pub port: u16,
    /// Protocol the pool connects over.
    pub protocol: Protocol,
    /// Proxy specification handed to the dialer, if any.
    pub proxy: Option<String>,
    /// Whether a lagging or lost main is replaced automatically.
    pub auto_connect: bool,
}

impl Parameters {
    /// The server these parameters designate as main.
    pub fn server(&self) -> ServerId {
        ServerId::new(self.host.clone(), self.port, self.protocol)
    }
}

/// Tip state a server last reported over its header subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTip {
    /// Reported block height.
    pub height: Height,
    /// Advertised merkle root, when the server sent one.
    pub merkle_root: Option<String>,
    /// Advertised utxo root, when the server sent one.
    pub utxo_root: Option<String>,
}

/// A command or request that can be sent to the coordinator.
pub enum Command {
    /// Select the main server.
    SetServer(ServerId),
    /// Apply user connection parameters.
    SetParameters(Parameters),
    /// Get the current connection parameters.
    GetParameters(chan::Sender<Parameters>),
    /// Get the tip state the main server last reported.
    GetServerTip(chan::Sender<Option<ServerTip>>),
    /// Get the merged server directory.
    GetServers(chan::Sender<HashMap<String, ServerRecord>>),
    /// Get the servers with a live connection.
    GetInterfaces(chan::Sender<Vec<ServerId>>),
    /// Read a header from the local chain.
    GetHeader(Height, chan::Sender<Option<Value>>),
    /// Get the local chain tip height.
    GetHeight(chan::Sender<Height>),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetServer(server) => write!(f, "SetServer({})", server),
            Self::SetParameters(parameters) => write!(f, "SetParameters({:?})", parameters),
            Self::GetParameters(_) => write!(f, "GetParameters"),
            Self::GetServerTip(_) => write!(f, "GetServerTip"),
            Self::GetServers(_) => write!(f, "GetServers"),
            Self::GetInterfaces(_) => write!(f, "GetInterfaces"),
            Self::GetHeader(height, _) => write!(f, "GetHeader({})", height),
            Self::GetHeight(_) => write!(f, "GetHeight"),
        }
    }
}

/// Everything the coordinator's event loop consumes, delivered over a
/// single ingress queue: interface status events, the notifications the
/// coordinator itself subscribes to, and user commands.
pub enum Event {
    /// An interface reporting the outcome of a connect attempt, or its
    /// shutdown.
    Status(Conn),
    /// A `blockchain.headers.subscribe` reply or notification.
    Header(Conn, Value),
    /// A `server.peers.subscribe` reply.
    Peers(Conn, Value),
    /// A `server.banner` reply.
    Banner(Conn, Value),
    /// A user command.
    Command(Command),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(conn) => write!(
                f,
                "Status({}, connected={})",
                conn.server(),
                conn.is_connected()
            ),
            Self::Header(conn, _) => write!(f, "Header({})", conn.server()),
            Self::Peers(conn, _) => write!(f, "Peers({})", conn.server()),
            Self::Banner(conn, _) => write!(f, "Banner({})", conn.server()),
            Self::Command(command) => write!(f, "Command({:?})", command),
        }
    }
}
