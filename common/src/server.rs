//! Server identities and directory records.
use std::fmt;
use std::str::FromStr;

use nonempty::NonEmpty;
use thiserror::Error;

/// Maximum number of servers kept on the recent list.
pub const MAX_RECENT_SERVERS: usize = 20;

/// Transport protocol spoken by a server, identified on the wire by a
/// single letter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain TCP (`t`).
    Tcp,
    /// TLS (`s`).
    Ssl,
    /// HTTP (`h`).
    Http,
    /// HTTPS (`g`).
    Https,
}

impl Protocol {
    /// All protocols, in letter order.
    pub const ALL: [Protocol; 4] = [Protocol::Tcp, Protocol::Ssl, Protocol::Http, Protocol::Https];

    /// The letter identifying this protocol in server addresses and
    /// federation feature strings.
    pub fn letter(&self) -> char {
        match self {
            Protocol::Tcp => 't',
            Protocol::Ssl => 's',
            Protocol::Http => 'h',
            Protocol::Https => 'g',
        }
    }

    /// Parse a protocol from its identifying letter.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            't' => Some(Protocol::Tcp),
            's' => Some(Protocol::Ssl),
            'h' => Some(Protocol::Http),
            'g' => Some(Protocol::Https),
            _ => None,
        }
    }

    /// Return the well-known port for this protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Tcp => 50001,
            Protocol::Ssl => 50002,
            Protocol::Http => 8081,
            Protocol::Https => 8082,
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Ssl
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// An error parsing a server address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The address is not of the form `host:port:protocol`.
    #[error("invalid server address {0:?}")]
    InvalidAddress(String),
    /// The port is not a number in range.
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    /// The protocol letter is unknown.
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),
}

/// Identity of one remote server: host, port and protocol, serialized
/// as `host:port:protocol`. Equality is on the full triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerId {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl ServerId {
    /// Construct a server identity.
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.protocol)
    }
}

impl FromStr for ServerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(port), Some(protocol), None) if !host.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| ParseError::InvalidPort(port.to_owned()))?;
                let mut letters = protocol.chars();
                let protocol = match (letters.next(), letters.next()) {
                    (Some(letter), None) => Protocol::from_letter(letter),
                    _ => None,
                }
                .ok_or_else(|| ParseError::UnknownProtocol(protocol.to_owned()))?;

                Ok(Self::new(host, port, protocol))
            }
            _ => Err(ParseError::InvalidAddress(s.to_owned())),
        }
    }
}

/// Directory entry for one host: the ports it listens on, keyed by
/// protocol, plus what it advertised about itself. There is always at
/// least one protocol entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    ports: NonEmpty<(Protocol, u16)>,
    /// Advertised pruning level; `None` when unknown.
    pub pruning: Option<String>,
    /// Advertised protocol version; `None` when not announced.
    pub version: Option<String>,
}

impl ServerRecord {
    /// Create a record with a single protocol entry.
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            ports: NonEmpty::new((protocol, port)),
            pruning: None,
            version: None,
        }
    }

    /// Create a record listening on the well-known port of every
    /// protocol.
    pub fn with_default_ports() -> Self {
        Self {
            ports: NonEmpty {
                head: (Protocol::Tcp, Protocol::Tcp.default_port()),
                tail: vec![
                    (Protocol::Ssl, Protocol::Ssl.default_port()),
                    (Protocol::Http, Protocol::Http.default_port()),
                    (Protocol::Https, Protocol::Https.default_port()),
                ],
            },
            pruning: None,
            version: None,
        }
    }

    /// Set the port for a protocol, replacing any previous entry.
    pub fn set_port(&mut self, protocol: Protocol, port: u16) {
        if self.ports.head.0 == protocol {
            self.ports.head.1 = port;
        } else if let Some(entry) = self.ports.tail.iter_mut().find(|(p, _)| *p == protocol) {
            entry.1 = port;
        } else {
            self.ports.push((protocol, port));
        }
    }

    /// The port this host listens on for the given protocol, if any.
    pub fn port(&self, protocol: Protocol) -> Option<u16> {
        self.ports
            .iter()
            .find(|(p, _)| *p == protocol)
            .map(|(_, port)| *port)
    }

    /// Whether this host speaks the given protocol.
    pub fn has(&self, protocol: Protocol) -> bool {
        self.port(protocol).is_some()
    }

    /// The pruning level to display; `-` when unknown.
    pub fn pruning_level(&self) -> &str {
        self.pruning.as_deref().unwrap_or("-")
    }
}

/// Servers that connected successfully, most recent first. Pushing an
/// already-known server moves it to the head; the list never exceeds
/// [`MAX_RECENT_SERVERS`] entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentList {
    entries: Vec<ServerId>,
}

impl RecentList {
    /// Build a list from entries ordered most recent first, dropping
    /// duplicates and excess entries.
    pub fn new(entries: impl IntoIterator<Item = ServerId>) -> Self {
        let mut list = Self::default();
        for id in entries {
            if !list.entries.contains(&id) {
                list.entries.push(id);
            }
        }
        list.entries.truncate(MAX_RECENT_SERVERS);
        list
    }

    /// Record a successful connection, moving the server to the head.
    pub fn push(&mut self, id: ServerId) {
        self.entries.retain(|s| *s != id);
        self.entries.insert(0, id);
        self.entries.truncate(MAX_RECENT_SERVERS);
    }

    /// Iterate over the entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &ServerId> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
