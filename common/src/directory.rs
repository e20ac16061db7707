//! Server directory: the merged view of bootstrap, recent and
//! federation-announced servers, and the parser for peer announcements.
use std::collections::HashMap;

use serde_json::Value;

use crate::network::Network;
use crate::server::{Protocol, RecentList, ServerId, ServerRecord};

/// Minimum protocol version a federation peer must advertise to be
/// listed in the directory.
pub const MIN_PROTOCOL_VERSION: f64 = 0.9;

/// Parse a `server.peers.subscribe` result into directory records.
///
/// Each element is `[ignored, host, features]` where `features` is a
/// list of short strings: a protocol letter with an optional port
/// (empty port means the protocol's well-known port), `v<version>` for
/// the advertised version, and `p<level>` for the pruning level. Hosts
/// survive only with at least one parsed protocol entry and a version
/// of at least [`MIN_PROTOCOL_VERSION`]; everything else is dropped.
pub fn parse_servers(result: &Value) -> HashMap<String, ServerRecord> {
    let mut servers = HashMap::new();

    for item in result.as_array().into_iter().flatten() {
        let host = match item.get(1).and_then(Value::as_str) {
            Some(host) => host,
            None => continue,
        };
        let features = item
            .get(2)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut ports: Vec<(Protocol, u16)> = Vec::new();
        let mut version = None;
        let mut pruning = None;

        for feature in features.iter().filter_map(Value::as_str) {
            if let Some(protocol) = feature.chars().next().and_then(Protocol::from_letter) {
                if let Some(port) = parse_port(&feature[1..], protocol) {
                    ports.retain(|(p, _)| *p != protocol);
                    ports.push((protocol, port));
                }
            } else if let Some(v) = feature.strip_prefix('v') {
                version = Some(v.to_owned());
            } else if let Some(p) = feature.strip_prefix('p') {
                if p.chars().all(|c| c.is_ascii_digit()) {
                    pruning = Some(if p.is_empty() { "0".to_owned() } else { p.to_owned() });
                }
            }
        }

        let recent = version
            .as_deref()
            .and_then(|v| v.parse::<f64>().ok())
            .map_or(false, |v| v >= MIN_PROTOCOL_VERSION);

        let mut entries = ports.into_iter();
        if let (Some((protocol, port)), true) = (entries.next(), recent) {
            let mut record = ServerRecord::new(protocol, port);
            for (protocol, port) in entries {
                record.set_port(protocol, port);
            }
            record.version = version;
            record.pruning = pruning;

            servers.insert(host.to_owned(), record);
        }
    }
    servers
}

/// Port suffix of a protocol feature token. Empty means the well-known
/// port; anything non-numeric invalidates the token.
fn parse_port(s: &str, protocol: Protocol) -> Option<u16> {
    if s.is_empty() {
        Some(protocol.default_port())
    } else if s.chars().all(|c| c.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// The server directory. Merges three sources at read time: servers
/// announced by the federation itself (used exclusively when present),
/// the built-in bootstrap table, and hosts from the recent list.
#[derive(Debug, Clone)]
pub struct Directory {
    network: Network,
    announced: HashMap<String, ServerRecord>,
    recent: RecentList,
    rng: fastrand::Rng,
}

impl Directory {
    /// Create a directory for the given federation.
    pub fn new(network: Network, recent: RecentList, rng: fastrand::Rng) -> Self {
        Self {
            network,
            announced: HashMap::new(),
            recent,
            rng,
        }
    }

    /// The merged server table. When the federation has announced
    /// peers, those are used exclusively; otherwise the bootstrap table
    /// augmented with recently seen hosts. The bootstrap table itself
    /// is never mutated.
    pub fn servers(&self) -> HashMap<String, ServerRecord> {
        if !self.announced.is_empty() {
            return self.announced.clone();
        }
        let mut out = self.network.bootstrap();
        for id in self.recent.iter() {
            out.entry(id.host.clone())
                .or_insert_with(|| ServerRecord::new(id.protocol, id.port));
        }
        out
    }

    /// Every known server reachable over the given protocol, in stable
    /// (host) order.
    pub fn list_by_protocol(&self, protocol: Protocol) -> Vec<ServerId> {
        let mut list: Vec<ServerId> = self
            .servers()
            .into_iter()
            .filter_map(|(host, record)| {
                record
                    .port(protocol)
                    .map(|port| ServerId::new(host, port, protocol))
            })
            .collect();
        list.sort_by(|a, b| a.host.cmp(&b.host));
        list
    }

    /// Pick a uniformly random server speaking the given protocol.
    pub fn pick_random(&mut self, protocol: Protocol) -> Option<ServerId> {
        let list = self.list_by_protocol(protocol);
        if list.is_empty() {
            return None;
        }
        let ix = self.rng.usize(..list.len());

        list.into_iter().nth(ix)
    }

    /// Replace the federation-announced server set.
    pub fn set_announced(&mut self, servers: HashMap<String, ServerRecord>) {
        self.announced = servers;
    }

    /// Servers that connected successfully, most recent first.
    pub fn recent(&self) -> &RecentList {
        &self.recent
    }

    /// Record a successful connection.
    pub fn push_recent(&mut self, id: ServerId) {
        self.recent.push(id);
    }
}
