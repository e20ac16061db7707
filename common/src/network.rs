//! Explorer federation. Eg. *Mainnet*.
use std::collections::HashMap;
use std::str::FromStr;

use crate::server::ServerRecord;

/// Explorer federation a client connects to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Network {
    /// The production federation.
    Mainnet,
    /// The test federation.
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Self::Mainnet
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            _ => Err(format!("invalid network specified {:?}", s)),
        }
    }
}

impl Network {
    /// Return the short string representation of this network.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// Built-in server hosts. Used to bootstrap the client's server
    /// directory before the federation has announced any peers.
    pub fn seeds(&self) -> &[&str] {
        match self {
            Network::Mainnet => &[
                "electro.alloyed.net",
                "mina.tumbaga.dev",
                "quimbaya.copperworks.io",
                "sinu.goldriver.cc",
                "tairona.alloyed.net",
                "muisca.tumbaga.dev",
                "calima.copperworks.io",
                "zenu.goldriver.cc",
            ],
            Network::Testnet => &["testnet.tumbaga.dev", "calima-test.copperworks.io"],
        }
    }

    /// The bootstrap server table: every seed host, reachable on the
    /// well-known port of each protocol. Built fresh on every call so
    /// callers can merge into it without mutating shared state.
    pub fn bootstrap(&self) -> HashMap<String, ServerRecord> {
        self.seeds()
            .iter()
            .map(|host| (host.to_string(), ServerRecord::with_default_ports()))
            .collect()
    }
}
