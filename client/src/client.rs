//! The network coordinator.
//!
//! One dedicated worker consumes the ingress queue and owns the pool
//! state; interfaces run on their own threads and only ever talk back
//! through the queue. External callers hold a [`Handle`].
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel as chan;
use log::*;
use serde_json::{json, Value};

use tumbaga_common::config::Store;
use tumbaga_common::directory::{parse_servers, Directory};
use tumbaga_common::network::Network;
use tumbaga_common::server::{Protocol, RecentList, ServerId};
use tumbaga_common::Height;

use crate::chain::Blockchain;
use crate::error::Error;
use crate::event::{Command, ConnectionStatus, Event, Parameters, ServerTip};
use crate::handle::Handle;
use crate::interface::{request, Conn, Dialer, Observer, Request};
use crate::pool::Pool;
use crate::subscriptions::{Registry, Topic};

/// Default target size of the connection pool.
pub const TARGET_POOL_SIZE: usize = 8;
/// Queue poll timeout while at least one server is connected.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Queue poll timeout while the pool has no live connections.
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Method of the header subscription kept on every connection.
pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
/// Method of the federation peer-list subscription.
pub const PEERS_SUBSCRIBE: &str = "server.peers.subscribe";
/// Method of the server banner request.
pub const SERVER_BANNER: &str = "server.banner";

/// State shared between the event loop and handles. The registry mutex
/// is the coordinator lock; the rest are eventually-consistent views
/// written only by the event loop.
pub(crate) struct Shared {
    pub registry: Mutex<Registry>,
    status: AtomicU8,
    pub main: Mutex<Option<Conn>>,
    pub default_server: Mutex<ServerId>,
    pub banner: Mutex<String>,
}

impl Shared {
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_code(self.status.load(Ordering::Relaxed))
    }

    fn store_status(&self, status: ConnectionStatus) {
        self.status.store(status.code(), Ordering::Relaxed);
    }
}

/// The network coordinator. Generic over its collaborators: the
/// configuration store `S`, the connection factory `D` and the local
/// header chain `B`.
pub struct Client<S, D, B> {
    config: S,
    dialer: D,
    chain: B,
    directory: Directory,
    pub(crate) pool: Pool,
    heights: HashMap<ServerId, Height>,
    merkle_roots: HashMap<ServerId, String>,
    utxo_roots: HashMap<ServerId, String>,
    main: Option<Conn>,
    default_server: ServerId,
    protocol: Protocol,
    proxy: Option<String>,
    auto_cycle: bool,
    num_servers: usize,
    header_observer: Observer,
    rng: fastrand::Rng,
    events: chan::Receiver<Event>,
    sender: chan::Sender<Event>,
    shared: Arc<Shared>,
}

impl<S: Store, D: Dialer, B: Blockchain> Client<S, D, B> {
    /// Create a coordinator for the given federation.
    ///
    /// Reads `server`, `protocol`, `proxy`, `auto_cycle`, `oneserver`
    /// and `recent_servers` from the configuration store; when no
    /// server is remembered, one is drawn at random from the bootstrap
    /// table.
    pub fn new(
        network: Network,
        config: S,
        dialer: D,
        chain: B,
        rng: fastrand::Rng,
    ) -> Result<Self, Error> {
        let protocol = config
            .get_str("protocol")
            .and_then(|s| s.chars().next())
            .and_then(Protocol::from_letter)
            .unwrap_or_default();
        let proxy = config.get_str("proxy");
        let auto_cycle = config.get_bool("auto_cycle", true);
        let num_servers = if config.get_bool("oneserver", false) {
            0
        } else {
            TARGET_POOL_SIZE
        };
        let recent = RecentList::new(
            config
                .get("recent_servers")
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|s| s.parse().ok()),
        );
        let mut directory = Directory::new(network, recent, rng.clone());

        let default_server = match config.get_str("server").and_then(|s| s.parse().ok()) {
            Some(server) => server,
            None => directory
                .pick_random(protocol)
                .ok_or(Error::NoServers(protocol))?,
        };

        let (sender, events) = chan::unbounded();
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            status: AtomicU8::new(ConnectionStatus::Connecting.code()),
            main: Mutex::new(None),
            default_server: Mutex::new(default_server.clone()),
            banner: Mutex::new(String::new()),
        });

        let header_observer = Observer::new({
            let sender = sender.clone();
            move |conn: &Conn, reply: &Value| {
                sender.send(Event::Header(conn.clone(), reply.clone())).ok();
            }
        });

        // Default subscriptions: the banner and the federation peer
        // list follow the main interface around.
        {
            let mut registry = shared.registry.lock().unwrap();

            let banner_observer = Observer::new({
                let sender = sender.clone();
                move |conn: &Conn, reply: &Value| {
                    sender.send(Event::Banner(conn.clone(), reply.clone())).ok();
                }
            });
            let peers_observer = Observer::new({
                let sender = sender.clone();
                move |conn: &Conn, reply: &Value| {
                    sender.send(Event::Peers(conn.clone(), reply.clone())).ok();
                }
            });
            registry
                .subscriptions
                .insert(banner_observer, vec![request(SERVER_BANNER, vec![])]);
            registry
                .subscriptions
                .insert(peers_observer, vec![request(PEERS_SUBSCRIBE, vec![])]);
        }

        Ok(Self {
            config,
            dialer,
            chain,
            directory,
            pool: Pool::default(),
            heights: HashMap::new(),
            merkle_roots: HashMap::new(),
            utxo_roots: HashMap::new(),
            main: None,
            default_server,
            protocol,
            proxy,
            auto_cycle,
            num_servers,
            header_observer,
            rng,
            events,
            sender,
            shared,
        })
    }

    /// Create a handle to this coordinator, usable from any thread.
    pub fn handle(&self) -> Handle {
        Handle::new(self.shared.clone(), self.sender.clone())
    }

    /// Run the coordinator. Starts the chain collaborator, dials the
    /// intended main server plus a pool of random peers, then consumes
    /// the ingress queue until [`Handle::stop`] is called. On exit,
    /// every interface is asked to stop; their threads drain on their
    /// own.
    pub fn run(mut self) -> Result<(), Error> {
        self.chain.start();
        self.shared.registry.lock().unwrap().running = true;
        self.start_interfaces();

        while self.is_running() {
            let timeout = if self.pool.connected().is_empty() {
                RECONNECT_TIMEOUT
            } else {
                IDLE_TIMEOUT
            };
            match self.events.recv_timeout(timeout) {
                Ok(event) => self.process(event),
                Err(chan::RecvTimeoutError::Timeout) => self.refill(),
                Err(chan::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(target: "client", "Stopping all interfaces..");
        for conn in self.pool.handles() {
            conn.stop();
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.registry.lock().unwrap().running
    }

    /// Handle one ingress event, then re-establish a main interface if
    /// the current one is gone and auto-cycling is enabled.
    pub(crate) fn process(&mut self, event: Event) {
        match event {
            Event::Status(conn) => self.on_status(conn),
            Event::Header(conn, reply) => self.on_header(conn, &reply),
            Event::Peers(_, reply) => self.on_peers(&reply),
            Event::Banner(_, reply) => self.on_banner(&reply),
            Event::Command(command) => self.command(command),
        }

        if !self.main_is_connected() && self.auto_cycle {
            self.promote_random();
        }
    }

    /// Top up the pool with one random dial. In-flight dials count
    /// against the target so the pool can never overshoot it.
    pub(crate) fn refill(&mut self) {
        let connected = self.pool.connected().len();
        let pending = self.pool.pending().len();

        if connected < self.num_servers && connected + pending <= self.num_servers {
            self.start_random_interface();
        }
    }

    /// Dial the intended main server and fill the rest of the pool
    /// with random picks.
    pub(crate) fn start_interfaces(&mut self) {
        let server = self.default_server.clone();
        let conn = self.start_interface(&server);
        self.set_main(Some(conn));

        for _ in 0..self.num_servers {
            self.start_random_interface();
        }
    }

    /// Dial a server, unless it is already held or being dialed.
    fn start_interface(&mut self, server: &ServerId) -> Conn {
        if let Some(conn) = self.pool.connected().get(server) {
            return conn.clone();
        }
        if let Some(conn) = self.pool.pending().get(server) {
            return conn.clone();
        }
        debug!(target: "client", "Connecting to {}..", server);

        let conn = self.dialer.dial(server, self.proxy.as_deref());
        self.pool.dialed(server.clone(), conn.clone());
        conn.clone().start(self.sender.clone());

        conn
    }

    fn start_random_interface(&mut self) {
        if let Some(server) = self.random_server() {
            self.start_interface(&server);
        }
    }

    /// A random directory server of the current protocol that the pool
    /// holds no opinion about. When no candidate remains and nothing is
    /// connected, past failures are forgotten so the next tick can try
    /// again.
    fn random_server(&mut self) -> Option<ServerId> {
        let candidates: Vec<ServerId> = self
            .directory
            .list_by_protocol(self.protocol)
            .into_iter()
            .filter(|server| !self.pool.is_tracked(server))
            .collect();

        if candidates.is_empty() {
            if self.pool.connected().is_empty() {
                self.pool.clear_disconnected();
            }
            return None;
        }
        let ix = self.rng.usize(..candidates.len());

        candidates.into_iter().nth(ix)
    }

    fn on_status(&mut self, conn: Conn) {
        let server = conn.server().clone();

        if conn.is_connected() {
            debug!(target: "client", "Connected to {}", server);

            self.pool.admit(server.clone(), conn.clone());
            self.add_recent_server(server);
            conn.send(
                &[request(HEADERS_SUBSCRIBE, vec![])],
                self.header_observer.clone(),
            );

            if self.is_main(&conn) {
                self.replay_subscriptions(&conn);
                self.set_status(ConnectionStatus::Connected);
            }
        } else {
            debug!(target: "client", "Disconnected from {}", server);

            self.pool.retire(&server);
            self.heights.remove(&server);
            self.merkle_roots.remove(&server);
            self.utxo_roots.remove(&server);

            if self.is_main(&conn) {
                self.set_status(ConnectionStatus::Disconnected);
            }
        }
    }

    fn on_header(&mut self, conn: Conn, reply: &Value) {
        let result = match reply.get("result") {
            Some(result) => result,
            None => return,
        };
        let height = match result.get("block_height").and_then(Value::as_u64) {
            Some(height) => height,
            None => return,
        };
        let server = conn.server().clone();

        self.heights.insert(server.clone(), height);
        if let Some(root) = result.get("merkle_root").and_then(Value::as_str) {
            self.merkle_roots.insert(server.clone(), root.to_owned());
        }
        if let Some(root) = result.get("utxo_root").and_then(Value::as_str) {
            self.utxo_roots.insert(server.clone(), root.to_owned());
        }
        // The height table is current before the chain sees the header.
        self.chain.submit(conn.clone(), result.clone());

        if self.is_main(&conn) && self.server_is_lagging() && self.auto_cycle {
            info!(target: "client", "Server {} is lagging, stopping interface", server);
            conn.stop();
        } else {
            self.trigger(Topic::Updated);
        }
    }

    fn on_peers(&mut self, reply: &Value) {
        let result = match reply.get("result") {
            Some(result) => result,
            None => return,
        };
        self.directory.set_announced(parse_servers(result));
        self.trigger(Topic::Servers);
    }

    fn on_banner(&mut self, reply: &Value) {
        if let Some(banner) = reply.get("result").and_then(Value::as_str) {
            *self.shared.banner.lock().unwrap() = banner.to_owned();
            self.trigger(Topic::Banner);
        }
    }

    fn command(&mut self, command: Command) {
        debug!(target: "client", "Received command: {:?}", command);

        match command {
            Command::SetServer(server) => self.set_server(server),
            Command::SetParameters(parameters) => self.set_parameters(parameters),
            Command::GetParameters(reply) => {
                reply
                    .send(Parameters {
                        host: self.default_server.host.clone(),
                        port: self.default_server.port,
                        protocol: self.default_server.protocol,
                        proxy: self.proxy.clone(),
                        auto_connect: self.auto_cycle,
                    })
                    .ok();
            }
            Command::GetServerTip(reply) => {
                let tip = self.heights.get(&self.default_server).map(|height| ServerTip {
                    height: *height,
                    merkle_root: self.merkle_roots.get(&self.default_server).cloned(),
                    utxo_root: self.utxo_roots.get(&self.default_server).cloned(),
                });
                reply.send(tip).ok();
            }
            Command::GetServers(reply) => {
                reply.send(self.directory.servers()).ok();
            }
            Command::GetInterfaces(reply) => {
                reply
                    .send(self.pool.connected().keys().cloned().collect())
                    .ok();
            }
            Command::GetHeader(height, reply) => {
                reply.send(self.chain.read_header(height)).ok();
            }
            Command::GetHeight(reply) => {
                reply.send(self.chain.height()).ok();
            }
        }
    }

    /// Select the main server. A no-op when it is already the connected
    /// main, or when its protocol differs from the pool's (the caller
    /// must change protocols through [`Client::set_parameters`] first).
    fn set_server(&mut self, server: ServerId) {
        if server == self.default_server && self.main_is_connected() {
            return;
        }
        if server.protocol != self.protocol {
            return;
        }
        // Stop the current main to terminate its subscriptions.
        if let Some(main) = &self.main {
            if main.is_connected() {
                main.stop();
            }
        }
        self.set_status(ConnectionStatus::Connecting);
        self.set_default_server(server.clone(), true);

        if let Some(conn) = self.pool.connected().get(&server).cloned() {
            self.promote(conn);
        } else {
            let conn = self.start_interface(&server);
            self.set_main(Some(conn));
        }
    }

    fn set_parameters(&mut self, parameters: Parameters) {
        let server = parameters.server();
        let Parameters {
            protocol,
            proxy,
            auto_connect,
            ..
        } = parameters;

        self.config.set_key("auto_cycle", json!(auto_connect), true);
        self.config.set_key("proxy", json!(proxy), true);
        self.config
            .set_key("protocol", json!(protocol.to_string()), true);
        self.config.set_key("server", json!(server.to_string()), true);
        self.auto_cycle = auto_connect;

        if self.proxy != proxy || self.protocol != protocol {
            info!(target: "client", "Restarting the pool on protocol {}", protocol);

            self.proxy = proxy;
            self.protocol = protocol;
            for conn in self.pool.handles() {
                conn.stop();
            }
            self.set_main(None);
            self.set_status(ConnectionStatus::Connecting);

            if auto_connect {
                // The event loop refills the pool with candidates of
                // the new protocol and promotes the first to connect.
                return;
            }
        }

        if auto_connect {
            if !self.main_is_connected() {
                self.promote_random();
            } else if self.server_is_lagging() {
                if let Some(main) = &self.main {
                    main.stop();
                }
            }
        } else {
            self.set_server(server);
        }
    }

    /// Make a connected interface the main one. The previous main must
    /// already be gone.
    fn promote(&mut self, conn: Conn) {
        assert!(
            !self.main_is_connected(),
            "the previous main interface is still connected"
        );
        let server = conn.server().clone();
        info!(target: "client", "Switching to {}", server);

        self.set_main(Some(conn.clone()));
        self.set_default_server(server, false);
        self.replay_subscriptions(&conn);
        self.set_status(ConnectionStatus::Connected);
    }

    fn promote_random(&mut self) {
        let candidates: Vec<Conn> = self
            .pool
            .connected()
            .values()
            .filter(|conn| conn.is_connected())
            .cloned()
            .collect();

        if candidates.is_empty() {
            return;
        }
        let ix = self.rng.usize(..candidates.len());
        self.promote(candidates[ix].clone());
    }

    /// Retransmit every registered subscription over an interface.
    fn replay_subscriptions(&self, conn: &Conn) {
        let entries: Vec<(Observer, Vec<Request>)> = {
            let registry = self.shared.registry.lock().unwrap();
            registry
                .subscriptions
                .iter()
                .map(|(observer, messages)| (observer.clone(), messages.to_vec()))
                .collect()
        };
        debug!(
            target: "client",
            "Sending {} subscription(s) to {}",
            entries.len(),
            conn.server()
        );
        for (observer, messages) in entries {
            conn.send(&messages, observer);
        }
    }

    /// Whether the main server has fallen behind the local tip by more
    /// than one block. A server that never reported a height is not
    /// considered lagging.
    fn server_is_lagging(&self) -> bool {
        match self.heights.get(&self.default_server) {
            Some(height) => self.chain.height().saturating_sub(*height) > 1,
            None => {
                debug!(target: "client", "No height for main interface {}", self.default_server);
                false
            }
        }
    }

    fn is_main(&self, conn: &Conn) -> bool {
        self.main
            .as_ref()
            .map_or(false, |main| Arc::ptr_eq(main, conn))
    }

    fn main_is_connected(&self) -> bool {
        self.main.as_ref().map_or(false, |main| main.is_connected())
    }

    fn set_main(&mut self, conn: Option<Conn>) {
        *self.shared.main.lock().unwrap() = conn.clone();
        self.main = conn;
    }

    fn set_default_server(&mut self, server: ServerId, save: bool) {
        self.config
            .set_key("server", json!(server.to_string()), save);
        *self.shared.default_server.lock().unwrap() = server.clone();
        self.default_server = server;
    }

    fn add_recent_server(&mut self, server: ServerId) {
        self.directory.push_recent(server);

        let recent: Vec<String> = self
            .directory
            .recent()
            .iter()
            .map(|server| server.to_string())
            .collect();
        self.config.set_key("recent_servers", json!(recent), true);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.shared.store_status(status);
        self.trigger(Topic::Status);
    }

    /// Invoke every callback registered for an event. The list is
    /// snapshotted under the coordinator lock and invoked outside it.
    fn trigger(&self, topic: Topic) {
        let callbacks = self.shared.registry.lock().unwrap().callbacks.snapshot(topic);
        for callback in callbacks {
            callback();
        }
    }

    #[cfg(test)]
    pub(crate) fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.process(event);
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.config
    }
}
