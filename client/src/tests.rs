//! Coordinator tests, driven synchronously through the ingress queue
//! with mock collaborators.
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel as chan;
use serde_json::{json, Value};

use tumbaga_common::config::{Memory, Store};
use tumbaga_common::network::Network;
use tumbaga_common::server::{Protocol, ServerId};
use tumbaga_common::Height;

use crate::chain::Blockchain;
use crate::client::{Client, HEADERS_SUBSCRIBE, PEERS_SUBSCRIBE, SERVER_BANNER, TARGET_POOL_SIZE};
use crate::error::Error;
use crate::event::{Command, ConnectionStatus, Event, Parameters};
use crate::interface::{request, Conn, Dialer, Interface, Observer, Request};
use crate::pool::Pool;
use crate::subscriptions::Topic;

/// An interface driven by the test instead of a socket.
struct MockInterface {
    server: ServerId,
    connected: AtomicBool,
    stopped: AtomicBool,
    sent: Mutex<Vec<(Vec<Request>, Observer)>>,
}

impl MockInterface {
    fn new(server: ServerId) -> Arc<Self> {
        Arc::new(Self {
            server,
            connected: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(messages, _)| messages.iter().map(|(method, _)| method.clone()))
            .collect()
    }
}

impl Interface for MockInterface {
    fn server(&self) -> &ServerId {
        &self.server
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_up_to_date(&self) -> bool {
        true
    }

    fn start(self: Arc<Self>, _events: chan::Sender<Event>) {}

    fn send(&self, messages: &[Request], observer: Observer) {
        self.sent.lock().unwrap().push((messages.to_vec(), observer));
    }

    fn synchronous_get(&self, _requests: &[Request]) -> Result<Vec<Value>, Error> {
        if self.is_connected() {
            Ok(vec![json!({ "result": null })])
        } else {
            Err(Error::NotConnected)
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

fn conn(iface: &Arc<MockInterface>) -> Conn {
    iface.clone()
}

/// The status event of a successful connect attempt.
fn online(iface: &Arc<MockInterface>) -> Event {
    iface.connected.store(true, Ordering::SeqCst);
    Event::Status(conn(iface))
}

/// The status event of a failed connect attempt or a shutdown.
fn offline(iface: &Arc<MockInterface>) -> Event {
    iface.connected.store(false, Ordering::SeqCst);
    Event::Status(conn(iface))
}

/// The observer attached to the most recent request for a method.
fn find_observer(iface: &Arc<MockInterface>, method: &str) -> Observer {
    iface
        .sent
        .lock()
        .unwrap()
        .iter()
        .rev()
        .find(|(messages, _)| messages.iter().any(|(m, _)| m == method))
        .map(|(_, observer)| observer.clone())
        .expect("no request was sent for the method")
}

/// A dialer that hands out mock interfaces and remembers them.
#[derive(Clone, Default)]
struct MockNet {
    dialed: Arc<Mutex<Vec<Arc<MockInterface>>>>,
}

impl MockNet {
    fn get(&self, server: &ServerId) -> Arc<MockInterface> {
        self.dialed
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|iface| iface.server == *server)
            .cloned()
            .expect("server was never dialed")
    }

    fn all(&self) -> Vec<Arc<MockInterface>> {
        self.dialed.lock().unwrap().clone()
    }
}

impl Dialer for MockNet {
    fn dial(&self, server: &ServerId, _proxy: Option<&str>) -> Conn {
        let iface = MockInterface::new(server.clone());
        self.dialed.lock().unwrap().push(iface.clone());

        iface
    }
}

/// A chain collaborator with a settable tip.
#[derive(Clone, Default)]
struct MockChain {
    height: Arc<AtomicU64>,
    submitted: Arc<Mutex<Vec<(ServerId, Value)>>>,
}

impl Blockchain for MockChain {
    fn start(&mut self) {}

    fn height(&self) -> Height {
        self.height.load(Ordering::SeqCst)
    }

    fn read_header(&self, _height: Height) -> Option<Value> {
        None
    }

    fn submit(&mut self, conn: Conn, header: Value) {
        self.submitted
            .lock()
            .unwrap()
            .push((conn.server().clone(), header));
    }
}

type TestClient = Client<Memory, MockNet, MockChain>;

fn harness(config: Memory) -> (TestClient, MockNet, MockChain) {
    let net = MockNet::default();
    let chain = MockChain::default();
    let client = Client::new(
        Network::Mainnet,
        config,
        net.clone(),
        chain.clone(),
        fastrand::Rng::with_seed(7),
    )
    .unwrap();

    (client, net, chain)
}

fn header(height: u64) -> Value {
    json!({ "result": { "block_height": height, "merkle_root": "ab", "utxo_root": "cd" } })
}

fn assert_disjoint(pool: &Pool) {
    for id in pool.pending().keys() {
        assert!(!pool.connected().contains_key(id));
        assert!(!pool.disconnected().contains(id));
    }
    for id in pool.connected().keys() {
        assert!(!pool.disconnected().contains(id));
    }
}

#[test]
fn test_bootstrap_with_empty_config() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();

    let default = handle.default_server();
    assert_eq!(default.protocol, Protocol::Ssl);
    assert!(Network::Mainnet.seeds().contains(&default.host.as_str()));
    assert_eq!(handle.status(), ConnectionStatus::Connecting);
    assert!(!handle.is_connected());

    client.start_interfaces();

    // The whole bootstrap table is being dialed: the intended main plus
    // random picks up to the pool target.
    assert_eq!(net.all().len(), TARGET_POOL_SIZE);
    assert_eq!(client.pool.pending().len(), TARGET_POOL_SIZE);
    assert_disjoint(&client.pool);

    let main = net.get(&default);
    client.process(online(&main));

    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert!(handle.is_connected());
    assert!(handle.is_up_to_date());
    assert_eq!(handle.default_server(), default);
    assert_disjoint(&client.pool);

    // Admission subscribes the connection to headers; promotion replays
    // the default banner and peer-list subscriptions.
    let methods = main.sent_methods();
    assert!(methods.contains(&HEADERS_SUBSCRIBE.to_string()));
    assert!(methods.contains(&SERVER_BANNER.to_string()));
    assert!(methods.contains(&PEERS_SUBSCRIBE.to_string()));
}

#[test]
fn test_single_server_mode() {
    let mut config = Memory::new();
    config.set_key("oneserver", json!(true), false);

    let (mut client, net, _) = harness(config);
    client.start_interfaces();

    assert_eq!(net.all().len(), 1);
    client.refill();
    assert_eq!(net.all().len(), 1);
}

#[test]
fn test_remembered_server_is_used() {
    let mut config = Memory::new();
    config.set_key("server", json!("zenu.goldriver.cc:50002:s"), false);

    let (client, _, _) = harness(config);
    assert_eq!(
        client.handle().default_server(),
        ServerId::new("zenu.goldriver.cc", 50002, Protocol::Ssl)
    );
}

#[test]
fn test_recent_servers_are_persisted() {
    let (mut client, net, _) = harness(Memory::new());
    let default = client.handle().default_server();

    client.start_interfaces();
    client.process(online(&net.get(&default)));

    assert_eq!(
        client.store().get("recent_servers"),
        Some(json!([default.to_string()]))
    );
}

#[test]
fn test_lag_induced_cycle() {
    let (mut client, net, chain) = harness(Memory::new());
    let handle = client.handle();
    let default = handle.default_server();

    client.start_interfaces();
    let main = net.get(&default);
    client.process(online(&main));

    let peer = net
        .all()
        .into_iter()
        .find(|iface| iface.server != default)
        .unwrap();
    client.process(online(&peer));

    chain.height.store(105, Ordering::SeqCst);
    client.process(Event::Header(conn(&peer), header(105)));

    // One block behind is tolerated.
    client.process(Event::Header(conn(&main), header(104)));
    assert!(!main.is_stopped());
    assert_eq!(handle.default_server(), default);

    // More than one block behind stops the main within the iteration,
    // and the fresh peer takes over.
    client.process(Event::Header(conn(&main), header(100)));
    assert!(main.is_stopped());
    assert_eq!(handle.default_server(), peer.server);
    assert!(handle.is_connected());

    // The final status event of the stopped main retires it.
    client.process(offline(&main));
    assert!(client.pool.disconnected().contains(&default));
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert_disjoint(&client.pool);
}

#[test]
fn test_main_disconnect_promotes_peer() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let default = handle.default_server();

    client.start_interfaces();
    let main = net.get(&default);
    client.process(online(&main));

    let peer = net
        .all()
        .into_iter()
        .find(|iface| iface.server != default)
        .unwrap();
    client.process(online(&peer));

    main.stop();
    client.process(offline(&main));

    assert_eq!(handle.default_server(), peer.server);
    assert!(handle.is_connected());
    assert_eq!(handle.status(), ConnectionStatus::Connected);
}

#[test]
fn test_protocol_change_restarts_pool() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let default = handle.default_server();

    client.start_interfaces();
    client.process(online(&net.get(&default)));
    let before = net.all();

    client.process(Event::Command(Command::SetParameters(Parameters {
        host: "quimbaya.copperworks.io".to_owned(),
        port: 50001,
        protocol: Protocol::Tcp,
        proxy: None,
        auto_connect: true,
    })));

    for iface in &before {
        assert!(iface.is_stopped());
    }
    assert!(!handle.is_connected());
    assert_eq!(handle.status(), ConnectionStatus::Connecting);

    // Drain the old pool and let the loop refill with candidates of
    // the new protocol.
    for iface in &before {
        client.process(offline(iface));
    }
    for _ in 0..TARGET_POOL_SIZE {
        client.refill();
    }
    let fresh: Vec<_> = net
        .all()
        .into_iter()
        .filter(|iface| iface.server.protocol == Protocol::Tcp)
        .collect();
    assert!(!fresh.is_empty());
    assert_disjoint(&client.pool);

    // The first interface of the new protocol to connect becomes main.
    let first = fresh[0].clone();
    client.process(online(&first));

    assert!(handle.is_connected());
    assert_eq!(handle.default_server(), first.server);
    assert_eq!(handle.default_server().protocol, Protocol::Tcp);
}

#[test]
fn test_all_servers_down() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();

    client.start_interfaces();
    for iface in net.all() {
        client.process(offline(&iface));
    }

    assert!(client.pool.connected().is_empty());
    assert!(client.pool.pending().is_empty());
    assert_eq!(
        client.pool.disconnected().len(),
        Network::Mainnet.seeds().len()
    );
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);

    // With every candidate burned and nothing connected, the next tick
    // forgets past failures...
    client.refill();
    assert!(client.pool.disconnected().is_empty());

    // ...and the one after that starts dialing again.
    client.refill();
    assert_eq!(client.pool.pending().len(), 1);
}

#[test]
fn test_peer_discovery_overrides_bootstrap() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let announced = Arc::new(AtomicUsize::new(0));

    let announced_ = announced.clone();
    handle.register_callback(Topic::Servers, move || {
        announced_.fetch_add(1, Ordering::SeqCst);
    });

    client.start_interfaces();
    let main = net.get(&handle.default_server());
    client.process(online(&main));

    client.process(Event::Peers(
        conn(&main),
        json!({ "result": [
            ["", "h1.example.com", ["v1.0", "s"]],
            ["", "h2.example.com", ["v1.2", "s", "t50001"]],
            ["", "old.example.com", ["v0.1", "s"]],
        ]}),
    ));
    assert_eq!(announced.load(Ordering::SeqCst), 1);

    let (reply, receiver) = chan::bounded(1);
    client.process(Event::Command(Command::GetServers(reply)));
    let servers = receiver.recv().unwrap();

    assert_eq!(servers.len(), 2);
    assert!(servers.contains_key("h1.example.com"));
    assert!(servers.contains_key("h2.example.com"));
}

#[test]
fn test_banner_update() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let banners = Arc::new(AtomicUsize::new(0));

    let banners_ = banners.clone();
    handle.register_callback(Topic::Banner, move || {
        banners_.fetch_add(1, Ordering::SeqCst);
    });

    client.start_interfaces();
    let main = net.get(&handle.default_server());
    client.process(online(&main));
    assert_eq!(handle.banner(), "");

    client.process(Event::Banner(conn(&main), json!({ "result": "hello" })));

    assert_eq!(handle.banner(), "hello");
    assert_eq!(banners.load(Ordering::SeqCst), 1);
}

#[test]
fn test_headers_are_forwarded_to_chain() {
    let (mut client, net, chain) = harness(Memory::new());
    let handle = client.handle();
    let updated = Arc::new(AtomicUsize::new(0));

    let updated_ = updated.clone();
    handle.register_callback(Topic::Updated, move || {
        updated_.fetch_add(1, Ordering::SeqCst);
    });

    client.start_interfaces();
    let main = net.get(&handle.default_server());
    client.process(online(&main));

    // The reply arrives through the observer attached at admission and
    // rides the ingress queue back into the loop.
    let observer = find_observer(&main, HEADERS_SUBSCRIBE);
    observer.notify(&conn(&main), &header(7));
    client.drain();

    {
        let submitted = chain.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, main.server);
        assert_eq!(submitted[0].1["block_height"], json!(7));
    }
    assert_eq!(updated.load(Ordering::SeqCst), 1);

    let (reply, receiver) = chan::bounded(1);
    client.process(Event::Command(Command::GetServerTip(reply)));
    let tip = receiver.recv().unwrap().unwrap();
    assert_eq!(tip.height, 7);
    assert_eq!(tip.merkle_root.as_deref(), Some("ab"));
    assert_eq!(tip.utxo_root.as_deref(), Some("cd"));

    // Losing the connection clears the tables.
    main.stop();
    client.process(offline(&main));

    let (reply, receiver) = chan::bounded(1);
    client.process(Event::Command(Command::GetServerTip(reply)));
    assert_eq!(receiver.recv().unwrap(), None);
}

#[test]
fn test_set_server_switches_to_pool_member() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let default = handle.default_server();

    client.start_interfaces();
    let main = net.get(&default);
    client.process(online(&main));

    let peer = net
        .all()
        .into_iter()
        .find(|iface| iface.server != default)
        .unwrap();
    client.process(online(&peer));

    client.process(Event::Command(Command::SetServer(peer.server.clone())));

    assert!(main.is_stopped());
    assert_eq!(handle.default_server(), peer.server);
    assert!(handle.is_connected());
    assert_eq!(handle.status(), ConnectionStatus::Connected);

    // Selecting the connected main again is a no-op.
    client.process(Event::Command(Command::SetServer(peer.server.clone())));
    assert!(!peer.is_stopped());
}

#[test]
fn test_set_server_rejects_other_protocol() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let default = handle.default_server();

    client.start_interfaces();
    let main = net.get(&default);
    client.process(online(&main));

    let other = ServerId::new("quimbaya.copperworks.io", 50001, Protocol::Tcp);
    client.process(Event::Command(Command::SetServer(other)));

    assert!(!main.is_stopped());
    assert_eq!(handle.default_server(), default);
}

#[test]
fn test_set_server_dials_unknown_server() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let default = handle.default_server();

    client.start_interfaces();
    let main = net.get(&default);
    client.process(online(&main));

    let target = ServerId::new("fresh.example.com", 50002, Protocol::Ssl);
    client.process(Event::Command(Command::SetServer(target.clone())));

    assert_eq!(handle.default_server(), target);

    let dialed = net.get(&target);
    client.process(online(&dialed));

    assert!(handle.is_connected());
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert_eq!(handle.default_server(), target);
}

#[test]
fn test_send_and_synchronous_get_without_main() {
    let (client, _, _) = harness(Memory::new());
    let handle = client.handle();

    assert!(!handle.send(
        vec![request("server.version", vec![])],
        Observer::new(|_, _| {})
    ));
    assert!(matches!(
        handle.synchronous_get(&[]),
        Err(Error::NotConnected)
    ));
}

#[test]
fn test_send_over_main() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();

    client.start_interfaces();
    let main = net.get(&handle.default_server());
    client.process(online(&main));

    assert!(handle.send(
        vec![request("server.version", vec![])],
        Observer::new(|_, _| {})
    ));
    assert!(main
        .sent_methods()
        .contains(&"server.version".to_string()));
    assert!(handle.synchronous_get(&[]).is_ok());
}

#[test]
fn test_subscriptions_replayed_before_status_callback() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let replayed_first = Arc::new(AtomicBool::new(false));

    handle.subscribe(
        vec![request("blockchain.address.subscribe", vec![json!("addr")])],
        Observer::new(|_, _| {}),
    );

    client.start_interfaces();
    let main = net.get(&handle.default_server());

    let main_ = main.clone();
    let handle_ = handle.clone();
    let replayed_first_ = replayed_first.clone();
    handle.register_callback(Topic::Status, move || {
        if handle_.status() == ConnectionStatus::Connected {
            let replayed = main_
                .sent_methods()
                .contains(&"blockchain.address.subscribe".to_string());
            replayed_first_.store(replayed, Ordering::SeqCst);
        }
    });

    client.process(online(&main));
    assert!(replayed_first.load(Ordering::SeqCst));
}

#[test]
fn test_subscribe_forwards_once_connected() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();

    client.start_interfaces();
    let main = net.get(&handle.default_server());

    // Nothing is connected yet; the subscription just waits.
    handle.subscribe(
        vec![request("blockchain.numblocks.subscribe", vec![])],
        Observer::new(|_, _| {}),
    );
    assert!(main.sent_methods().is_empty());

    client.process(online(&main));
    assert!(main
        .sent_methods()
        .contains(&"blockchain.numblocks.subscribe".to_string()));

    // While connected, new subscriptions go out immediately.
    handle.subscribe(
        vec![request("blockchain.address.subscribe", vec![json!("a")])],
        Observer::new(|_, _| {}),
    );
    assert!(main
        .sent_methods()
        .contains(&"blockchain.address.subscribe".to_string()));
}

#[test]
fn test_get_interfaces_and_parameters() {
    let (mut client, net, _) = harness(Memory::new());
    let handle = client.handle();
    let default = handle.default_server();

    client.start_interfaces();
    let main = net.get(&default);
    client.process(online(&main));

    let (reply, receiver) = chan::bounded(1);
    client.process(Event::Command(Command::GetInterfaces(reply)));
    assert_eq!(receiver.recv().unwrap(), vec![default.clone()]);

    let (reply, receiver) = chan::bounded(1);
    client.process(Event::Command(Command::GetParameters(reply)));
    let parameters = receiver.recv().unwrap();

    assert_eq!(parameters.host, default.host);
    assert_eq!(parameters.port, default.port);
    assert_eq!(parameters.protocol, Protocol::Ssl);
    assert!(parameters.auto_connect);
    assert_eq!(parameters.server(), default);
}
