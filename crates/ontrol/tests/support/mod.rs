//! In-process fake router for integration tests.
//!
//! Speaks the real wire protocol over loopback TCP: login, identity,
//! resource, NAT print/set, PPP active/secret. State is shared and mutable
//! so tests can flip rules, kill the listener, or slow replies down.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ontrol::Router;
use rosproto::word::{read_sentence, write_sentence};
use tokio::io::BufStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const FAKE_USER: &str = "ops";
pub const FAKE_SECRET: &str = "hunter2";

/// One reply row as the fake stores it.
pub type FakeRow = Vec<(String, String)>;

pub fn row(pairs: &[(&str, &str)]) -> FakeRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A standard remote-ONT rule row.
pub fn ont_rule(id: &str, to_ip: &str, to_port: &str) -> FakeRow {
    row(&[
        (".id", id),
        ("chain", "dstnat"),
        ("action", "dst-nat"),
        ("dst-address", "0.0.0.0/0"),
        ("dst-port", "7001"),
        ("to-addresses", to_ip),
        ("to-ports", to_port),
        ("protocol", "tcp"),
        ("comment", "REMOTE ONT PELANGGAN"),
        ("disabled", "false"),
        ("bytes", "1024"),
        ("packets", "16"),
    ])
}

pub fn active_session(name: &str, address: &str, service: &str) -> FakeRow {
    row(&[
        ("name", name),
        ("address", address),
        ("caller-id", "aa:bb:cc:dd:ee:ff"),
        ("uptime", "2h13m"),
        ("encoding", ""),
        ("service", service),
    ])
}

#[derive(Clone)]
pub struct FakeState {
    pub identity: String,
    pub username: String,
    pub password: String,
    pub nat_rules: Vec<FakeRow>,
    pub active: Vec<FakeRow>,
    pub secrets: Vec<FakeRow>,
    pub resources: FakeRow,
    pub refuse_login: bool,
    pub response_delay: Duration,
}

impl FakeState {
    pub fn named(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            username: FAKE_USER.to_string(),
            password: FAKE_SECRET.to_string(),
            nat_rules: vec![ont_rule("*7", "10.0.0.10", "8080")],
            active: Vec::new(),
            secrets: Vec::new(),
            resources: row(&[
                ("version", "7.14.2"),
                ("board-name", "CCR2004-1G-12S+2XS"),
                ("platform", "MikroTik"),
                ("architecture-name", "arm64"),
                ("cpu", "ARM64"),
                ("cpu-count", "4"),
                ("cpu-load", "7"),
                ("total-memory", "4294967296"),
                ("free-memory", "3221225472"),
                ("uptime", "2w3d"),
            ]),
            refuse_login: false,
            response_delay: Duration::ZERO,
        }
    }
}

pub struct FakeRouter {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    commands: Arc<Mutex<HashMap<String, usize>>>,
    connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
    handlers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeRouter {
    pub async fn start(state: FakeState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake router");
        Self::serve(listener, state)
    }

    /// Bind a specific address; used to revive a router on a known port.
    pub async fn start_on(addr: SocketAddr, state: FakeState) -> Self {
        let listener = TcpListener::bind(addr).await.expect("bind fake router on port");
        Self::serve(listener, state)
    }

    fn serve(listener: TcpListener, state: FakeState) -> Self {
        let addr = listener.local_addr().expect("fake router addr");
        let state = Arc::new(Mutex::new(state));
        let commands = Arc::new(Mutex::new(HashMap::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let handlers: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_state = state.clone();
        let accept_commands = commands.clone();
        let accept_connections = connections.clone();
        let accept_handlers = handlers.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                let commands = accept_commands.clone();
                let handle = tokio::spawn(handle_connection(stream, state, commands));
                accept_handlers.lock().expect("handlers lock").push(handle);
            }
        });

        Self {
            addr,
            state,
            commands,
            connections,
            accept_task,
            handlers,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// A directory record pointing at this fake.
    pub fn router(&self, name: &str) -> Router {
        Router {
            id: format!("id-{name}"),
            name: name.to_string(),
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            username: FAKE_USER.to_string(),
            secret: FAKE_SECRET.to_string(),
            tunnel_endpoint: "103.10.20.5:7001".to_string(),
            public_ont_url: "http://103.10.20.5:7001".to_string(),
            enabled: true,
        }
    }

    /// Stop listening and sever every established connection, as a crashed
    /// or rebooting router would.
    pub fn kill(&self) {
        self.accept_task.abort();
        for handle in self.handlers.lock().expect("handlers lock").drain(..) {
            handle.abort();
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// How many times `path` was served.
    pub fn command_count(&self, path: &str) -> usize {
        self.commands
            .lock()
            .expect("commands lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Mutate the shared state (flip rules, add sessions, slow down).
    pub fn update_state(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().expect("state lock"));
    }

    /// Current rewrite target of the first NAT rule, for write assertions.
    pub fn nat_target(&self) -> (String, String) {
        let state = self.state.lock().expect("state lock");
        let rule = state.nat_rules.first().expect("a nat rule");
        let get = |key: &str| {
            rule.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        (get("to-addresses"), get("to-ports"))
    }
}

impl Drop for FakeRouter {
    fn drop(&mut self) {
        self.kill();
    }
}

/// A router record pointing at a port nothing listens on.
pub async fn dead_router(name: &str) -> Router {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    Router {
        id: format!("id-{name}"),
        name: name.to_string(),
        host: addr.ip().to_string(),
        port: addr.port(),
        username: FAKE_USER.to_string(),
        secret: FAKE_SECRET.to_string(),
        tunnel_endpoint: String::new(),
        public_ont_url: String::new(),
        enabled: true,
    }
}

fn attr(words: &[String], key: &str) -> Option<String> {
    let prefix = format!("={key}=");
    words
        .iter()
        .find_map(|w| w.strip_prefix(&prefix).map(|v| v.to_string()))
}

fn query(words: &[String], key: &str) -> Option<String> {
    let prefix = format!("?{key}=");
    words
        .iter()
        .find_map(|w| w.strip_prefix(&prefix).map(|v| v.to_string()))
}

async fn send_rows(stream: &mut BufStream<TcpStream>, rows: &[FakeRow]) -> Result<(), ()> {
    for r in rows {
        let mut words = vec!["!re".to_string()];
        for (k, v) in r {
            words.push(format!("={k}={v}"));
        }
        write_sentence(stream, &words).await.map_err(|_| ())?;
    }
    write_sentence(stream, &["!done".to_string()])
        .await
        .map_err(|_| ())
}

async fn send_trap(stream: &mut BufStream<TcpStream>, message: &str) -> Result<(), ()> {
    write_sentence(
        stream,
        &["!trap".to_string(), format!("=message={message}")],
    )
    .await
    .map_err(|_| ())?;
    write_sentence(stream, &["!done".to_string()])
        .await
        .map_err(|_| ())
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<FakeState>>,
    commands: Arc<Mutex<HashMap<String, usize>>>,
) {
    let mut stream = BufStream::new(stream);
    let mut logged_in = false;

    loop {
        let Ok(sentence) = read_sentence(&mut stream).await else {
            return;
        };
        let Some(path) = sentence.first().cloned() else {
            continue;
        };

        let snapshot = state.lock().expect("state lock").clone();
        if !snapshot.response_delay.is_zero() {
            tokio::time::sleep(snapshot.response_delay).await;
        }
        *commands
            .lock()
            .expect("commands lock")
            .entry(path.clone())
            .or_insert(0) += 1;

        let ok = match path.as_str() {
            "/login" => {
                let user = attr(&sentence, "name").unwrap_or_default();
                let pass = attr(&sentence, "password").unwrap_or_default();
                if !snapshot.refuse_login
                    && user == snapshot.username
                    && pass == snapshot.password
                {
                    logged_in = true;
                    send_rows(&mut stream, &[]).await
                } else {
                    send_trap(&mut stream, "invalid user name or password (6)").await
                }
            }
            _ if !logged_in => send_trap(&mut stream, "not logged in").await,
            "/system/identity/print" => {
                let rows = vec![row(&[("name", snapshot.identity.as_str())])];
                send_rows(&mut stream, &rows).await
            }
            "/system/resource/print" => {
                send_rows(&mut stream, &[snapshot.resources.clone()]).await
            }
            "/ip/firewall/nat/print" => send_rows(&mut stream, &snapshot.nat_rules).await,
            "/ip/firewall/nat/set" => {
                let id = attr(&sentence, ".id").unwrap_or_default();
                let to_addresses = attr(&sentence, "to-addresses");
                let to_ports = attr(&sentence, "to-ports");
                let found = {
                    let mut guard = state.lock().expect("state lock");
                    let rule = guard.nat_rules.iter_mut().find(|r| {
                        r.iter().any(|(k, v)| k == ".id" && v == &id)
                    });
                    match rule {
                        Some(rule) => {
                            for (k, v) in rule.iter_mut() {
                                if k == "to-addresses" {
                                    if let Some(ip) = &to_addresses {
                                        *v = ip.clone();
                                    }
                                }
                                if k == "to-ports" {
                                    if let Some(port) = &to_ports {
                                        *v = port.clone();
                                    }
                                }
                            }
                            true
                        }
                        None => false,
                    }
                };
                if found {
                    send_rows(&mut stream, &[]).await
                } else {
                    send_trap(&mut stream, "no such item").await
                }
            }
            "/ppp/active/print" => {
                let rows: Vec<FakeRow> = match query(&sentence, "name") {
                    Some(name) => snapshot
                        .active
                        .iter()
                        .filter(|r| r.iter().any(|(k, v)| k == "name" && v == &name))
                        .cloned()
                        .collect(),
                    None => snapshot.active.clone(),
                };
                send_rows(&mut stream, &rows).await
            }
            "/ppp/secret/print" => send_rows(&mut stream, &snapshot.secrets).await,
            _ => send_trap(&mut stream, "no such command").await,
        };
        if ok.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Assembled control plane over fake routers
// ---------------------------------------------------------------------------

use ontconf::{BreakerConfig, CacheConfig, PoolConfig};
use ontrol::audit::MemoryAuditSink;
use ontrol::breaker::BreakerRegistry;
use ontrol::directory::{InMemoryRouterStore, RouterDirectory};
use ontrol::fleet::{FleetCaches, FleetEngine};
use ontrol::nat::NatMutator;
use ontrol::pool::ConnectionPool;

pub struct TestPlane {
    pub directory: Arc<RouterDirectory>,
    pub pool: ConnectionPool,
    pub breakers: Arc<BreakerRegistry>,
    pub caches: Arc<FleetCaches>,
    pub fleet: FleetEngine,
    pub nat: NatMutator,
    pub audit: Arc<MemoryAuditSink>,
}

pub async fn plane(routers: Vec<Router>) -> TestPlane {
    plane_with(routers, PoolConfig::default(), BreakerConfig::default()).await
}

pub async fn plane_with(
    routers: Vec<Router>,
    pool_config: PoolConfig,
    breaker_config: BreakerConfig,
) -> TestPlane {
    let store = Arc::new(InMemoryRouterStore::new(routers));
    let directory = Arc::new(
        RouterDirectory::load(store)
            .await
            .expect("load test directory"),
    );
    let pool = ConnectionPool::new(pool_config);
    let breakers = Arc::new(BreakerRegistry::new(breaker_config));
    let caches = Arc::new(FleetCaches::new(&CacheConfig::default()));
    let fleet = FleetEngine::new(
        directory.clone(),
        pool.clone(),
        breakers.clone(),
        caches.clone(),
    );
    let audit = Arc::new(MemoryAuditSink::default());
    let nat = NatMutator::new(
        directory.clone(),
        pool.clone(),
        breakers.clone(),
        caches.clone(),
        audit.clone(),
    );
    TestPlane {
        directory,
        pool,
        breakers,
        caches,
        fleet,
        nat,
        audit,
    }
}
