//! In-process driver used by the integration suites.
//!
//! Runs on its own thread with its own loopback endpoint, creates region
//! files under a temp dir on first attach to a stream, and answers attach,
//! detach and discovery. Tests can revoke leases or shut it down.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::TempDir;
use tensorpool_client::platform::monotonic_ns;
use tensorpool_client::{Channel, ControlTransport, LoopbackBus, LoopbackTransport, Region};
use tp::config::ClientConfig;
use tp::consts::{HEADER_SLOT_BYTES, LAYOUT_VERSION, MAX_DIMS};
use tp::control::{
    AttachRequest, AttachResponse, ControlMessage, DetachRequest, DetachResponse,
    DiscoveryEntry, DiscoveryRequest, DiscoveryResponse, DriverShutdown, LeaseRevoked,
    PoolDescriptor, ResponseCode, Role, WireMessage,
};
use tp::shm::superblock::Superblock;
use tp::shm::uri::ShmUri;

/// Geometry the mock grants.
#[derive(Clone)]
pub struct DriverSetup {
    pub nslots: u32,
    pub pools: Vec<(u16, u32)>,
    pub lease_ttl_ns: u64,
    /// Applied to every attach response before it is sent.
    pub tamper: Option<fn(&mut AttachResponse)>,
}

impl Default for DriverSetup {
    fn default() -> Self {
        Self {
            nslots: 8,
            pools: vec![(1, 1024), (2, 64 * 1024)],
            lease_ttl_ns: 2_000_000_000,
            tamper: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRecord {
    pub lease_id: u64,
    pub stream_id: u32,
    pub client_id: u32,
    pub role: Role,
}

struct StreamState {
    epoch: u64,
    producer_attaches: u32,
    header_uri: ShmUri,
    pools: Vec<PoolDescriptor>,
    _regions: Vec<Region>,
}

#[derive(Default)]
pub struct DriverState {
    pub leases: Vec<LeaseRecord>,
    pub keepalives: usize,
    pub detaches: usize,
    next_lease: u64,
    streams: HashMap<u32, StreamState>,
    granted: HashMap<u64, AttachResponse>,
}

enum Command {
    Revoke(u64),
    Shutdown,
}

pub struct MockDriver {
    bus: LoopbackBus,
    state: Arc<Mutex<DriverState>>,
    commands: Sender<Command>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    _dir: Arc<TempDir>,
}

impl MockDriver {
    pub fn start() -> Self {
        Self::with_setup(DriverSetup::default())
    }

    pub fn with_setup(setup: DriverSetup) -> Self {
        let bus = LoopbackBus::new();
        let endpoint = bus.connect();
        let dir = Arc::new(TempDir::new().expect("temp dir"));
        let state = Arc::new(Mutex::new(DriverState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (commands, rx) = channel();

        let worker = Worker {
            endpoint,
            setup,
            dir: Arc::clone(&dir),
            state: Arc::clone(&state),
            commands: rx,
        };
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::spawn(move || worker.run(&thread_stop));

        Self {
            bus,
            state,
            commands,
            stop,
            thread: Some(thread),
            _dir: dir,
        }
    }

    /// Fresh client endpoint.
    pub fn transport(&self) -> Arc<dyn ControlTransport> {
        Arc::new(self.bus.connect())
    }

    pub fn connect(&self) -> LoopbackTransport {
        self.bus.connect()
    }

    pub fn revoke(&self, lease_id: u64) {
        let _ = self.commands.send(Command::Revoke(lease_id));
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn leases(&self) -> Vec<LeaseRecord> {
        self.state.lock().leases.clone()
    }

    pub fn keepalives(&self) -> usize {
        self.state.lock().keepalives
    }

    pub fn detaches(&self) -> usize {
        self.state.lock().detaches
    }

    /// Wait until `cond` holds on the driver state.
    pub fn wait_for(&self, mut cond: impl FnMut(&DriverState) -> bool) -> bool {
        for _ in 0..2_000 {
            if cond(&self.state.lock()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }
}

impl Drop for MockDriver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Client config with test-sized timeouts.
pub fn client_config(client_id: u32) -> ClientConfig {
    ClientConfig {
        client_id,
        attach_timeout_ns: 2_000_000_000,
        attach_retry_interval_ns: 100_000_000,
        detach_timeout_ns: 1_000_000_000,
        lease_keepalive_interval_ns: 1_000_000,
        announce_interval_ns: 1_000_000,
        qos_interval_ns: 1_000_000,
        ..ClientConfig::default()
    }
}

struct Worker {
    endpoint: LoopbackTransport,
    setup: DriverSetup,
    dir: Arc<TempDir>,
    state: Arc<Mutex<DriverState>>,
    commands: Receiver<Command>,
}

impl Worker {
    fn run(self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            while let Ok(cmd) = self.commands.try_recv() {
                self.command(cmd);
            }

            let mut inbound = Vec::new();
            let _ = self.endpoint.poll(Channel::Control, 64, &mut |f| {
                if let Ok(Some(msg)) = ControlMessage::decode(f) {
                    inbound.push(msg);
                }
            });
            let _ = self.endpoint.poll(Channel::Discovery, 64, &mut |f| {
                if let Ok(Some(msg)) = ControlMessage::decode(f) {
                    inbound.push(msg);
                }
            });
            for channel in [Channel::Announce, Channel::Qos, Channel::Metadata] {
                let _ = self.endpoint.poll(channel, usize::MAX, &mut |_| {});
            }
            for msg in inbound {
                match msg {
                    ControlMessage::AttachRequest(req) => self.attach(&req),
                    ControlMessage::DetachRequest(req) => self.detach(&req),
                    ControlMessage::LeaseKeepalive(_) => self.state.lock().keepalives += 1,
                    ControlMessage::DiscoveryRequest(req) => self.discover(&req),
                    _ => {}
                }
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    fn command(&self, cmd: Command) {
        match cmd {
            Command::Revoke(lease_id) => {
                let record = {
                    let mut state = self.state.lock();
                    let pos = state.leases.iter().position(|l| l.lease_id == lease_id);
                    pos.map(|i| state.leases.remove(i))
                };
                if let Some(l) = record {
                    self.send(
                        Channel::Control,
                        &LeaseRevoked {
                            lease_id: l.lease_id,
                            stream_id: l.stream_id,
                            role: l.role,
                            reason: 1,
                            timestamp_ns: monotonic_ns(),
                        },
                    );
                }
            }
            Command::Shutdown => self.send(
                Channel::Control,
                &DriverShutdown {
                    timestamp_ns: monotonic_ns(),
                    reason: 0,
                },
            ),
        }
    }

    fn send<M: WireMessage>(&self, channel: Channel, msg: &M) {
        let _ = self.endpoint.offer(channel, &msg.to_fragment());
    }

    fn create_stream(&self, stream_id: u32, epoch: u64) -> StreamState {
        let nslots = self.setup.nslots;
        let header_uri = ShmUri::file(
            self.dir
                .path()
                .join(format!("tp_{stream_id}_{epoch}_header")),
        );
        let mut regions = vec![
            Region::create(
                &header_uri,
                Superblock::header_ring(LAYOUT_VERSION, epoch, stream_id, nslots, HEADER_SLOT_BYTES),
            )
            .expect("header ring"),
        ];
        let mut pools = Vec::new();
        for &(pool_id, stride) in &self.setup.pools {
            let uri = ShmUri::file(
                self.dir
                    .path()
                    .join(format!("tp_{stream_id}_{epoch}_pool{pool_id}")),
            );
            regions.push(
                Region::create(
                    &uri,
                    Superblock::payload_pool(LAYOUT_VERSION, epoch, stream_id, pool_id, nslots, stride),
                )
                .expect("payload pool"),
            );
            pools.push(PoolDescriptor {
                pool_id,
                nslots,
                stride_bytes: stride,
                region_uri: uri.to_string(),
            });
        }
        StreamState {
            epoch,
            producer_attaches: 0,
            header_uri,
            pools,
            _regions: regions,
        }
    }

    fn attach(&self, req: &AttachRequest) {
        if let Some(previous) = self.state.lock().granted.get(&req.correlation_id).cloned() {
            self.send(Channel::Control, &previous);
            return;
        }

        let mut response = {
            let mut state = self.state.lock();
            let producer_active = state
                .leases
                .iter()
                .any(|l| l.stream_id == req.stream_id && l.role == Role::Producer);
            if req.role == Role::Producer && producer_active {
                AttachResponse {
                    correlation_id: req.correlation_id,
                    code: ResponseCode::Rejected,
                    lease_id: u64::MAX,
                    lease_expiry_ns: u64::MAX,
                    stream_id: req.stream_id,
                    epoch: u64::MAX,
                    layout_version: u32::MAX,
                    header_nslots: u32::MAX,
                    header_slot_bytes: u16::MAX,
                    max_dims: u8::MAX,
                    header_region_uri: String::new(),
                    pools: Vec::new(),
                    error_message: "producer already attached".to_string(),
                }
            } else {
                let restart = req.role == Role::Producer
                    && state
                        .streams
                        .get(&req.stream_id)
                        .is_some_and(|s| s.producer_attaches > 0);
                if restart || !state.streams.contains_key(&req.stream_id) {
                    let epoch = state
                        .streams
                        .get(&req.stream_id)
                        .map_or(1, |s| s.epoch + 1);
                    let mut stream = self.create_stream(req.stream_id, epoch);
                    stream.producer_attaches = state
                        .streams
                        .get(&req.stream_id)
                        .map_or(0, |s| s.producer_attaches);
                    state.streams.insert(req.stream_id, stream);
                }

                state.next_lease += 1;
                let lease_id = state.next_lease;
                state.leases.push(LeaseRecord {
                    lease_id,
                    stream_id: req.stream_id,
                    client_id: req.client_id,
                    role: req.role,
                });
                let stream = state
                    .streams
                    .get_mut(&req.stream_id)
                    .expect("stream just created");
                if req.role == Role::Producer {
                    stream.producer_attaches += 1;
                }
                AttachResponse {
                    correlation_id: req.correlation_id,
                    code: ResponseCode::Ok,
                    lease_id,
                    lease_expiry_ns: monotonic_ns() + self.setup.lease_ttl_ns,
                    stream_id: req.stream_id,
                    epoch: stream.epoch,
                    layout_version: LAYOUT_VERSION,
                    header_nslots: self.setup.nslots,
                    header_slot_bytes: HEADER_SLOT_BYTES as u16,
                    max_dims: MAX_DIMS as u8,
                    header_region_uri: stream.header_uri.to_string(),
                    pools: stream.pools.clone(),
                    error_message: String::new(),
                }
            }
        };
        if let Some(tamper) = self.setup.tamper {
            tamper(&mut response);
        }
        self.state
            .lock()
            .granted
            .insert(req.correlation_id, response.clone());
        self.send(Channel::Control, &response);
    }

    fn detach(&self, req: &DetachRequest) {
        let code = {
            let mut state = self.state.lock();
            state.detaches += 1;
            match state.leases.iter().position(|l| l.lease_id == req.lease_id) {
                Some(i) => {
                    state.leases.remove(i);
                    ResponseCode::Ok
                }
                None => ResponseCode::NotFound,
            }
        };
        self.send(
            Channel::Control,
            &DetachResponse {
                correlation_id: req.correlation_id,
                code,
            },
        );
    }

    fn discover(&self, req: &DiscoveryRequest) {
        let entries = {
            let state = self.state.lock();
            let mut entries: Vec<DiscoveryEntry> = state
                .streams
                .iter()
                .filter(|(id, _)| req.stream_id == u32::MAX || **id == req.stream_id)
                .map(|(id, s)| DiscoveryEntry {
                    stream_id: *id,
                    producer_id: state
                        .leases
                        .iter()
                        .find(|l| l.stream_id == *id && l.role == Role::Producer)
                        .map_or(u32::MAX, |l| l.client_id),
                    epoch: s.epoch,
                    layout_version: LAYOUT_VERSION,
                    header_nslots: self.setup.nslots,
                    header_slot_bytes: HEADER_SLOT_BYTES as u16,
                    max_dims: MAX_DIMS as u8,
                    data_source_name: format!("stream{id}"),
                    header_region_uri: s.header_uri.to_string(),
                })
                .collect();
            entries.sort_by_key(|e| e.stream_id);
            entries
        };
        self.send(
            Channel::Discovery,
            &DiscoveryResponse {
                request_id: req.request_id,
                code: ResponseCode::Ok,
                entries,
            },
        );
    }
}
