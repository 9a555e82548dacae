//! Fans a query out to one of N configured upstream resolvers (spec
//! §4.3). Selection policy and the round-robin counter/health map share
//! one lock, the same shape as the teacher's UDP port table in
//! `net/src/udp/mod.rs::Interface` (one small struct behind a single
//! lock, rather than per-field atomics).

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::Rng;
use shared::CancelToken;

use crate::error::ForwardError;
use crate::message::{Class, Query, Question, RecordType, Transport};
use crate::wire;

const RECV_BUF_SIZE: usize = 4096;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// How an upstream is picked out of the healthy set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
	/// Atomic counter mod the healthy set length. Also used for
	/// `"fastest"` until per-upstream timing is actually measured (spec
	/// §4.3).
	RoundRobin,
	RandomChoice,
}

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
	pub upstreams: Vec<SocketAddr>,
	pub policy: SelectionPolicy,
	pub timeout: Duration,
	pub retries: usize,
	pub health_checks_enabled: bool,
	pub health_interval: Duration,
}

impl Default for ForwarderConfig {
	fn default() -> Self {
		Self {
			upstreams: Vec::new(),
			policy: SelectionPolicy::RoundRobin,
			timeout: Duration::from_secs(5),
			retries: 1,
			health_checks_enabled: false,
			health_interval: Duration::from_secs(30),
		}
	}
}

struct State {
	counter: AtomicUsize,
	health: Mutex<HashMap<SocketAddr, bool>>,
}

pub struct Forwarder {
	upstreams: Vec<SocketAddr>,
	policy: SelectionPolicy,
	timeout: Duration,
	retries: usize,
	health_interval: Duration,
	state: State,
	cancel: CancelToken,
	health_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Forwarder {
	pub fn new(config: ForwarderConfig) -> Self {
		let health = config.upstreams.iter().map(|addr| (*addr, true)).collect();

		Self {
			upstreams: config.upstreams,
			policy: config.policy,
			timeout: config.timeout,
			retries: config.retries,
			health_interval: config.health_interval,
			state: State { counter: AtomicUsize::new(0), health: Mutex::new(health) },
			cancel: CancelToken::new(),
			health_thread: Mutex::new(None),
		}
	}

	/// Spawns the background health checker if the caller's config asked
	/// for it. Health checks never block `forward`: they only update the
	/// shared health map from a separate thread.
	pub fn start_health_checks(self: &Arc<Self>) {
		if self.upstreams.is_empty() {
			return;
		}

		let this = self.clone();
		let interval = self.health_interval;
		let handle = shared::spawn_periodic("dns-health-checker", interval, self.cancel.clone(), move || this.run_health_checks());
		*self.health_thread.lock().unwrap() = Some(handle);
	}

	/// Cancels the health checker and waits for it to exit so it can't
	/// keep touching the health map after this call returns.
	pub fn stop(&self) {
		self.cancel.cancel();

		if let Some(handle) = self.health_thread.lock().unwrap().take() {
			let _ = handle.join();
		}
	}

	pub fn health(&self) -> HashMap<SocketAddr, bool> {
		self.state.health.lock().unwrap().clone()
	}

	fn run_health_checks(&self) {
		for upstream in &self.upstreams {
			let healthy = self.probe(*upstream).is_ok();
			self.state.health.lock().unwrap().insert(*upstream, healthy);
			if !healthy {
				log::warn!("Upstream {upstream} failed health check");
			}
		}
	}

	fn probe(&self, upstream: SocketAddr) -> Result<(), ForwardError> {
		let id: u16 = rand::thread_rng().gen();
		let query = Query {
			id,
			question: Question::new(".", RecordType::Ns, Class::In),
			client: None,
			transport: Transport::Udp,
		};

		self.send_once(upstream, &query, HEALTH_CHECK_TIMEOUT).map(|_| ())
	}

	fn healthy_set(&self) -> Vec<SocketAddr> {
		if self.upstreams.is_empty() {
			return Vec::new();
		}

		let health = self.state.health.lock().unwrap();
		let healthy: Vec<SocketAddr> = self.upstreams.iter().copied().filter(|addr| health.get(addr).copied().unwrap_or(true)).collect();

		// Failsafe: never refuse to forward purely because health checks
		// have pessimistic state for every upstream.
		if healthy.is_empty() { self.upstreams.clone() } else { healthy }
	}

	fn pick(&self, healthy: &[SocketAddr]) -> SocketAddr {
		match self.policy {
			SelectionPolicy::RoundRobin => {
				let idx = self.state.counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
				healthy[idx]
			}
			SelectionPolicy::RandomChoice => {
				let idx = rand::thread_rng().gen_range(0..healthy.len());
				healthy[idx]
			}
		}
	}

	/// Sends `query` to `upstream` and waits for its reply. The socket is
	/// bound but not `connect()`-ed, so any host reaching this ephemeral
	/// port could otherwise spoof a forged answer ahead of the real
	/// upstream: every datagram is checked against both the upstream's
	/// address and the query id before being accepted, with the
	/// remainder of `timeout` still enforced across retries.
	fn send_once(&self, upstream: SocketAddr, query: &Query, timeout: Duration) -> Result<crate::message::Response, ForwardError> {
		let bind_addr: SocketAddr = if upstream.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };

		let socket = UdpSocket::bind(bind_addr)?;
		socket.set_write_timeout(Some(timeout))?;

		let bytes = wire::serialize_query(query)?;
		socket.send_to(&bytes, upstream)?;

		let deadline = Instant::now() + timeout;
		let mut buf = [0u8; RECV_BUF_SIZE];

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(ForwardError::QueryTimeout);
			}
			socket.set_read_timeout(Some(remaining))?;

			let (n, from) = match socket.recv_from(&mut buf) {
				Ok(v) => v,
				Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
					return Err(ForwardError::QueryTimeout);
				}
				Err(e) => return Err(ForwardError::Io(e)),
			};

			if from != upstream {
				log::debug!("Ignoring UDP reply from unexpected source {from}, awaiting {upstream}");
				continue;
			}

			match wire::parse_response(&buf[..n]) {
				Ok(response) if response.id == query.id => return Ok(response),
				Ok(response) => {
					log::debug!("Ignoring reply from {upstream} with mismatched id {} (expected {})", response.id, query.id);
				}
				Err(err) => return Err(ForwardError::Parse(err)),
			}
		}
	}

	/// Sends `query` to one of the configured upstreams, retrying across
	/// the healthy set up to `retries + 1` times total.
	pub fn forward(&self, query: &Query, deadline: Option<Duration>) -> Result<crate::message::Response, ForwardError> {
		let timeout = deadline.unwrap_or(self.timeout);
		let healthy = self.healthy_set();

		if healthy.is_empty() {
			return Err(ForwardError::NoUpstreamServers);
		}

		let mut last_err = None;
		let attempts = self.retries + 1;
		let start = Instant::now();

		for _ in 0..attempts {
			let upstream = self.pick(&healthy);

			match self.send_once(upstream, query, timeout) {
				Ok(mut response) => {
					response.elapsed = start.elapsed();
					return Ok(response);
				}
				Err(err) => {
					log::warn!("Forward to {upstream} failed: {err}");
					last_err = Some(err);
				}
			}
		}

		Err(last_err.unwrap_or(ForwardError::NoUpstreamServers))
	}
}
