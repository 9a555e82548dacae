//! Binds UDP and/or TCP and wires cache → forwarder → response (spec
//! §4.4). The UDP read-loop and TCP accept-loop both poll with a short
//! deadline so `stop` is observed promptly, the same "never block longer
//! than about a second" discipline the teacher's `runtime::rt::exec`
//! loop uses for its poll timeout.

use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use shared::CancelToken;

use crate::cache::{Cache, CacheStats};
use crate::error::ServerError;
use crate::forwarder::{Forwarder, ForwarderConfig};
use crate::message::{Query, Response, ResponseCode, Transport};
use crate::wire;

const READ_DEADLINE: Duration = Duration::from_secs(1);
const MIN_BUFFER_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub struct Config {
	pub bind_addr: IpAddr,
	pub udp_port: u16,
	pub tcp_port: u16,
	pub enable_udp: bool,
	pub enable_tcp: bool,
	pub buffer_size: usize,

	pub cache_enabled: bool,
	pub cache_max_size: usize,
	pub min_ttl: u32,
	pub max_ttl: u32,
	pub cache_cleanup_interval: Duration,

	pub forwarder: ForwarderConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bind_addr: IpAddr::from([0, 0, 0, 0]),
			udp_port: 53,
			tcp_port: 53,
			enable_udp: true,
			enable_tcp: true,
			buffer_size: 4096,
			cache_enabled: true,
			cache_max_size: 10_000,
			min_ttl: 0,
			max_ttl: 86_400,
			cache_cleanup_interval: Duration::from_secs(60),
			forwarder: ForwarderConfig::default(),
		}
	}
}

impl Config {
	fn validate(&self) -> Result<(), ServerError> {
		if !self.enable_udp && !self.enable_tcp {
			return Err(ServerError::InvalidConfig("at least one of UDP or TCP must be enabled".into()));
		}

		if self.enable_udp && self.udp_port == 0 && self.enable_tcp && self.tcp_port == 0 {
			return Err(ServerError::InvalidConfig("no listening port configured".into()));
		}

		if self.buffer_size < MIN_BUFFER_SIZE {
			return Err(ServerError::InvalidConfig(format!("buffer_size must be >= {MIN_BUFFER_SIZE}")));
		}

		if self.cache_enabled && self.cache_max_size == 0 {
			return Err(ServerError::InvalidConfig("cache_max_size must be positive when caching is enabled".into()));
		}

		Ok(())
	}
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
	pub queries_received: u64,
	pub queries_answered: u64,
	pub errors: u64,
	pub udp_queries: u64,
	pub tcp_queries: u64,
	pub cache_hits: u64,
	pub cache_misses: u64,
	pub avg_latency_ms: f64,
}

struct Sockets {
	udp: Option<UdpSocket>,
	tcp: Option<TcpListener>,
}

pub struct Server {
	config: Config,
	cache: Option<Cache>,
	forwarder: Arc<Forwarder>,
	stats: Mutex<Stats>,
	running: AtomicBool,
	cancel: Mutex<CancelToken>,
	sockets: Mutex<Sockets>,
	threads: Mutex<Vec<JoinHandle<()>>>,
	conn_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
	pub fn new(config: Config) -> Result<Arc<Self>, ServerError> {
		config.validate()?;

		let cache = config.cache_enabled.then(|| Cache::new(config.cache_max_size, config.min_ttl, config.max_ttl));
		let forwarder = Arc::new(Forwarder::new(config.forwarder.clone()));

		Ok(Arc::new(Self {
			config,
			cache,
			forwarder,
			stats: Mutex::new(Stats::default()),
			running: AtomicBool::new(false),
			cancel: Mutex::new(CancelToken::new()),
			sockets: Mutex::new(Sockets { udp: None, tcp: None }),
			threads: Mutex::new(Vec::new()),
			conn_threads: Mutex::new(Vec::new()),
		}))
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	pub fn get_statistics(&self) -> Stats {
		self.stats.lock().unwrap().clone()
	}

	pub fn cache_stats(&self) -> Option<CacheStats> {
		self.cache.as_ref().map(Cache::stats)
	}

	pub fn forwarder(&self) -> &Arc<Forwarder> {
		&self.forwarder
	}

	fn update_stats(&self, f: impl FnOnce(&mut Stats)) {
		let mut stats = self.stats.lock().unwrap();
		f(&mut stats);
	}

	/// Binds the configured listeners and starts the read/accept loops
	/// plus the cache-sweep and health-check workers.
	pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
		if self.running.swap(true, Ordering::SeqCst) {
			return Err(ServerError::AlreadyRunning);
		}

		let cancel = CancelToken::new();
		*self.cancel.lock().unwrap() = cancel.clone();

		let mut sockets = self.sockets.lock().unwrap();
		let mut threads = Vec::new();

		if self.config.enable_udp {
			let addr = SocketAddr::new(self.config.bind_addr, self.config.udp_port);
			let socket = UdpSocket::bind(addr)?;
			socket.set_read_timeout(Some(READ_DEADLINE))?;

			let udp_clone = socket.try_clone()?;
			let this = self.clone();
			let cancel = cancel.clone();
			threads.push(thread::Builder::new().name("dns-udp".into()).spawn(move || this.run_udp(udp_clone, cancel)).unwrap());

			sockets.udp = Some(socket);
		}

		if self.config.enable_tcp {
			let addr = SocketAddr::new(self.config.bind_addr, self.config.tcp_port);
			let listener = TcpListener::bind(addr)?;
			listener.set_nonblocking(true)?;

			let listener_clone = listener.try_clone()?;
			let this = self.clone();
			let cancel = cancel.clone();
			threads.push(thread::Builder::new().name("dns-tcp".into()).spawn(move || this.run_tcp(listener_clone, cancel)).unwrap());

			sockets.tcp = Some(listener);
		}

		drop(sockets);
		*self.conn_threads.lock().unwrap() = Vec::new();

		if self.cache.is_some() {
			let this = self.clone();
			let interval = self.config.cache_cleanup_interval;
			threads.push(shared::spawn_periodic("dns-cache-sweep", interval, cancel.clone(), move || {
				if let Some(cache) = this.cache.as_ref() {
					cache.cleanup();
				}
			}));
		}

		if self.config.forwarder.health_checks_enabled {
			self.forwarder.start_health_checks();
		}

		*self.threads.lock().unwrap() = threads;
		Ok(())
	}

	pub fn local_udp_addr(&self) -> Option<SocketAddr> {
		self.sockets.lock().unwrap().udp.as_ref().and_then(|s| s.local_addr().ok())
	}

	pub fn local_tcp_addr(&self) -> Option<SocketAddr> {
		self.sockets.lock().unwrap().tcp.as_ref().and_then(|l| l.local_addr().ok())
	}

	fn run_udp(&self, socket: UdpSocket, cancel: CancelToken) {
		let mut buf = vec![0u8; self.config.buffer_size.max(MIN_BUFFER_SIZE)];

		while !cancel.is_cancelled() {
			match socket.recv_from(&mut buf) {
				Ok((n, client)) => {
					let response = self.handle_datagram(&buf[..n], client, Transport::Udp);

					if let Ok(bytes) = wire::serialize_response(&response) {
						let _ = socket.send_to(&bytes, client);
					}
				}
				Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
				Err(e) => log::warn!("UDP read error: {e}"),
			}
		}
	}

	fn run_tcp(self: &Arc<Self>, listener: TcpListener, cancel: CancelToken) {
		while !cancel.is_cancelled() {
			match listener.accept() {
				Ok((stream, addr)) => {
					let this = self.clone();
					let handle = thread::spawn(move || {
						let handler = TcpHandler { server: this.as_ref(), buffer_size: this.config.buffer_size };
						handler.serve(stream, addr);
					});

					let mut conn_threads = self.conn_threads.lock().unwrap();
					conn_threads.retain(|h| !h.is_finished());
					conn_threads.push(handle);
				}
				Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					cancel.wait(READ_DEADLINE);
				}
				Err(e) => log::warn!("TCP accept error: {e}"),
			}
		}
	}

	fn handle_datagram(&self, bytes: &[u8], client: SocketAddr, transport: Transport) -> Response {
		match wire::parse_query(bytes) {
			Ok(mut query) => {
				query.client = Some(client);
				query.transport = transport;
				self.handle_query(&query)
			}
			Err(err) => {
				log::debug!("Dropping malformed {transport:?} query from {client}: {err}");
				Response {
					id: 0,
					question: crate::message::Question::new(".", crate::message::RecordType::A, crate::message::Class::In),
					answers: Vec::new(),
					authorities: Vec::new(),
					additional: Vec::new(),
					rcode: ResponseCode::FormatError,
					cached: false,
					elapsed: Duration::ZERO,
				}
			}
		}
	}

	/// Cache → forward → synthesize, per spec §4.4.
	pub fn handle_query(&self, query: &Query) -> Response {
		let start = Instant::now();

		self.update_stats(|s| {
			s.queries_received += 1;
			match query.transport {
				Transport::Udp => s.udp_queries += 1,
				Transport::Tcp => s.tcp_queries += 1,
			}
		});

		if let Some(cache) = &self.cache {
			if let Some(mut cached) = cache.get(&query.question) {
				cached.id = query.id;
				cached.cached = true;
				cached.elapsed = start.elapsed();
				self.record_success(start);
				self.update_stats(|s| s.cache_hits += 1);
				return cached;
			}

			self.update_stats(|s| s.cache_misses += 1);
		}

		match self.forwarder.forward(query, None) {
			Ok(mut response) => {
				response.id = query.id;
				response.cached = false;
				response.elapsed = start.elapsed();

				if response.rcode.is_success() {
					if let Some(cache) = &self.cache {
						let ttl = response.min_answer_ttl().unwrap_or(0).clamp(self.config.min_ttl, self.config.max_ttl.max(self.config.min_ttl));

						if ttl > 0 {
							cache.set(&query.question, &response, ttl);
						}
					}
				}

				self.record_success(start);
				response
			}
			Err(err) => {
				log::warn!("Forwarding failed for query {}: {err}", query.question.name);
				self.update_stats(|s| s.errors += 1);
				Response::servfail(query.id, query.question.clone())
			}
		}
	}

	fn record_success(&self, start: Instant) {
		let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
		self.update_stats(|s| {
			s.queries_answered += 1;
			let n = s.queries_answered as f64;
			s.avg_latency_ms += (elapsed_ms - s.avg_latency_ms) / n;
		});
	}

	/// Cancels the background loops, closes the listeners, and waits for
	/// in-flight handlers. Idempotent only via the running flag: calling
	/// `stop` when not running reports an error instead of silently
	/// succeeding.
	pub fn stop(&self) -> Result<(), ServerError> {
		if !self.running.swap(false, Ordering::SeqCst) {
			return Err(ServerError::ServerNotStarted);
		}

		self.cancel.lock().unwrap().cancel();
		self.forwarder.stop();

		*self.sockets.lock().unwrap() = Sockets { udp: None, tcp: None };

		let threads = std::mem::take(&mut *self.threads.lock().unwrap());
		for t in threads {
			let _ = t.join();
		}

		let conn_threads = std::mem::take(&mut *self.conn_threads.lock().unwrap());
		for t in conn_threads {
			let _ = t.join();
		}

		Ok(())
	}
}

struct TcpHandler<'a> {
	server: &'a Server,
	buffer_size: usize,
}

impl<'a> TcpHandler<'a> {
	fn serve(&self, mut stream: TcpStream, addr: SocketAddr) {
		stream.set_read_timeout(Some(Duration::from_secs(10))).ok();

		let mut len_buf = [0u8; 2];
		if stream.read_exact(&mut len_buf).is_err() {
			return;
		}

		let len = u16::from_be_bytes(len_buf) as usize;
		if len > self.buffer_size {
			log::debug!("Rejecting oversized TCP DNS message ({len} bytes) from {addr}");
			return;
		}

		// Read exactly `len` bytes, looping over short reads rather than
		// trusting a single `read` call to fill the buffer.
		let mut message = vec![0u8; len];
		let mut filled = 0;
		while filled < len {
			match stream.read(&mut message[filled..]) {
				Ok(0) => return,
				Ok(n) => filled += n,
				Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
				Err(_) => return,
			}
		}

		let response = self.server.handle_datagram(&message, addr, Transport::Tcp);

		let Ok(bytes) = wire::serialize_response(&response) else { return };
		let Ok(out_len): Result<u16, _> = bytes.len().try_into() else { return };

		let mut framed = Vec::with_capacity(bytes.len() + 2);
		framed.extend_from_slice(&out_len.to_be_bytes());
		framed.extend_from_slice(&bytes);

		let _ = stream.write_all(&framed);
	}
}

#[cfg(test)]
mod tests {
	use std::net::UdpSocket as StdUdpSocket;
	use std::thread;

	use super::*;
	use crate::message::{Class, Question, RecordType};

	fn unreachable_upstream() -> SocketAddr {
		// Nothing is listening on this loopback port.
		"127.0.0.1:1".parse().unwrap()
	}

	#[test]
	fn cache_hit_never_contacts_upstream() {
		let config = Config {
			bind_addr: IpAddr::from([127, 0, 0, 1]),
			udp_port: 0,
			tcp_port: 0,
			enable_tcp: false,
			forwarder: ForwarderConfig { upstreams: vec![unreachable_upstream()], ..Default::default() },
			..Default::default()
		};

		let server = Server::new(config).unwrap();
		server.start().unwrap();

		let question = Question::new("example.com.", RecordType::A, Class::In);
		let seeded = Response {
			id: 0,
			question: question.clone(),
			answers: vec![crate::message::Record { name: question.name.clone(), rtype: RecordType::A, rclass: Class::In, ttl: 300, rdata: vec![192, 0, 2, 1] }],
			authorities: Vec::new(),
			additional: Vec::new(),
			rcode: ResponseCode::NoError,
			cached: false,
			elapsed: Duration::ZERO,
		};
		server.cache.as_ref().unwrap().set(&question, &seeded, 300);

		let client = StdUdpSocket::bind("127.0.0.1:0").unwrap();
		client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

		let query = Query { id: 0x1234, question, client: None, transport: Transport::Udp };
		let bytes = wire::serialize_query(&query).unwrap();
		client.send_to(&bytes, server.local_udp_addr().unwrap()).unwrap();

		let mut buf = [0u8; 4096];
		let (n, _) = client.recv_from(&mut buf).unwrap();
		let response = wire::parse_response(&buf[..n]).unwrap();

		assert_eq!(response.id, 0x1234);
		assert_eq!(response.answers[0].rdata, vec![192, 0, 2, 1]);
		assert_eq!(server.cache_stats().unwrap().hits, 1);

		server.stop().unwrap();
	}

	#[test]
	fn forwarding_then_second_query_hits_cache() {
		let upstream_socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
		let upstream_addr = upstream_socket.local_addr().unwrap();
		let hit_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

		{
			let hit_count = hit_count.clone();
			thread::spawn(move || {
				let mut buf = [0u8; 4096];
				loop {
					let Ok((n, from)) = upstream_socket.recv_from(&mut buf) else { return };
					hit_count.fetch_add(1, Ordering::SeqCst);
					let query = wire::parse_query(&buf[..n]).unwrap();

					let response = Response {
						id: query.id,
						question: query.question.clone(),
						answers: vec![crate::message::Record {
							name: query.question.name.clone(),
							rtype: RecordType::A,
							rclass: Class::In,
							ttl: 60,
							rdata: vec![10, 0, 0, 1],
						}],
						authorities: Vec::new(),
						additional: Vec::new(),
						rcode: ResponseCode::NoError,
						cached: false,
						elapsed: Duration::ZERO,
					};

					let bytes = wire::serialize_response(&response).unwrap();
					let _ = upstream_socket.send_to(&bytes, from);
				}
			});
		}

		let config = Config {
			bind_addr: IpAddr::from([127, 0, 0, 1]),
			udp_port: 0,
			tcp_port: 0,
			enable_tcp: false,
			forwarder: ForwarderConfig { upstreams: vec![upstream_addr], ..Default::default() },
			..Default::default()
		};

		let server = Server::new(config).unwrap();
		server.start().unwrap();

		let client = StdUdpSocket::bind("127.0.0.1:0").unwrap();
		client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
		let server_addr = server.local_udp_addr().unwrap();

		let question = Question::new("test.local.", RecordType::A, Class::In);

		for _ in 0..2 {
			let query = Query { id: 7, question: question.clone(), client: None, transport: Transport::Udp };
			let bytes = wire::serialize_query(&query).unwrap();
			client.send_to(&bytes, server_addr).unwrap();

			let mut buf = [0u8; 4096];
			let (n, _) = client.recv_from(&mut buf).unwrap();
			let response = wire::parse_response(&buf[..n]).unwrap();
			assert_eq!(response.answers[0].rdata, vec![10, 0, 0, 1]);
		}

		assert_eq!(hit_count.load(Ordering::SeqCst), 1);
		assert_eq!(server.cache_stats().unwrap().size, 1);

		let stats = server.get_statistics();
		assert_eq!(stats.cache_hits, 1);
		assert_eq!(stats.cache_misses, 1);

		server.stop().unwrap();
	}

	#[test]
	fn stop_before_start_reports_error() {
		let server = Server::new(Config { enable_tcp: false, udp_port: 0, bind_addr: IpAddr::from([127, 0, 0, 1]), ..Default::default() }).unwrap();
		assert!(matches!(server.stop(), Err(ServerError::ServerNotStarted)));
	}
}
