//! Wires Store, LeaseManager, Security and PacketHandler together and
//! runs the packet loop plus the periodic expiry/statistics workers
//! (spec §4.7).

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use shared::{CancelToken, Clock, SystemClock};

use crate::error::{RequestError, ServerError};
use crate::handler::{HandlerConfig, PacketHandler};
use crate::lease_manager::LeaseManager;
use crate::model::{Lease, Mac, PoolConfig, RecentEvent, Reservation, Statistics};
use crate::net::{self, Networking};
use crate::packet;
use crate::security::Security;
use crate::store::Store;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const STATS_INTERVAL: Duration = Duration::from_secs(60);
const RECENT_ACTIVITY_CAPACITY: usize = 50;

pub struct Config {
	pub bind_addr: Ipv4Addr,
	pub port: u16,
	pub server_ip: Ipv4Addr,
	pub pool: PoolConfig,
	pub custom_options: std::collections::HashMap<u8, Vec<u8>>,
	pub cleanup_interval: Duration,
	pub stats_interval: Duration,
}

impl Config {
	/// Builds a `Config` with the default worker cadence (cleanup every
	/// 5 minutes, statistics snapshotted every minute); callers that need
	/// a different cadence can still construct the struct literal
	/// directly.
	pub fn new(bind_addr: Ipv4Addr, server_ip: Ipv4Addr, pool: PoolConfig) -> Self {
		Self {
			bind_addr,
			port: net::SERVER_PORT,
			server_ip,
			pool,
			custom_options: std::collections::HashMap::new(),
			cleanup_interval: CLEANUP_INTERVAL,
			stats_interval: STATS_INTERVAL,
		}
	}

	fn validate(&self) -> Result<(), ServerError> {
		if self.port == 0 {
			return Err(ServerError::InvalidConfig("port must be nonzero".into()));
		}

		let (lo, hi) = self.pool.bounds();
		if lo > hi {
			return Err(ServerError::InvalidConfig("pool start_ip must be <= end_ip".into()));
		}

		Ok(())
	}
}

pub struct Server {
	config: Config,
	store: Arc<dyn Store>,
	leases: LeaseManager,
	security: Security,
	clock: Arc<dyn Clock>,
	start_time: Mutex<Option<Instant>>,
	running: AtomicBool,
	cancel: Mutex<CancelToken>,
	networking: Mutex<Option<Networking>>,
	threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
	pub fn new(config: Config, store: Arc<dyn Store>, security: Security) -> Result<Arc<Self>, ServerError> {
		config.validate()?;

		let clock: Arc<dyn Clock> = Arc::new(SystemClock);
		let leases = LeaseManager::new(store.clone(), config.pool.clone(), clock.clone());

		Ok(Arc::new(Self {
			config,
			store,
			leases,
			security,
			clock,
			start_time: Mutex::new(None),
			running: AtomicBool::new(false),
			cancel: Mutex::new(CancelToken::new()),
			networking: Mutex::new(None),
			threads: Mutex::new(Vec::new()),
		}))
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
		if self.running.swap(true, Ordering::SeqCst) {
			return Err(ServerError::AlreadyRunning);
		}

		self.store.initialize();
		*self.start_time.lock().unwrap() = Some(Instant::now());

		let cancel = CancelToken::new();
		*self.cancel.lock().unwrap() = cancel.clone();

		let networking = Networking::bind(self.config.bind_addr, self.config.port)?;
		let packet_socket = networking.try_clone()?;
		*self.networking.lock().unwrap() = Some(networking);

		let mut threads = Vec::new();

		let this = self.clone();
		let cancel_packets = cancel.clone();
		threads.push(std::thread::Builder::new().name("dhcp-packets".into()).spawn(move || this.run_packet_loop(packet_socket, cancel_packets)).unwrap());

		let this = self.clone();
		threads.push(shared::spawn_periodic("dhcp-cleanup", self.config.cleanup_interval, cancel.clone(), move || {
			this.leases.cleanup_expired_leases();
		}));

		let this = self.clone();
		threads.push(shared::spawn_periodic("dhcp-stats", self.config.stats_interval, cancel.clone(), move || {
			this.persist_statistics();
		}));

		*self.threads.lock().unwrap() = threads;
		Ok(())
	}

	pub fn stop(&self) -> Result<(), ServerError> {
		if !self.running.swap(false, Ordering::SeqCst) {
			return Err(ServerError::NotRunning);
		}

		self.cancel.lock().unwrap().cancel();
		*self.networking.lock().unwrap() = None;

		let threads = std::mem::take(&mut *self.threads.lock().unwrap());
		for t in threads {
			let _ = t.join();
		}

		self.store.close();
		Ok(())
	}

	fn run_packet_loop(&self, networking: Networking, cancel: CancelToken) {
		let mut buf = [0u8; 1500];
		networking.socket().set_read_timeout(Some(Duration::from_secs(1))).ok();

		while !cancel.is_cancelled() {
			match networking.socket().recv_from(&mut buf) {
				Ok((n, _from)) => match packet::parse_request(&buf[..n]) {
					Ok(request) => match self.handle_dhcp_request(&request) {
						Ok(Some(response)) => {
							let dest = net::response_destination(&request, response.your_ip);
							let bytes = packet::build_response(&response);
							let _ = networking.socket().send_to(&bytes, dest);
						}
						Ok(None) => {}
						Err(err) => log::debug!("DHCP request from {} not handled: {err}", request.client_mac),
					},
					Err(err) => log::debug!("Dropping malformed DHCP packet: {err}"),
				},
				Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
				Err(e) => log::warn!("DHCP read error: {e}"),
			}
		}
	}

	fn build_response(&self, request: &crate::model::Request) -> Result<Option<crate::model::Response>, RequestError> {
		let handler = PacketHandler::new(
			&self.leases,
			&self.config.pool,
			HandlerConfig { server_ip: self.config.server_ip, custom_options: self.config.custom_options.clone() },
		);
		handler.handle(request)
	}

	/// Increments total-requests and the per-type/per-hour buckets,
	/// consults security, then dispatches (spec §4.7). `Ok(None)` means
	/// the message type produces no reply (DECLINE, RELEASE).
	pub fn handle_dhcp_request(&self, request: &crate::model::Request) -> Result<Option<crate::model::Response>, RequestError> {
		self.record_request(request);

		if !self.security.is_client_allowed(request.client_mac) {
			return Err(RequestError::ClientNotAllowed);
		}

		self.build_response(request)
	}

	fn record_request(&self, request: &crate::model::Request) {
		let now = self.clock.now();
		let mut stats = self.store.load_statistics();
		stats.total_requests += 1;
		*stats.by_message_type.entry(request.message_type.as_u8()).or_insert(0) += 1;
		*stats.by_hour.entry(hour_key(now)).or_insert(0) += 1;

		stats.recent_activity.push_back(RecentEvent { timestamp: now, mac: request.client_mac, message_type: request.message_type });
		while stats.recent_activity.len() > RECENT_ACTIVITY_CAPACITY {
			stats.recent_activity.pop_front();
		}

		self.store.save_statistics(stats);
	}

	fn persist_statistics(&self) {
		let mut stats = self.store.load_statistics();
		stats.active_leases = self.leases.active_lease_count();
		stats.uptime = self.start_time.lock().unwrap().map(|t| t.elapsed()).unwrap_or_default();
		self.store.save_statistics(stats);
	}

	pub fn get_statistics(&self) -> Statistics {
		let mut stats = self.store.load_statistics();
		stats.active_leases = self.leases.active_lease_count();
		stats.uptime = self.start_time.lock().unwrap().map(|t| t.elapsed()).unwrap_or_default();
		stats
	}

	pub fn get_leases(&self) -> Vec<Lease> {
		self.leases.get_leases()
	}

	pub fn get_lease_by_ip(&self, ip: Ipv4Addr) -> Option<Lease> {
		self.leases.get_lease_by_ip(ip)
	}

	pub fn get_lease_by_mac(&self, mac: Mac) -> Option<Lease> {
		self.leases.get_lease_by_mac(mac)
	}

	pub fn create_reservation(&self, reservation: Reservation) -> Result<(), crate::error::LeaseError> {
		self.leases.add_reservation(reservation)
	}

	pub fn delete_reservation(&self, mac: Mac) -> Result<(), crate::error::LeaseError> {
		self.leases.delete_reservation(mac)
	}
}

/// Formats `now` as the `YYYY-MM-DD_HH` UTC bucket key spec §4.7 names
/// for `Statistics::by_hour`.
fn hour_key(now: SystemTime) -> String {
	let secs = now.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs();
	let days = (secs / 86_400) as i64;
	let hour = (secs % 86_400) / 3600;
	let (year, month, day) = civil_from_days(days);
	format!("{year:04}-{month:02}-{day:02}_{hour:02}")
}

/// Howard Hinnant's days-from-epoch-to-civil-date algorithm: converts a
/// day count since the Unix epoch into a proleptic-Gregorian
/// `(year, month, day)` triple, all in UTC. No calendar crate needed for
/// something this small and exact.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
	let z = days + 719_468;
	let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
	let doe = (z - era * 146_097) as u64;
	let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
	let y = yoe as i64 + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
	let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
	let y = if m <= 2 { y + 1 } else { y };
	(y, m, d)
}

#[cfg(test)]
mod civil_date_tests {
	use super::*;

	#[test]
	fn epoch_day_zero_is_1970_01_01() {
		assert_eq!(civil_from_days(0), (1970, 1, 1));
	}

	#[test]
	fn known_date_round_trips() {
		// 2024-03-01 is day 19783 since the epoch (2024 is a leap year).
		assert_eq!(civil_from_days(19_783), (2024, 3, 1));
	}

	#[test]
	fn hour_key_formats_as_expected() {
		let key = hour_key(SystemTime::UNIX_EPOCH + Duration::from_secs(19_783 * 86_400 + 5 * 3600));
		assert_eq!(key, "2024-03-01_05");
	}
}
