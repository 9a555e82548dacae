//! Owns pool arithmetic, the reservation table, and lease
//! allocation/renewal/release/expiry (spec §4.5). A single exclusive
//! lock serializes every allocation-affecting call; read-only queries
//! (`get_lease_by_ip`, `get_leases`) don't need one of their own since
//! the Store already defensive-copies on read.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use shared::Clock;

use crate::error::LeaseError;
use crate::model::{Lease, LeaseKind, LeaseState, Mac, PoolConfig, Reservation};
use crate::store::Store;

const CLEANUP_GRACE: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

pub struct LeaseManager {
	store: Arc<dyn Store>,
	pool: PoolConfig,
	clock: Arc<dyn Clock>,
	// Guards every allocation-affecting operation; see spec §9's note
	// that allocation correctness dominates throughput at this scale.
	lock: Mutex<()>,
}

impl LeaseManager {
	pub fn new(store: Arc<dyn Store>, pool: PoolConfig, clock: Arc<dyn Clock>) -> Self {
		Self { store, pool, clock, lock: Mutex::new(()) }
	}

	fn excluded(&self, ip: Ipv4Addr) -> bool {
		self.pool.exclude.contains(&ip)
	}

	fn reservation_for_mac(&self, mac: Mac) -> Option<Reservation> {
		self.store.load_reservation(mac).filter(|r| r.enabled)
	}

	fn reservation_for_ip(&self, ip: Ipv4Addr) -> Option<Reservation> {
		self.store.load_all_reservations().into_iter().find(|r| r.enabled && r.ip == ip)
	}

	fn active_leases(&self) -> Vec<Lease> {
		let now = self.clock.now();
		self.store.load_all_leases().into_iter().filter(|l| l.is_active_at(now)).collect()
	}

	fn ip_in_use(&self, ip: Ipv4Addr) -> bool {
		self.active_leases().iter().any(|l| l.ip == ip)
	}

	fn new_lease(&self, mac: Mac, ip: Ipv4Addr, client_id: Option<String>, kind: LeaseKind) -> Lease {
		let now = self.clock.now();
		let unix_secs = now.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs();

		Lease {
			id: format!("{mac}_{unix_secs}"),
			ip,
			mac,
			client_id,
			start: now,
			end: now + self.pool.lease_time,
			last_renewal: now,
			state: LeaseState::Active,
			kind,
			options: Default::default(),
			metadata: Default::default(),
		}
	}

	/// The four-step algorithm from spec §4.5, in order: idempotent
	/// re-offer of an existing active lease, reservation priority,
	/// honoring a free requested IP, then first-available from the pool.
	pub fn allocate_ip(&self, mac: Mac, requested_ip: Option<Ipv4Addr>, client_id: Option<String>) -> Result<Ipv4Addr, LeaseError> {
		let _guard = self.lock.lock().unwrap();

		if let Some(existing) = self.store.load_lease_by_mac(mac) {
			return Ok(existing.ip);
		}

		if let Some(reservation) = self.reservation_for_mac(mac) {
			let holder = self.store.load_lease_by_ip(reservation.ip).filter(|l| l.is_active_at(self.clock.now()));

			if holder.as_ref().map(|l| l.mac) != Some(mac) && holder.is_some() {
				// Someone else actively holds the reserved IP; fall through
				// to ordinary allocation rather than stealing it here.
			} else {
				let lease = self.new_lease(mac, reservation.ip, client_id, LeaseKind::Static);
				self.store.save_lease(lease.clone());
				return Ok(lease.ip);
			}
		}

		if let Some(ip) = requested_ip {
			if self.pool.contains(ip) && !self.excluded(ip) && !self.ip_in_use(ip) && self.reservation_for_ip(ip).is_none() {
				let lease = self.new_lease(mac, ip, client_id, LeaseKind::Dynamic);
				self.store.save_lease(lease.clone());
				return Ok(lease.ip);
			}
		}

		let reserved: Vec<Ipv4Addr> = self.store.load_all_reservations().into_iter().filter(|r| r.enabled).map(|r| r.ip).collect();
		let in_use: Vec<Ipv4Addr> = self.active_leases().iter().map(|l| l.ip).collect();

		let free = self.pool.iter().find(|ip| !self.excluded(*ip) && !reserved.contains(ip) && !in_use.contains(ip));

		match free {
			Some(ip) => {
				let lease = self.new_lease(mac, ip, client_id, LeaseKind::Dynamic);
				self.store.save_lease(lease.clone());
				Ok(lease.ip)
			}
			None => Err(LeaseError::PoolExhausted),
		}
	}

	pub fn release_ip(&self, ip: Ipv4Addr, mac: Mac) -> Result<(), LeaseError> {
		let _guard = self.lock.lock().unwrap();

		let mut lease = self.store.load_lease_by_ip(ip).ok_or(LeaseError::LeaseNotFound)?;
		if lease.mac != mac {
			return Err(LeaseError::MacMismatch);
		}

		lease.state = LeaseState::Released;
		lease.last_renewal = self.clock.now();
		self.store.save_lease(lease);
		Ok(())
	}

	pub fn renew_lease(&self, ip: Ipv4Addr, mac: Mac, duration: std::time::Duration) -> Result<(), LeaseError> {
		let _guard = self.lock.lock().unwrap();

		let mut lease = self.store.load_lease_by_ip(ip).ok_or(LeaseError::LeaseNotFound)?;
		if lease.mac != mac {
			return Err(LeaseError::MacMismatch);
		}

		let now = self.clock.now();
		lease.end = now + duration;
		lease.last_renewal = now;
		lease.state = LeaseState::Active;
		self.store.save_lease(lease);
		Ok(())
	}

	/// Transitions every active lease whose end-time has passed to
	/// expired. Does not delete anything; deletion is
	/// [`Self::cleanup_expired_leases`]'s job.
	pub fn expire_leases(&self) {
		let _guard = self.lock.lock().unwrap();
		let now = self.clock.now();

		for mut lease in self.store.load_all_leases() {
			if lease.state == LeaseState::Active && lease.end <= now {
				lease.state = LeaseState::Expired;
				self.store.save_lease(lease);
			}
		}
	}

	/// Runs [`Self::expire_leases`], then deletes every expired or
	/// released lease whose end-time is more than 24 hours in the past.
	pub fn cleanup_expired_leases(&self) {
		self.expire_leases();

		let _guard = self.lock.lock().unwrap();
		let now = self.clock.now();

		for lease in self.store.load_all_leases() {
			let stale = matches!(lease.state, LeaseState::Expired | LeaseState::Released) && now.duration_since(lease.end).unwrap_or_default() > CLEANUP_GRACE;

			if stale {
				self.store.delete_lease(&lease.id);
			}
		}
	}

	/// Rejects if another client currently holds the IP in active
	/// state (spec §4.5).
	pub fn add_reservation(&self, reservation: Reservation) -> Result<(), LeaseError> {
		let _guard = self.lock.lock().unwrap();

		if !self.pool.contains(reservation.ip) {
			return Err(LeaseError::IpOutsidePool(reservation.ip.to_string()));
		}

		if let Some(holder) = self.store.load_lease_by_ip(reservation.ip) {
			if holder.is_active_at(self.clock.now()) && holder.mac != reservation.mac {
				return Err(LeaseError::IpInUse(reservation.ip.to_string()));
			}
		}

		self.store.save_reservation(reservation);
		Ok(())
	}

	pub fn delete_reservation(&self, mac: Mac) -> Result<(), LeaseError> {
		let _guard = self.lock.lock().unwrap();

		if self.store.load_reservation(mac).is_none() {
			return Err(LeaseError::ReservationNotFound);
		}

		self.store.delete_reservation(mac);
		Ok(())
	}

	pub fn get_leases(&self) -> Vec<Lease> {
		self.store.load_all_leases()
	}

	pub fn get_lease_by_ip(&self, ip: Ipv4Addr) -> Option<Lease> {
		self.store.load_lease_by_ip(ip)
	}

	pub fn get_lease_by_mac(&self, mac: Mac) -> Option<Lease> {
		self.store.load_lease_by_mac(mac)
	}

	pub fn active_lease_count(&self) -> u64 {
		self.active_leases().len() as u64
	}
}

#[cfg(test)]
mod tests {
	use std::time::{Duration, UNIX_EPOCH};

	use shared::FixedClock;

	use super::*;
	use crate::store::InMemoryStore;

	fn mac(last: u8) -> Mac {
		Mac::from_octets([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
	}

	fn pool(start: &str, end: &str) -> PoolConfig {
		PoolConfig {
			start_ip: start.parse().unwrap(),
			end_ip: end.parse().unwrap(),
			subnet_mask: "255.255.255.0".parse().unwrap(),
			gateway: "192.168.1.1".parse().unwrap(),
			dns_servers: vec!["192.168.1.1".parse().unwrap()],
			domain_name: None,
			exclude: Vec::new(),
			lease_time: Duration::from_secs(3600),
		}
	}

	fn manager(pool_cfg: PoolConfig) -> LeaseManager {
		LeaseManager::new(Arc::new(InMemoryStore::new()), pool_cfg, Arc::new(FixedClock::new(UNIX_EPOCH)))
	}

	#[test]
	fn discover_then_discover_is_idempotent() {
		let lm = manager(pool("192.168.1.100", "192.168.1.110"));
		let first = lm.allocate_ip(mac(1), None, None).unwrap();
		let second = lm.allocate_ip(mac(1), None, None).unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn reservation_takes_priority_over_pool() {
		let lm = manager(pool("192.168.1.100", "192.168.1.110"));
		lm.add_reservation(Reservation { mac: mac(2), ip: "192.168.1.107".parse().unwrap(), hostname: None, description: None, enabled: true }).unwrap();

		let ip = lm.allocate_ip(mac(2), None, None).unwrap();
		assert_eq!(ip, "192.168.1.107".parse::<Ipv4Addr>().unwrap());

		let other_ip = lm.allocate_ip(mac(3), Some("192.168.1.107".parse().unwrap()), None).unwrap();
		assert_ne!(other_ip, "192.168.1.107".parse::<Ipv4Addr>().unwrap());
	}

	#[test]
	fn pool_exhaustion_fails_third_client() {
		let lm = manager(pool("192.168.1.100", "192.168.1.101"));
		lm.allocate_ip(mac(1), None, None).unwrap();
		lm.allocate_ip(mac(2), None, None).unwrap();
		let err = lm.allocate_ip(mac(3), None, None).unwrap_err();
		assert_eq!(err, LeaseError::PoolExhausted);
	}

	#[test]
	fn release_requires_matching_mac() {
		let lm = manager(pool("192.168.1.100", "192.168.1.110"));
		let ip = lm.allocate_ip(mac(1), None, None).unwrap();

		assert_eq!(lm.release_ip(ip, mac(2)), Err(LeaseError::MacMismatch));
		assert!(lm.release_ip(ip, mac(1)).is_ok());
	}

	#[test]
	fn single_ip_pool_contains_exactly_one_address() {
		let p = pool("192.168.1.50", "192.168.1.50");
		assert_eq!(p.iter().count(), 1);
	}
}
