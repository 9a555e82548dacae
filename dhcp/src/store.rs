//! Persistence abstraction for leases, reservations and statistics
//! (spec §4.8). The in-memory implementation is authoritative for
//! tests; file/embedded-KV back-ends are sketched, not implemented
//! here, but must uphold the same defensive-copy-on-read contract.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::model::{Lease, LeaseState, Mac, Reservation, Statistics};

pub trait Store: Send + Sync {
	fn save_lease(&self, lease: Lease);
	fn load_lease(&self, id: &str) -> Option<Lease>;
	fn delete_lease(&self, id: &str);
	fn load_lease_by_ip(&self, ip: Ipv4Addr) -> Option<Lease>;
	/// Active-only lookup, per spec §4.8's `LoadByMAC (active only)`.
	fn load_lease_by_mac(&self, mac: Mac) -> Option<Lease>;
	fn load_all_leases(&self) -> Vec<Lease>;

	fn save_reservation(&self, reservation: Reservation);
	fn load_reservation(&self, mac: Mac) -> Option<Reservation>;
	fn delete_reservation(&self, mac: Mac);
	fn load_all_reservations(&self) -> Vec<Reservation>;

	fn save_statistics(&self, stats: Statistics);
	fn load_statistics(&self) -> Statistics;

	fn initialize(&self) {}
	fn close(&self) {}
}

#[derive(Default)]
pub struct InMemoryStore {
	leases: Mutex<HashMap<String, Lease>>,
	reservations: Mutex<HashMap<Mac, Reservation>>,
	statistics: Mutex<Statistics>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Store for InMemoryStore {
	fn save_lease(&self, lease: Lease) {
		self.leases.lock().unwrap().insert(lease.id.clone(), lease);
	}

	fn load_lease(&self, id: &str) -> Option<Lease> {
		self.leases.lock().unwrap().get(id).cloned()
	}

	fn delete_lease(&self, id: &str) {
		self.leases.lock().unwrap().remove(id);
	}

	fn load_lease_by_ip(&self, ip: Ipv4Addr) -> Option<Lease> {
		self.leases.lock().unwrap().values().find(|l| l.ip == ip).cloned()
	}

	fn load_lease_by_mac(&self, mac: Mac) -> Option<Lease> {
		self.leases.lock().unwrap().values().find(|l| l.mac == mac && l.state == LeaseState::Active).cloned()
	}

	fn load_all_leases(&self) -> Vec<Lease> {
		self.leases.lock().unwrap().values().cloned().collect()
	}

	fn save_reservation(&self, reservation: Reservation) {
		self.reservations.lock().unwrap().insert(reservation.mac, reservation);
	}

	fn load_reservation(&self, mac: Mac) -> Option<Reservation> {
		self.reservations.lock().unwrap().get(&mac).cloned()
	}

	fn delete_reservation(&self, mac: Mac) {
		self.reservations.lock().unwrap().remove(&mac);
	}

	fn load_all_reservations(&self) -> Vec<Reservation> {
		self.reservations.lock().unwrap().values().cloned().collect()
	}

	fn save_statistics(&self, stats: Statistics) {
		*self.statistics.lock().unwrap() = stats;
	}

	fn load_statistics(&self) -> Statistics {
		self.statistics.lock().unwrap().clone()
	}
}
