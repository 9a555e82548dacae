//! Allow/block lists and an optional rate-limit hook (spec §4). Thin by
//! design: the spec scopes rate-limited crypto accounting out, so this
//! only gates on MAC membership plus a pluggable closure.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::model::Mac;

pub trait RateLimiter: Send + Sync {
	fn allow(&self, mac: Mac) -> bool;
}

pub struct Security {
	allow_list: Option<HashSet<Mac>>,
	block_list: Mutex<HashSet<Mac>>,
	rate_limiter: Option<Box<dyn RateLimiter>>,
}

impl Security {
	pub fn new(allow_list: Option<HashSet<Mac>>, block_list: HashSet<Mac>) -> Self {
		Self { allow_list, block_list: Mutex::new(block_list), rate_limiter: None }
	}

	pub fn with_rate_limiter(mut self, limiter: Box<dyn RateLimiter>) -> Self {
		self.rate_limiter = Some(limiter);
		self
	}

	pub fn block(&self, mac: Mac) {
		self.block_list.lock().unwrap().insert(mac);
	}

	pub fn unblock(&self, mac: Mac) {
		self.block_list.lock().unwrap().remove(&mac);
	}

	/// An allow-list, when configured, is exhaustive: a MAC absent from
	/// it is rejected even if it is not separately blocked.
	pub fn is_client_allowed(&self, mac: Mac) -> bool {
		if self.block_list.lock().unwrap().contains(&mac) {
			return false;
		}

		if let Some(allow_list) = &self.allow_list {
			if !allow_list.contains(&mac) {
				return false;
			}
		}

		self.rate_limiter.as_ref().map_or(true, |limiter| limiter.allow(mac))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn mac(last: u8) -> Mac {
		Mac::from_octets([0, 0, 0, 0, 0, last])
	}

	#[test]
	fn blocked_mac_is_rejected() {
		let security = Security::new(None, HashSet::from([mac(1)]));
		assert!(!security.is_client_allowed(mac(1)));
		assert!(security.is_client_allowed(mac(2)));
	}

	#[test]
	fn allow_list_is_exhaustive() {
		let security = Security::new(Some(HashSet::from([mac(1)])), HashSet::new());
		assert!(security.is_client_allowed(mac(1)));
		assert!(!security.is_client_allowed(mac(2)));
	}
}
