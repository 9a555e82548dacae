//! Bounded, TTL-gated, LRU-evicting response cache (spec §4.2).
//!
//! The teacher's `net::dns::Resolver` keeps its in-flight requests in a
//! plain `HashMap` (see `net/src/dns/mod.rs`); this cache follows the
//! same instinct for the entry table, and takes spec §9's suggestion
//! literally for the LRU ordering: "an ordered map keyed by access
//! time" — here a `BTreeMap<u64, Key>` keyed by a monotonically
//! increasing access counter rather than a raw timestamp, so two
//! accesses in the same instant never collide.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use shared::{Clock, SystemClock};

use crate::message::{Question, Response};

/// A single cached answer (spec §3's `CacheEntry`).
#[derive(Debug, Clone)]
pub struct CacheEntry {
	pub response: Response,
	pub expires_at: SystemTime,
	pub last_access: SystemTime,
	pub hit_count: u64,
}

/// Snapshot of cache counters (spec §3's `CacheStats`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
	pub size: usize,
	pub max_size: usize,
	pub hits: u64,
	pub misses: u64,
	pub evictions: u64,
	pub last_sweep: Option<SystemTime>,
}

type Key = (String, u16, u16);

struct Slot {
	entry: CacheEntry,
	seq: u64,
}

#[derive(Default)]
struct Inner {
	entries: HashMap<Key, Slot>,
	order: BTreeMap<u64, Key>,
	next_seq: u64,
	hits: u64,
	misses: u64,
	evictions: u64,
	last_sweep: Option<SystemTime>,
}

pub struct Cache {
	max_size: usize,
	min_ttl: u32,
	max_ttl: u32,
	clock: Arc<dyn Clock>,
	inner: Mutex<Inner>,
}

impl Cache {
	pub fn new(max_size: usize, min_ttl: u32, max_ttl: u32) -> Self {
		Self::with_clock(max_size, min_ttl, max_ttl, Arc::new(SystemClock))
	}

	pub fn with_clock(max_size: usize, min_ttl: u32, max_ttl: u32, clock: Arc<dyn Clock>) -> Self {
		Self { max_size, min_ttl, max_ttl, clock, inner: Mutex::new(Inner::default()) }
	}

	fn clamp_ttl(&self, ttl: u32) -> u32 {
		ttl.clamp(self.min_ttl, self.max_ttl.max(self.min_ttl))
	}

	/// Returns the cached response if present and unexpired. Counts the
	/// lookup as a hit or miss either way, and on hit, bumps last-access
	/// and hit-count and moves the entry to the most-recently-used end.
	pub fn get(&self, question: &Question) -> Option<Response> {
		let key = question.cache_key();
		let now = self.clock.now();
		let mut inner = self.inner.lock().unwrap();

		let found = inner.entries.get(&key).map(|slot| (slot.entry.expires_at, slot.entry.hit_count, slot.entry.response.clone(), slot.seq));

		match found {
			Some((expires_at, hit_count, response, old_seq)) if now < expires_at => {
				inner.order.remove(&old_seq);
				let new_seq = inner.next_seq;
				inner.next_seq += 1;
				inner.entries.insert(
					key.clone(),
					Slot { entry: CacheEntry { response: response.clone(), expires_at, last_access: now, hit_count: hit_count + 1 }, seq: new_seq },
				);
				inner.order.insert(new_seq, key);
				inner.hits += 1;
				Some(response)
			}
			Some((_, _, _, old_seq)) => {
				inner.entries.remove(&key);
				inner.order.remove(&old_seq);
				inner.misses += 1;
				None
			}
			None => {
				inner.misses += 1;
				None
			}
		}
	}

	/// Inserts `response` under `question`, clamping `ttl` to
	/// `[min_ttl, max_ttl]`. Evicts the single least-recently-used entry
	/// if this insertion pushes the table over `max_size`.
	pub fn set(&self, question: &Question, response: &Response, ttl: u32) {
		let ttl = self.clamp_ttl(ttl);
		let key = question.cache_key();
		let now = self.clock.now();
		let expires_at = now + std::time::Duration::from_secs(ttl as u64);

		let mut inner = self.inner.lock().unwrap();

		if let Some(old) = inner.entries.get(&key) {
			inner.order.remove(&old.seq);
		}

		let seq = inner.next_seq;
		inner.next_seq += 1;

		inner
			.entries
			.insert(key.clone(), Slot { entry: CacheEntry { response: response.clone(), expires_at, last_access: now, hit_count: 0 }, seq });
		inner.order.insert(seq, key);

		if inner.entries.len() > self.max_size {
			if let Some((&oldest_seq, oldest_key)) = inner.order.iter().next() {
				let oldest_key = oldest_key.clone();
				inner.order.remove(&oldest_seq);
				inner.entries.remove(&oldest_key);
				inner.evictions += 1;
			}
		}
	}

	/// Removes all entries whose `expires_at` has passed. Independent of
	/// the eviction that `set` performs under capacity pressure.
	pub fn cleanup(&self) {
		let now = self.clock.now();
		let mut inner = self.inner.lock().unwrap();

		let expired: Vec<Key> = inner.entries.iter().filter(|(_, slot)| slot.entry.expires_at <= now).map(|(k, _)| k.clone()).collect();

		for key in expired {
			if let Some(slot) = inner.entries.remove(&key) {
				inner.order.remove(&slot.seq);
			}
		}

		inner.last_sweep = Some(now);
	}

	/// Removes all entries and resets the per-cache counters. Does not
	/// touch any lifetime counters a caller keeps elsewhere.
	pub fn clear(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.entries.clear();
		inner.order.clear();
		inner.hits = 0;
		inner.misses = 0;
		inner.evictions = 0;
	}

	pub fn stats(&self) -> CacheStats {
		let inner = self.inner.lock().unwrap();
		CacheStats {
			size: inner.entries.len(),
			max_size: self.max_size,
			hits: inner.hits,
			misses: inner.misses,
			evictions: inner.evictions,
			last_sweep: inner.last_sweep,
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::{Duration, UNIX_EPOCH};

	use shared::FixedClock;

	use super::*;
	use crate::message::{Class, RecordType};

	fn question(name: &str) -> Question {
		Question::new(name, RecordType::A, Class::In)
	}

	fn response(question: &Question, ip: [u8; 4], ttl: u32) -> Response {
		Response {
			id: 0,
			question: question.clone(),
			answers: vec![crate::message::Record { name: question.name.clone(), rtype: RecordType::A, rclass: Class::In, ttl, rdata: ip.to_vec() }],
			authorities: Vec::new(),
			additional: Vec::new(),
			rcode: crate::message::ResponseCode::NoError,
			cached: false,
			elapsed: Duration::ZERO,
		}
	}

	#[test]
	fn hit_after_set_returns_same_content() {
		let cache = Cache::new(10, 0, 3600);
		let q = question("example.com.");
		let r = response(&q, [192, 0, 2, 1], 300);

		cache.set(&q, &r, 300);
		let got = cache.get(&q).unwrap();

		assert_eq!(got.answers, r.answers);
		assert_eq!(cache.stats().hits, 1);
	}

	#[test]
	fn miss_after_expiry() {
		let clock = Arc::new(FixedClock::new(UNIX_EPOCH));
		let cache = Cache::with_clock(10, 0, 3600, clock.clone());
		let q = question("example.com.");
		let r = response(&q, [192, 0, 2, 1], 300);

		cache.set(&q, &r, 10);
		clock.advance(Duration::from_secs(5));
		assert!(cache.get(&q).is_some());

		clock.advance(Duration::from_secs(10));
		assert!(cache.get(&q).is_none());
		assert_eq!(cache.stats().misses, 1);
	}

	#[test]
	fn ttl_clamped_to_bounds() {
		let clock = Arc::new(FixedClock::new(UNIX_EPOCH));
		let cache = Cache::with_clock(10, 60, 120, clock.clone());
		let q = question("clamped.test.");
		let r = response(&q, [1, 2, 3, 4], 5);

		// Requested ttl of 5s is below min_ttl of 60s, so it should be clamped up.
		cache.set(&q, &r, 5);
		clock.advance(Duration::from_secs(61));
		assert!(cache.get(&q).is_none());

		let r2 = response(&q, [1, 2, 3, 4], 5);
		cache.set(&q, &r2, 5);
		clock.advance(Duration::from_secs(59));
		assert!(cache.get(&q).is_some());
	}

	#[test]
	fn lru_eviction_keeps_most_recently_used() {
		let cache = Cache::new(3, 0, 3600);
		let q1 = question("q1.");
		let q2 = question("q2.");
		let q3 = question("q3.");
		let q4 = question("q4.");

		cache.set(&q1, &response(&q1, [1, 1, 1, 1], 300), 300);
		cache.set(&q2, &response(&q2, [2, 2, 2, 2], 300), 300);
		cache.set(&q3, &response(&q3, [3, 3, 3, 3], 300), 300);

		// Touch q1 so q2 becomes the least-recently-used entry.
		assert!(cache.get(&q1).is_some());

		cache.set(&q4, &response(&q4, [4, 4, 4, 4], 300), 300);

		assert!(cache.get(&q2).is_none());
		assert!(cache.get(&q1).is_some());
		assert!(cache.get(&q3).is_some());
		assert!(cache.get(&q4).is_some());

		let stats = cache.stats();
		assert_eq!(stats.size, 3);
		assert_eq!(stats.evictions, 1);
	}

	#[test]
	fn repeated_set_does_not_grow_size() {
		let cache = Cache::new(10, 0, 3600);
		let q = question("idempotent.test.");
		let r = response(&q, [9, 9, 9, 9], 300);

		cache.set(&q, &r, 300);
		cache.set(&q, &r, 300);

		assert_eq!(cache.stats().size, 1);
	}

	#[test]
	fn clear_resets_counters_but_not_size_semantics() {
		let cache = Cache::new(10, 0, 3600);
		let q = question("clear.test.");
		let r = response(&q, [5, 5, 5, 5], 300);

		cache.set(&q, &r, 300);
		cache.get(&q);
		cache.get(&question("missing."));

		cache.clear();
		let stats = cache.stats();
		assert_eq!(stats.size, 0);
		assert_eq!(stats.hits, 0);
		assert_eq!(stats.misses, 0);
		assert_eq!(stats.evictions, 0);
	}
}
