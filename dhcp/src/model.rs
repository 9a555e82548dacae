//! The DHCP data model (spec §3): leases, reservations, pool
//! configuration, wire-level request/response, and the message-type
//! enum the packet codec and handler dispatch on.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::SystemTime;

/// A client hardware address in its canonical lowercase hex-colon form
/// (spec §3's "mac (canonical hex colon form)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac(pub [u8; 6]);

impl fmt::Display for Mac {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let [a, b, c, d, e, g] = self.0;
		write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed MAC address: {0}")]
pub struct MacParseError(pub String);

impl FromStr for Mac {
	type Err = MacParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let parts: Vec<&str> = s.split(':').collect();
		if parts.len() != 6 {
			return Err(MacParseError(s.to_owned()));
		}

		let mut bytes = [0u8; 6];
		for (i, part) in parts.iter().enumerate() {
			bytes[i] = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_owned()))?;
		}

		Ok(Mac(bytes))
	}
}

impl Mac {
	pub fn from_octets(bytes: [u8; 6]) -> Self {
		Mac(bytes)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
	Active,
	Expired,
	Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseKind {
	Dynamic,
	Static,
}

/// A time-bounded IP assignment (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
	pub id: String,
	pub ip: Ipv4Addr,
	pub mac: Mac,
	pub client_id: Option<String>,
	pub start: SystemTime,
	pub end: SystemTime,
	pub last_renewal: SystemTime,
	pub state: LeaseState,
	pub kind: LeaseKind,
	pub options: HashMap<u8, Vec<u8>>,
	pub metadata: HashMap<String, String>,
}

impl Lease {
	pub fn is_active_at(&self, now: SystemTime) -> bool {
		self.state == LeaseState::Active && self.end > now
	}
}

/// A standing MAC→IP administrative binding (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
	pub mac: Mac,
	pub ip: Ipv4Addr,
	pub hostname: Option<String>,
	pub description: Option<String>,
	pub enabled: bool,
}

/// The dynamic allocation range and per-lease defaults (spec §3).
#[derive(Debug, Clone)]
pub struct PoolConfig {
	pub start_ip: Ipv4Addr,
	pub end_ip: Ipv4Addr,
	pub subnet_mask: Ipv4Addr,
	pub gateway: Ipv4Addr,
	pub dns_servers: Vec<Ipv4Addr>,
	pub domain_name: Option<String>,
	pub exclude: Vec<Ipv4Addr>,
	pub lease_time: std::time::Duration,
}

impl PoolConfig {
	/// Numeric bounds of the closed interval `[start_ip, end_ip]`.
	pub fn bounds(&self) -> (u32, u32) {
		(u32::from(self.start_ip), u32::from(self.end_ip))
	}

	pub fn contains(&self, ip: Ipv4Addr) -> bool {
		let (lo, hi) = self.bounds();
		let v = u32::from(ip);
		v >= lo && v <= hi
	}

	/// Iterates every address in the pool, low to high, carrying through
	/// the octets the way a plain numeric range over the 32-bit address
	/// does.
	pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
		let (lo, hi) = self.bounds();
		(lo..=hi).map(Ipv4Addr::from)
	}
}

/// Message types this handler dispatches on (spec §4.6). `TryFrom<u8>`
/// is fallible since option 53 can legally carry a value outside this
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
	Discover,
	Offer,
	Request,
	Decline,
	Ack,
	Nak,
	Release,
	Inform,
}

impl MessageType {
	pub fn as_u8(self) -> u8 {
		match self {
			MessageType::Discover => 1,
			MessageType::Offer => 2,
			MessageType::Request => 3,
			MessageType::Decline => 4,
			MessageType::Ack => 5,
			MessageType::Nak => 6,
			MessageType::Release => 7,
			MessageType::Inform => 8,
		}
	}
}

impl TryFrom<u8> for MessageType {
	type Error = u8;

	fn try_from(v: u8) -> Result<Self, u8> {
		match v {
			1 => Ok(MessageType::Discover),
			2 => Ok(MessageType::Offer),
			3 => Ok(MessageType::Request),
			4 => Ok(MessageType::Decline),
			5 => Ok(MessageType::Ack),
			6 => Ok(MessageType::Nak),
			7 => Ok(MessageType::Release),
			8 => Ok(MessageType::Inform),
			other => Err(other),
		}
	}
}

/// A parsed inbound DHCP request (spec §3). `options` retains every raw
/// TLV so the handler can read fingerprinting fields (55, 60) without
/// the model growing a field per option.
#[derive(Debug, Clone)]
pub struct Request {
	pub message_type: MessageType,
	pub transaction_id: u32,
	pub client_mac: Mac,
	pub requested_ip: Option<Ipv4Addr>,
	pub client_ip: Option<Ipv4Addr>,
	pub client_id: Option<String>,
	pub giaddr: Ipv4Addr,
	pub flags_broadcast: bool,
	pub options: HashMap<u8, Vec<u8>>,
}

/// A response to be encoded back onto the wire (spec §3).
#[derive(Debug, Clone)]
pub struct Response {
	pub message_type: MessageType,
	pub transaction_id: u32,
	pub client_mac: Mac,
	pub your_ip: Ipv4Addr,
	pub server_ip: Ipv4Addr,
	pub options: HashMap<u8, Vec<u8>>,
	pub lease_time: u32,
}

/// One entry in `Statistics::recent_activity` (spec §3).
#[derive(Debug, Clone)]
pub struct RecentEvent {
	pub timestamp: SystemTime,
	pub mac: Mac,
	pub message_type: MessageType,
}

/// Aggregate counters (spec §3). Bucketed by message type and by hour
/// key `YYYY-MM-DD_HH` per spec §4.7, plus a bounded ring of the most
/// recent requests for quick inspection without scanning the lease
/// store.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
	pub total_requests: u64,
	pub by_message_type: HashMap<u8, u64>,
	pub by_hour: HashMap<String, u64>,
	pub active_leases: u64,
	pub uptime: std::time::Duration,
	pub recent_activity: VecDeque<RecentEvent>,
}
