//! The DNS data model (spec §3): questions, records, queries and
//! responses, plus the small closed enums (record type, class, response
//! code) the wire codec and cache key off of.

use std::net::SocketAddr;
use std::time::Duration;

/// How a query arrived, carried alongside the parsed [`Query`] so the
/// server can frame its reply the same way (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
	Udp,
	Tcp,
}

/// Record types this resolver parses structurally (spec §6). Anything
/// else round-trips as opaque rdata under `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
	A,
	Ns,
	Cname,
	Soa,
	Ptr,
	Mx,
	Txt,
	Aaaa,
	Srv,
	Unknown(u16),
}

impl RecordType {
	pub fn as_u16(self) -> u16 {
		match self {
			RecordType::A => 1,
			RecordType::Ns => 2,
			RecordType::Cname => 5,
			RecordType::Soa => 6,
			RecordType::Ptr => 12,
			RecordType::Mx => 15,
			RecordType::Txt => 16,
			RecordType::Aaaa => 28,
			RecordType::Srv => 33,
			RecordType::Unknown(v) => v,
		}
	}
}

impl From<u16> for RecordType {
	fn from(v: u16) -> Self {
		match v {
			1 => RecordType::A,
			2 => RecordType::Ns,
			5 => RecordType::Cname,
			6 => RecordType::Soa,
			12 => RecordType::Ptr,
			15 => RecordType::Mx,
			16 => RecordType::Txt,
			28 => RecordType::Aaaa,
			33 => RecordType::Srv,
			other => RecordType::Unknown(other),
		}
	}
}

/// DNS classes. Only IN is meaningful on this network; everything else
/// is retained for round-tripping but never produced by the forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
	In,
	Unknown(u16),
}

impl Class {
	pub fn as_u16(self) -> u16 {
		match self {
			Class::In => 1,
			Class::Unknown(v) => v,
		}
	}
}

impl From<u16> for Class {
	fn from(v: u16) -> Self {
		match v {
			1 => Class::In,
			other => Class::Unknown(other),
		}
	}
}

/// RFC 1035 response codes, the low 4 bits of the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
	NoError,
	FormatError,
	ServFail,
	NxDomain,
	NotImplemented,
	Refused,
	Other(u8),
}

impl ResponseCode {
	pub fn as_u8(self) -> u8 {
		match self {
			ResponseCode::NoError => 0,
			ResponseCode::FormatError => 1,
			ResponseCode::ServFail => 2,
			ResponseCode::NxDomain => 3,
			ResponseCode::NotImplemented => 4,
			ResponseCode::Refused => 5,
			ResponseCode::Other(v) => v,
		}
	}

	pub fn is_success(self) -> bool {
		matches!(self, ResponseCode::NoError)
	}
}

impl From<u8> for ResponseCode {
	fn from(v: u8) -> Self {
		match v & 0x0f {
			0 => ResponseCode::NoError,
			1 => ResponseCode::FormatError,
			2 => ResponseCode::ServFail,
			3 => ResponseCode::NxDomain,
			4 => ResponseCode::NotImplemented,
			5 => ResponseCode::Refused,
			other => ResponseCode::Other(other),
		}
	}
}

/// A single question. `name` preserves the case it was parsed with;
/// [`Question::cache_key`] is the lowercased form used for cache
/// equality (spec §3's "name lowercased for cache key equality").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
	pub name: String,
	pub qtype: RecordType,
	pub qclass: Class,
}

impl Question {
	pub fn new(name: impl Into<String>, qtype: RecordType, qclass: Class) -> Self {
		Self { name: name.into(), qtype, qclass }
	}

	/// The tuple a [`crate::cache::Cache`] keys on: lowercased name, type,
	/// class.
	pub fn cache_key(&self) -> (String, u16, u16) {
		(self.name.to_ascii_lowercase(), self.qtype.as_u16(), self.qclass.as_u16())
	}
}

/// A resource record. `rdata` is opaque on the wire; `ttl` is clamped by
/// the cache, not here (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
	pub name: String,
	pub rtype: RecordType,
	pub rclass: Class,
	pub ttl: u32,
	pub rdata: Vec<u8>,
}

/// A parsed inbound query, annotated with how it arrived.
#[derive(Debug, Clone)]
pub struct Query {
	pub id: u16,
	pub question: Question,
	pub client: Option<SocketAddr>,
	pub transport: Transport,
}

/// A parsed or synthesized response.
#[derive(Debug, Clone)]
pub struct Response {
	pub id: u16,
	pub question: Question,
	pub answers: Vec<Record>,
	pub authorities: Vec<Record>,
	pub additional: Vec<Record>,
	pub rcode: ResponseCode,
	pub cached: bool,
	pub elapsed: Duration,
}

impl Response {
	/// A SERVFAIL reply echoing the originating question, used when the
	/// forwarder cannot produce an answer (spec §4.4 step 3).
	pub fn servfail(id: u16, question: Question) -> Self {
		Self {
			id,
			question,
			answers: Vec::new(),
			authorities: Vec::new(),
			additional: Vec::new(),
			rcode: ResponseCode::ServFail,
			cached: false,
			elapsed: Duration::ZERO,
		}
	}

	/// The minimum TTL across all answer records, or `None` if there are
	/// none (spec §4.2's "if all records in a response have different
	/// TTLs, the minimum is used").
	pub fn min_answer_ttl(&self) -> Option<u32> {
		self.answers.iter().map(|r| r.ttl).min()
	}
}
