//! Error taxonomy for the DNS subsystem (spec §7). Kept as three enums
//! rather than one: a malformed-wire-message error never has anything to
//! do with a forwarder timeout, and callers at each layer only ever need
//! to match on their own layer's variants.

use thiserror::Error;

/// Failures from [`crate::wire::parse_query`]/[`crate::wire::parse_response`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParseError {
	#[error("message shorter than the 12-byte header")]
	ShortMessage,
	#[error("header fields inconsistent with message length")]
	InvalidHeader,
	#[error("not a well-formed query (QR set, or qdcount != 1)")]
	InvalidQuery,
	#[error("label length {0} exceeds 63 octets")]
	InvalidLabel(u8),
	#[error("decoded name exceeds 255 octets")]
	NameTooLong,
	#[error("compression pointer chain exceeded 10 jumps")]
	CompressionLoop,
	#[error("compression pointer out of range")]
	InvalidName,
}

/// Failures from [`crate::forwarder::Forwarder::forward`].
#[derive(Debug, Error)]
pub enum ForwardError {
	#[error("no upstream servers configured or reachable")]
	NoUpstreamServers,
	#[error("upstream query timed out")]
	QueryTimeout,
	#[error("upstream I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse upstream response: {0}")]
	Parse(#[from] ParseError),
}

/// Failures surfaced by [`crate::server::Server`] lifecycle/admin calls.
#[derive(Debug, Error)]
pub enum ServerError {
	#[error("server is already running")]
	AlreadyRunning,
	#[error("server is not running")]
	ServerNotStarted,
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}
