//! Error taxonomy for the DHCP subsystem (spec §7), split the same way
//! the DNS side is: wire/parse errors, lease-manager domain errors, and
//! server lifecycle errors never share a match arm in practice.

use thiserror::Error;

/// Failures from [`crate::packet::parse_request`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PacketError {
	#[error("message shorter than the fixed BOOTP header")]
	ShortMessage,
	#[error("magic cookie missing or invalid")]
	BadMagicCookie,
	#[error("option {0} truncated")]
	TruncatedOption(u8),
	#[error("message type option (53) missing")]
	MissingMessageType,
	#[error("unsupported DHCP message type {0}")]
	UnsupportedMessageType(u8),
}

/// Domain errors from [`crate::lease_manager::LeaseManager`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum LeaseError {
	#[error("lease not found")]
	LeaseNotFound,
	#[error("reservation not found")]
	ReservationNotFound,
	#[error("lease is held by a different MAC")]
	MacMismatch,
	#[error("no available IP addresses in pool")]
	PoolExhausted,
	#[error("ip {0} is outside the configured pool")]
	IpOutsidePool(String),
	#[error("ip {0} is currently held by another client")]
	IpInUse(String),
}

/// Failures from [`crate::handler`] request processing.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RequestError {
	#[error("invalid DHCP request: {0}")]
	InvalidRequest(String),
	#[error("client is not allowed")]
	ClientNotAllowed,
	#[error("unsupported DHCP message type {0}")]
	UnsupportedMessageType(u8),
	#[error(transparent)]
	Lease(#[from] LeaseError),
}

/// Failures surfaced by [`crate::server::Server`] lifecycle/admin calls.
#[derive(Debug, Error)]
pub enum ServerError {
	#[error("server is already running")]
	AlreadyRunning,
	#[error("server is not running")]
	NotRunning,
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}
