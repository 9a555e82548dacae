//! Message-type state machine: DISCOVER/REQUEST/RELEASE/DECLINE/INFORM
//! in, OFFER/ACK/NAK out (spec §4.6).

use std::net::Ipv4Addr;

use crate::error::{LeaseError, RequestError};
use crate::lease_manager::LeaseManager;
use crate::model::{MessageType, PoolConfig, Request, Response};
use crate::packet;

pub struct HandlerConfig {
	pub server_ip: Ipv4Addr,
	pub custom_options: std::collections::HashMap<u8, Vec<u8>>,
}

pub struct PacketHandler<'a> {
	leases: &'a LeaseManager,
	pool: &'a PoolConfig,
	config: HandlerConfig,
}

impl<'a> PacketHandler<'a> {
	pub fn new(leases: &'a LeaseManager, pool: &'a PoolConfig, config: HandlerConfig) -> Self {
		Self { leases, pool, config }
	}

	fn standard_options(&self) -> std::collections::HashMap<u8, Vec<u8>> {
		let mut options = packet::standard_options(
			self.pool.subnet_mask,
			self.pool.gateway,
			self.pool.dns_servers.first().copied(),
			self.pool.domain_name.as_deref(),
			self.pool.lease_time.as_secs() as u32,
			self.config.server_ip,
		);

		options.extend(self.config.custom_options.clone());
		options
	}

	fn nak(&self, request: &Request, reason: &str) -> Response {
		let mut options = std::collections::HashMap::new();
		packet::set_nak_reason(&mut options, reason);

		Response {
			message_type: MessageType::Nak,
			transaction_id: request.transaction_id,
			client_mac: request.client_mac,
			your_ip: Ipv4Addr::UNSPECIFIED,
			server_ip: self.config.server_ip,
			options,
			lease_time: 0,
		}
	}

	fn offer_or_ack(&self, request: &Request, message_type: MessageType, your_ip: Ipv4Addr) -> Response {
		Response {
			message_type,
			transaction_id: request.transaction_id,
			client_mac: request.client_mac,
			your_ip,
			server_ip: self.config.server_ip,
			options: self.standard_options(),
			lease_time: self.pool.lease_time.as_secs() as u32,
		}
	}

	/// Dispatches on `request.message_type`. Returns `Ok(None)` for
	/// message types that produce no response (DECLINE, RELEASE).
	pub fn handle(&self, request: &Request) -> Result<Option<Response>, RequestError> {
		packet::validate_request(request)?;

		match request.message_type {
			MessageType::Discover => {
				let fingerprint = packet::client_fingerprint(request);
				log::debug!("DISCOVER from {} ({fingerprint})", request.client_mac);

				match self.leases.allocate_ip(request.client_mac, request.requested_ip, request.client_id.clone()) {
					Ok(ip) => Ok(Some(self.offer_or_ack(request, MessageType::Offer, ip))),
					Err(err) => Ok(Some(self.nak(request, &err.to_string()))),
				}
			}

			MessageType::Request => {
				let requested = request.requested_ip.or(request.client_ip);

				let existing = requested.and_then(|ip| self.leases.get_lease_by_ip(ip));

				let result = match existing {
					Some(lease) if lease.mac == request.client_mac => {
						self.leases.renew_lease(lease.ip, request.client_mac, self.pool.lease_time).map(|_| lease.ip)
					}
					_ => self.leases.allocate_ip(request.client_mac, request.requested_ip, request.client_id.clone()),
				};

				match result {
					Ok(ip) => Ok(Some(self.offer_or_ack(request, MessageType::Ack, ip))),
					Err(err) => Ok(Some(self.nak(request, &err.to_string()))),
				}
			}

			MessageType::Decline => {
				log::warn!("DECLINE from {} for {:?}", request.client_mac, request.requested_ip);
				Ok(None)
			}

			MessageType::Release => {
				if let Some(ip) = request.client_ip.or(request.requested_ip) {
					match self.leases.release_ip(ip, request.client_mac) {
						Ok(()) | Err(LeaseError::LeaseNotFound) => {}
						Err(err) => log::warn!("RELEASE from {} failed: {err}", request.client_mac),
					}
				}
				Ok(None)
			}

			MessageType::Inform => {
				let mut response = self.offer_or_ack(request, MessageType::Ack, Ipv4Addr::UNSPECIFIED);
				response.lease_time = 0;
				Ok(Some(response))
			}

			other => Err(RequestError::UnsupportedMessageType(other.as_u8())),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::{Duration, UNIX_EPOCH};

	use shared::FixedClock;

	use super::*;
	use crate::model::Mac;
	use crate::store::InMemoryStore;

	fn pool() -> PoolConfig {
		PoolConfig {
			start_ip: "192.168.1.100".parse().unwrap(),
			end_ip: "192.168.1.110".parse().unwrap(),
			subnet_mask: "255.255.255.0".parse().unwrap(),
			gateway: "192.168.1.1".parse().unwrap(),
			dns_servers: vec!["192.168.1.1".parse().unwrap()],
			domain_name: Some("lan.local".into()),
			exclude: Vec::new(),
			lease_time: Duration::from_secs(3600),
		}
	}

	fn request(mac: Mac, message_type: MessageType, xid: u32, requested_ip: Option<Ipv4Addr>) -> Request {
		Request {
			message_type,
			transaction_id: xid,
			client_mac: mac,
			requested_ip,
			client_ip: None,
			client_id: None,
			giaddr: Ipv4Addr::UNSPECIFIED,
			flags_broadcast: false,
			options: Default::default(),
		}
	}

	#[test]
	fn discover_then_request_acks_same_ip() {
		let pool = pool();
		let leases = LeaseManager::new(Arc::new(InMemoryStore::new()), pool.clone(), Arc::new(FixedClock::new(UNIX_EPOCH)));
		let handler = PacketHandler::new(&leases, &pool, HandlerConfig { server_ip: "192.168.1.1".parse().unwrap(), custom_options: Default::default() });

		let mac = Mac::from_octets([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
		let discover = request(mac, MessageType::Discover, 42, None);
		let offer = handler.handle(&discover).unwrap().unwrap();
		assert_eq!(offer.message_type, MessageType::Offer);
		assert_eq!(offer.your_ip, "192.168.1.100".parse::<Ipv4Addr>().unwrap());
		assert_eq!(offer.transaction_id, 42);

		let req = request(mac, MessageType::Request, 43, Some(offer.your_ip));
		let ack = handler.handle(&req).unwrap().unwrap();
		assert_eq!(ack.message_type, MessageType::Ack);
		assert_eq!(ack.your_ip, offer.your_ip);

		let second_discover = request(mac, MessageType::Discover, 44, None);
		let second_offer = handler.handle(&second_discover).unwrap().unwrap();
		assert_eq!(second_offer.your_ip, offer.your_ip);
	}

	#[test]
	fn exhausted_pool_returns_nak() {
		let mut pool = pool();
		pool.end_ip = "192.168.1.101".parse().unwrap();

		let leases = LeaseManager::new(Arc::new(InMemoryStore::new()), pool.clone(), Arc::new(FixedClock::new(UNIX_EPOCH)));
		let handler = PacketHandler::new(&leases, &pool, HandlerConfig { server_ip: "192.168.1.1".parse().unwrap(), custom_options: Default::default() });

		handler.handle(&request(Mac::from_octets([0, 0, 0, 0, 0, 1]), MessageType::Discover, 1, None)).unwrap();
		handler.handle(&request(Mac::from_octets([0, 0, 0, 0, 0, 2]), MessageType::Discover, 2, None)).unwrap();
		let third = handler.handle(&request(Mac::from_octets([0, 0, 0, 0, 0, 3]), MessageType::Discover, 3, None)).unwrap().unwrap();

		assert_eq!(third.message_type, MessageType::Nak);
	}

	#[test]
	fn inform_does_not_allocate() {
		let pool = pool();
		let leases = LeaseManager::new(Arc::new(InMemoryStore::new()), pool.clone(), Arc::new(FixedClock::new(UNIX_EPOCH)));
		let handler = PacketHandler::new(&leases, &pool, HandlerConfig { server_ip: "192.168.1.1".parse().unwrap(), custom_options: Default::default() });

		let mac = Mac::from_octets([9, 9, 9, 9, 9, 9]);
		let response = handler.handle(&request(mac, MessageType::Inform, 5, None)).unwrap().unwrap();

		assert_eq!(response.your_ip, Ipv4Addr::UNSPECIFIED);
		assert_eq!(response.lease_time, 0);
		assert!(leases.get_leases().is_empty());
	}
}
