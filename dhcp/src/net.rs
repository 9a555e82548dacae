//! UDP socket bound to the DHCP service port, and the RFC 2131 §4.1
//! destination-address rule for unicasting a response (spec §9's open
//! question: the reference source sent replies to the client MAC
//! interpreted as an IP string, which cannot be right — this follows
//! the RFC instead).

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use crate::model::Request;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

pub struct Networking {
	socket: UdpSocket,
}

impl Networking {
	pub fn bind(addr: Ipv4Addr, port: u16) -> std::io::Result<Self> {
		let socket = UdpSocket::bind(SocketAddrV4::new(addr, port))?;
		socket.set_broadcast(true)?;
		Ok(Self { socket })
	}

	pub fn try_clone(&self) -> std::io::Result<Self> {
		Ok(Self { socket: self.socket.try_clone()? })
	}

	pub fn socket(&self) -> &UdpSocket {
		&self.socket
	}
}

/// Picks where to unicast (or broadcast) the reply, per RFC 2131 §4.1:
///
/// - if `giaddr` is set, the reply goes to the relay at `giaddr:67`;
/// - else if the broadcast flag is set, or `ciaddr` is unspecified and
///   the client can't yet be addressed directly, broadcast to
///   255.255.255.255:68;
/// - else unicast to `ciaddr` (or the assigned `your_ip` for a fresh
///   lease) at port 68.
pub fn response_destination(request: &Request, your_ip: Ipv4Addr) -> SocketAddrV4 {
	if !request.giaddr.is_unspecified() {
		return SocketAddrV4::new(request.giaddr, SERVER_PORT);
	}

	if request.flags_broadcast || request.client_ip.is_none() {
		return SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT);
	}

	let target = request.client_ip.unwrap_or(your_ip);
	SocketAddrV4::new(target, CLIENT_PORT)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{MessageType, Mac};
	use std::collections::HashMap;

	fn base_request() -> Request {
		Request {
			message_type: MessageType::Discover,
			transaction_id: 1,
			client_mac: Mac::from_octets([1, 2, 3, 4, 5, 6]),
			requested_ip: None,
			client_ip: None,
			client_id: None,
			giaddr: Ipv4Addr::UNSPECIFIED,
			flags_broadcast: false,
			options: HashMap::new(),
		}
	}

	#[test]
	fn relay_address_wins_when_giaddr_set() {
		let mut request = base_request();
		request.giaddr = "10.0.0.1".parse().unwrap();

		let dest = response_destination(&request, "192.168.1.100".parse().unwrap());
		assert_eq!(dest, SocketAddrV4::new("10.0.0.1".parse().unwrap(), SERVER_PORT));
	}

	#[test]
	fn broadcasts_when_flag_set() {
		let mut request = base_request();
		request.flags_broadcast = true;

		let dest = response_destination(&request, "192.168.1.100".parse().unwrap());
		assert_eq!(dest, SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT));
	}

	#[test]
	fn broadcasts_when_no_giaddr_and_no_ciaddr() {
		let request = base_request();
		let dest = response_destination(&request, "192.168.1.100".parse().unwrap());
		assert_eq!(dest, SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT));
	}

	#[test]
	fn unicasts_to_ciaddr_when_present() {
		let mut request = base_request();
		request.client_ip = Some("192.168.1.50".parse().unwrap());

		let dest = response_destination(&request, "192.168.1.100".parse().unwrap());
		assert_eq!(dest, SocketAddrV4::new("192.168.1.50".parse().unwrap(), CLIENT_PORT));
	}
}
