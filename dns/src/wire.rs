//! Bidirectional codec for RFC 1035 wire messages (spec §4.1): 12-byte
//! header, one question, three resource-record sections, with
//! compression-pointer decoding on the read side.
//!
//! The header's flag word is a textbook bitfield, so it's packed with
//! `bilge` the way the teacher packs its own DNS header flags in
//! `net/src/dns/mod.rs::Flags` — same field layout (rcode low, qr high),
//! just without that module's zero-copy `Cast` overlay, since these
//! buffers are plain heap `Vec<u8>` shared across worker threads rather
//! than arena slices owned by a single-threaded actor.

use bilge::prelude::*;

use crate::error::ParseError;
use crate::message::{Class, Query, RecordType, Response, Transport};

const HEADER_LEN: usize = 12;
const MAX_JUMPS: u8 = 10;
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

#[bitsize(16)]
#[derive(FromBits, Clone, Copy)]
struct Flags {
	rcode: u4,
	z: u3,
	ra: bool,
	rd: bool,
	tc: bool,
	aa: bool,
	opcode: u4,
	qr: bool,
}

struct Header {
	id: u16,
	flags: Flags,
	qdcount: u16,
	ancount: u16,
	nscount: u16,
	arcount: u16,
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16, ParseError> {
	let b = bytes.get(pos..pos + 2).ok_or(ParseError::ShortMessage)?;
	Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32, ParseError> {
	let b = bytes.get(pos..pos + 4).ok_or(ParseError::ShortMessage)?;
	Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_header(bytes: &[u8]) -> Result<Header, ParseError> {
	if bytes.len() < HEADER_LEN {
		return Err(ParseError::ShortMessage);
	}

	let id = read_u16(bytes, 0)?;
	let raw_flags = read_u16(bytes, 2)?;
	let flags = Flags::from(raw_flags);

	Ok(Header {
		id,
		flags,
		qdcount: read_u16(bytes, 4)?,
		ancount: read_u16(bytes, 6)?,
		nscount: read_u16(bytes, 8)?,
		arcount: read_u16(bytes, 10)?,
	})
}

fn write_header(buf: &mut Vec<u8>, id: u16, flags: Flags, qdcount: u16, ancount: u16, nscount: u16, arcount: u16) {
	buf.extend_from_slice(&id.to_be_bytes());
	buf.extend_from_slice(&u16::from(flags).to_be_bytes());
	buf.extend_from_slice(&qdcount.to_be_bytes());
	buf.extend_from_slice(&ancount.to_be_bytes());
	buf.extend_from_slice(&nscount.to_be_bytes());
	buf.extend_from_slice(&arcount.to_be_bytes());
}

/// Decodes a (possibly compressed) name starting at `*pos`, advancing
/// `*pos` past the name as it was encoded at the call site (i.e. past
/// the first pointer if one was followed, not past whatever the pointer
/// led to).
fn decode_name(bytes: &[u8], pos: &mut usize) -> Result<String, ParseError> {
	let mut labels: Vec<String> = Vec::new();
	let mut cursor = *pos;
	let mut jumps = 0u8;
	let mut resume_at: Option<usize> = None;
	let mut total_len = 0usize;

	loop {
		let len_byte = *bytes.get(cursor).ok_or(ParseError::ShortMessage)?;

		if len_byte & 0xC0 == 0xC0 {
			jumps += 1;
			if jumps > MAX_JUMPS {
				return Err(ParseError::CompressionLoop);
			}

			let lo = *bytes.get(cursor + 1).ok_or(ParseError::ShortMessage)?;
			let offset = (((len_byte & 0x3F) as usize) << 8) | lo as usize;

			if offset >= bytes.len() {
				return Err(ParseError::InvalidName);
			}

			if resume_at.is_none() {
				resume_at = Some(cursor + 2);
			}

			cursor = offset;
			continue;
		}

		if len_byte & 0xC0 != 0 {
			// 0b01 or 0b10: reserved label-length encodings, unsupported.
			return Err(ParseError::InvalidLabel(len_byte));
		}

		total_len += 1;
		if total_len > MAX_NAME_LEN {
			return Err(ParseError::NameTooLong);
		}

		let len = len_byte as usize;

		if len == 0 {
			if resume_at.is_none() {
				resume_at = Some(cursor + 1);
			}
			break;
		}

		if len > MAX_LABEL_LEN {
			return Err(ParseError::InvalidLabel(len_byte));
		}

		let start = cursor + 1;
		let label = bytes.get(start..start + len).ok_or(ParseError::ShortMessage)?;
		labels.push(String::from_utf8_lossy(label).into_owned());

		total_len += len;
		if total_len > MAX_NAME_LEN {
			return Err(ParseError::NameTooLong);
		}

		cursor = start + len;
	}

	*pos = resume_at.expect("loop always sets resume_at before breaking or erroring");

	if labels.is_empty() {
		Ok(".".to_owned())
	} else {
		let mut name = labels.join(".");
		name.push('.');
		Ok(name)
	}
}

/// Encodes `name` with length-prefixed labels and a terminating zero
/// octet. No compression is ever emitted (spec §4.1's "no compression on
/// output").
fn encode_name(buf: &mut Vec<u8>, name: &str) -> Result<(), ParseError> {
	let mut total_len = 0usize;

	for label in name.trim_end_matches('.').split('.').filter(|l| !l.is_empty()) {
		let bytes = label.as_bytes();

		if bytes.len() > MAX_LABEL_LEN {
			return Err(ParseError::InvalidLabel(bytes.len() as u8));
		}

		total_len += 1 + bytes.len();
		if total_len > MAX_NAME_LEN {
			return Err(ParseError::NameTooLong);
		}

		buf.push(bytes.len() as u8);
		buf.extend_from_slice(bytes);
	}

	total_len += 1;
	if total_len > MAX_NAME_LEN {
		return Err(ParseError::NameTooLong);
	}

	buf.push(0);
	Ok(())
}

struct RawQuestion {
	name: String,
	qtype: u16,
	qclass: u16,
}

fn decode_question(bytes: &[u8], pos: &mut usize) -> Result<RawQuestion, ParseError> {
	let name = decode_name(bytes, pos)?;
	let qtype = read_u16(bytes, *pos)?;
	let qclass = read_u16(bytes, *pos + 2)?;
	*pos += 4;
	Ok(RawQuestion { name, qtype, qclass })
}

fn encode_question(buf: &mut Vec<u8>, name: &str, qtype: u16, qclass: u16) -> Result<(), ParseError> {
	encode_name(buf, name)?;
	buf.extend_from_slice(&qtype.to_be_bytes());
	buf.extend_from_slice(&qclass.to_be_bytes());
	Ok(())
}

fn decode_record(bytes: &[u8], pos: &mut usize) -> Result<crate::message::Record, ParseError> {
	let name = decode_name(bytes, pos)?;
	let rtype = read_u16(bytes, *pos)?;
	let rclass = read_u16(bytes, *pos + 2)?;
	let ttl = read_u32(bytes, *pos + 4)?;
	let rdlength = read_u16(bytes, *pos + 8)? as usize;
	*pos += 10;

	let rdata = bytes.get(*pos..*pos + rdlength).ok_or(ParseError::ShortMessage)?.to_vec();
	*pos += rdlength;

	Ok(crate::message::Record {
		name,
		rtype: RecordType::from(rtype),
		rclass: Class::from(rclass),
		ttl,
		rdata,
	})
}

fn encode_record(buf: &mut Vec<u8>, record: &crate::message::Record) -> Result<(), ParseError> {
	encode_name(buf, &record.name)?;
	buf.extend_from_slice(&record.rtype.as_u16().to_be_bytes());
	buf.extend_from_slice(&record.rclass.as_u16().to_be_bytes());
	buf.extend_from_slice(&record.ttl.to_be_bytes());

	let rdlength: u16 = record.rdata.len().try_into().map_err(|_| ParseError::InvalidHeader)?;
	buf.extend_from_slice(&rdlength.to_be_bytes());
	buf.extend_from_slice(&record.rdata);
	Ok(())
}

/// Parses an inbound query. Rejects anything with the QR bit set or
/// `qdcount != 1` (spec §4.1). The returned [`Query`] has `client` unset
/// and `transport` defaulted to UDP — the server annotates both after
/// parsing, per spec §4.4.
pub fn parse_query(bytes: &[u8]) -> Result<Query, ParseError> {
	let header = read_header(bytes)?;

	if header.flags.qr() {
		return Err(ParseError::InvalidQuery);
	}

	if header.qdcount != 1 {
		return Err(ParseError::InvalidQuery);
	}

	let mut pos = HEADER_LEN;
	let q = decode_question(bytes, &mut pos)?;

	Ok(Query {
		id: header.id,
		question: crate::message::Question::new(q.name, RecordType::from(q.qtype), Class::from(q.qclass)),
		client: None,
		transport: Transport::Udp,
	})
}

/// Parses a response message: header, one question, then
/// `ancount + nscount + arcount` records in order.
pub fn parse_response(bytes: &[u8]) -> Result<Response, ParseError> {
	let header = read_header(bytes)?;

	let mut pos = HEADER_LEN;

	if header.qdcount != 1 {
		return Err(ParseError::InvalidHeader);
	}

	let q = decode_question(bytes, &mut pos)?;
	let question = crate::message::Question::new(q.name, RecordType::from(q.qtype), Class::from(q.qclass));

	let mut answers = Vec::with_capacity(header.ancount as usize);
	for _ in 0..header.ancount {
		answers.push(decode_record(bytes, &mut pos)?);
	}

	let mut authorities = Vec::with_capacity(header.nscount as usize);
	for _ in 0..header.nscount {
		authorities.push(decode_record(bytes, &mut pos)?);
	}

	let mut additional = Vec::with_capacity(header.arcount as usize);
	for _ in 0..header.arcount {
		additional.push(decode_record(bytes, &mut pos)?);
	}

	Ok(Response {
		id: header.id,
		question,
		answers,
		authorities,
		additional,
		rcode: header.flags.rcode().value().into(),
		cached: false,
		elapsed: std::time::Duration::ZERO,
	})
}

/// Serializes a query with the RD bit set, `qdcount=1` and the other
/// counts zero, no compression.
pub fn serialize_query(query: &Query) -> Result<Vec<u8>, ParseError> {
	let mut buf = Vec::with_capacity(32);

	let flags = Flags::new(u4::new(0), u3::new(0), false, true, false, false, u4::new(0), false);
	write_header(&mut buf, query.id, flags, 1, 0, 0, 0);

	encode_question(&mut buf, &query.question.name, query.question.qtype.as_u16(), query.question.qclass.as_u16())?;

	Ok(buf)
}

/// Serializes a response with `QR=1`, `RA=1`, `AA` set only when
/// `rcode == NoError` and there is at least one answer.
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, ParseError> {
	let mut buf = Vec::with_capacity(64);

	let aa = response.rcode.is_success() && !response.answers.is_empty();
	let rcode = u4::new(response.rcode.as_u8() & 0x0f);

	let flags = Flags::new(rcode, u3::new(0), true, false, false, aa, u4::new(0), true);

	write_header(
		&mut buf,
		response.id,
		flags,
		1,
		response.answers.len() as u16,
		response.authorities.len() as u16,
		response.additional.len() as u16,
	);

	encode_question(
		&mut buf,
		&response.question.name,
		response.question.qtype.as_u16(),
		response.question.qclass.as_u16(),
	)?;

	for record in response.answers.iter().chain(&response.authorities).chain(&response.additional) {
		encode_record(&mut buf, record)?;
	}

	Ok(buf)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::{Class, Question, RecordType};

	fn sample_query(id: u16, name: &str) -> Query {
		Query {
			id,
			question: Question::new(name, RecordType::A, Class::In),
			client: None,
			transport: Transport::Udp,
		}
	}

	#[test]
	fn query_round_trips_id_name_type_class() {
		let q = sample_query(0x1234, "example.com.");
		let bytes = serialize_query(&q).unwrap();
		let parsed = parse_query(&bytes).unwrap();

		assert_eq!(parsed.id, q.id);
		assert_eq!(parsed.question.name, q.question.name);
		assert_eq!(parsed.question.qtype, q.question.qtype);
		assert_eq!(parsed.question.qclass, q.question.qclass);
	}

	#[test]
	fn response_round_trips_records() {
		let question = Question::new("test.local.", RecordType::A, Class::In);
		let response = Response {
			id: 7,
			question: question.clone(),
			answers: vec![crate::message::Record {
				name: "test.local.".to_owned(),
				rtype: RecordType::A,
				rclass: Class::In,
				ttl: 60,
				rdata: vec![10, 0, 0, 1],
			}],
			authorities: Vec::new(),
			additional: Vec::new(),
			rcode: crate::message::ResponseCode::NoError,
			cached: false,
			elapsed: std::time::Duration::ZERO,
		};

		let bytes = serialize_response(&response).unwrap();
		let parsed = parse_response(&bytes).unwrap();

		assert_eq!(parsed.answers.len(), 1);
		assert_eq!(parsed.answers[0].name, "test.local.");
		assert_eq!(parsed.answers[0].rtype, RecordType::A);
		assert_eq!(parsed.answers[0].rclass, Class::In);
		assert_eq!(parsed.answers[0].ttl, 60);
		assert_eq!(parsed.answers[0].rdata, vec![10, 0, 0, 1]);
	}

	#[test]
	fn rejects_short_messages() {
		assert_eq!(parse_query(&[0u8; 4]), Err(ParseError::ShortMessage));
	}

	#[test]
	fn rejects_response_bit_set_in_query() {
		let mut bytes = serialize_query(&sample_query(1, "x.")).unwrap();
		bytes[2] |= 0x80; // set QR
		assert_eq!(parse_query(&bytes), Err(ParseError::InvalidQuery));
	}

	#[test]
	fn label_length_boundary() {
		let ok = "a".repeat(63);
		let mut buf = Vec::new();
		assert!(encode_name(&mut buf, &format!("{ok}.")).is_ok());

		let too_long = "a".repeat(64);
		let mut buf = Vec::new();
		assert_eq!(encode_name(&mut buf, &format!("{too_long}.")), Err(ParseError::InvalidLabel(64)));
	}

	#[test]
	fn name_length_boundary() {
		// 3 labels of 63 plus one of 61 plus dots = 255 octets total on the wire.
		let labels = ["a".repeat(63), "a".repeat(63), "a".repeat(63), "a".repeat(61)];
		let name = format!("{}.", labels.join("."));

		let mut buf = Vec::new();
		assert!(encode_name(&mut buf, &name).is_ok());

		let too_long = format!("{}.{}.", labels.join("."), "a");
		let mut buf = Vec::new();
		assert_eq!(encode_name(&mut buf, &too_long), Err(ParseError::NameTooLong));
	}

	#[test]
	fn compression_pointer_resolves() {
		// Build a response where the answer's name is a pointer back to the question name.
		let mut buf = Vec::new();
		let flags = Flags::new(u4::new(0), u3::new(0), true, false, false, true, u4::new(0), true);
		write_header(&mut buf, 9, flags, 1, 1, 0, 0);

		let question_name_offset = buf.len();
		encode_question(&mut buf, "example.com.", 1, 1).unwrap();

		// Answer record: name is a pointer to the question's name.
		buf.push(0xC0);
		buf.push(question_name_offset as u8);
		buf.extend_from_slice(&1u16.to_be_bytes()); // type A
		buf.extend_from_slice(&1u16.to_be_bytes()); // class IN
		buf.extend_from_slice(&300u32.to_be_bytes()); // ttl
		buf.extend_from_slice(&4u16.to_be_bytes()); // rdlength
		buf.extend_from_slice(&[192, 0, 2, 1]);

		let parsed = parse_response(&buf).unwrap();
		assert_eq!(parsed.answers[0].name, "example.com.");
		assert_eq!(parsed.answers[0].rdata, vec![192, 0, 2, 1]);
	}

	#[test]
	fn compression_loop_detected() {
		let mut buf = vec![0u8; HEADER_LEN];
		// Two mutually pointing pointers right after the header.
		buf.extend_from_slice(&[0xC0, (HEADER_LEN + 2) as u8]);
		buf.extend_from_slice(&[0xC0, HEADER_LEN as u8]);

		let mut pos = HEADER_LEN;
		assert_eq!(decode_name(&buf, &mut pos), Err(ParseError::CompressionLoop));
	}
}
