use crate::prelude::*;

use bytes::{BufMut, BytesMut};
use nom::bytes::complete::{tag, take_until};
use nom::combinator::rest;
use nom::sequence::separated_pair;

pub const SLAVE_ID: u8 = 1;
pub const READ_FUNCTION: u8 = 0x03;
/// The firmware wants the multi-register write function as decimal 10 on the
/// wire, not the Modbus 0x10.
pub const WRITE_FUNCTION: u8 = 10;

/// Literal payload the device sends for a register without a value.
pub const NO_DATA: &str = "no data";

/// An AT reply with the control framing stripped, split at the first `=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub prefix: String,
    pub data: String,
}

/// A CRC-verified register reply, payload trimmed to the declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub slave_id: u8,
    pub function: u8,
    pub data_hex: String,
}

pub fn crc16(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

fn finish_frame(mut frame: BytesMut) -> Vec<u8> {
    // all fields are big-endian, but the CRC trailer is little-endian
    let crc = crc16(&frame);
    frame.put_u16_le(crc);
    frame.to_vec()
}

/// Read request for `length` registers starting at `start_register`.
pub fn build_read_frame(start_register: u16, length: u16) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(8);
    frame.put_u8(SLAVE_ID);
    frame.put_u8(READ_FUNCTION);
    frame.put_u16(start_register);
    frame.put_u16(length);
    finish_frame(frame)
}

/// Write request putting `values` into consecutive registers at `start_register`.
pub fn build_write_frame(start_register: u16, values: &[u16]) -> Vec<u8> {
    let length = values.len() as u16;
    let mut frame = BytesMut::with_capacity(10 + 2 * values.len());
    frame.put_u8(SLAVE_ID);
    frame.put_u8(WRITE_FUNCTION);
    frame.put_u16(start_register);
    frame.put_u16(length);
    frame.put_u16(length * 2);
    for value in values {
        frame.put_u16(*value);
    }
    finish_frame(frame)
}

/// Wrap a binary frame into the body of the device's `INVDATA` AT command.
pub fn to_at_command(frame: &[u8]) -> String {
    format!("INVDATA={},{}", frame.len(), hex::encode(frame))
}

fn split_reply(line: &str) -> nom::IResult<&str, (&str, &str)> {
    separated_pair(take_until("="), tag("="), rest)(line)
}

/// Decode a raw reply datagram into prefix and data.
///
/// The device terminates lines with CRLF and sprinkles 0x10 framing bytes
/// through the payload; both are stripped before splitting at the first `=`.
/// A bare `+ok` (the reply to a write of `+ok` itself, or to commands without
/// a result) comes without any `=`.
pub fn parse_response(data: &[u8]) -> Result<RawResponse> {
    debug!("parse_response({:?})", data);
    let line = std::str::from_utf8(data)
        .map_err(|err| anyhow!("reply is not ASCII: {:?}: {}", data, err))?;
    let line: String = line
        .trim_end_matches(['\r', '\n'])
        .chars()
        .filter(|&c| c != '\x10')
        .collect();

    if line == "+ok" {
        return Ok(RawResponse {
            prefix: line,
            data: String::new(),
        });
    }

    let (_, (prefix, data)) =
        split_reply(&line).map_err(|err| anyhow!("unparseable reply {:?}: {}", line, err))?;

    Ok(RawResponse {
        prefix: prefix.to_string(),
        data: data.to_string(),
    })
}

/// Verify and unwrap the hex-encoded register reply carried in an `INVDATA`
/// response body.
pub fn parse_modbus_response(data: &str) -> Result<ModbusResponse, ReadError> {
    debug!("parse_modbus_response({:?})", data);
    if data == NO_DATA {
        return Err(ReadError::NoData);
    }

    let data_bytes = hex::decode(data).map_err(|err| {
        warn!("Reply {:?} is not hex: {}", data, err);
        ReadError::NoHexData {
            raw: data.to_string(),
        }
    })?;

    if data_bytes.len() < 5 {
        return Err(ReadError::Malformed(format!("reply too short: {data:?}")));
    }

    let (body, got_crc) = data_bytes.split_at(data_bytes.len() - 2);
    let calculated_crc = crc16(body).to_le_bytes();
    if got_crc != calculated_crc {
        return Err(ReadError::Crc {
            got: hex::encode(got_crc),
            calculated: hex::encode(calculated_crc),
            data: data.to_string(),
        });
    }

    let declared_len = body[2] as usize;
    let payload = &body[3..];
    if payload.len() != declared_len {
        return Err(ReadError::Malformed(format!(
            "payload is {} bytes but header declares {}: {:?}",
            payload.len(),
            declared_len,
            data
        )));
    }

    Ok(ModbusResponse {
        slave_id: body[0],
        function: body[1],
        data_hex: hex::encode(payload),
    })
}
