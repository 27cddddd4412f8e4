use crate::prelude::*;

use num_enum::FromPrimitive;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::definitions::Parameter;
use crate::frame::NO_DATA;

/// How a parameter's raw register payload becomes a value; selected by the
/// definition file's `rule` tag. Unknown rules fall back to `Raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum ParserKind {
    Single = 1,
    SwappedDouble = 3,
    Text = 5,
    #[num_enum(default)]
    Raw = 0,
}

/// A decoded register value. Serializes untagged so MQTT state payloads carry
/// plain JSON numbers and strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn no_data() -> Self {
        Self::Text(NO_DATA.to_string())
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::Text(text) if text == NO_DATA)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Text(_) => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn decode_error(parameter: &Parameter, data_hex: &str, reason: String) -> DecodeError {
    DecodeError {
        parameter: parameter.name.clone(),
        data_hex: data_hex.to_string(),
        reason,
    }
}

/// Big-endian integer from hex, minus offset, times scale, rounded to two
/// decimals.
fn scaled_number(parameter: &Parameter, data_hex: &str) -> Result<f64, DecodeError> {
    let bytes = hex::decode(data_hex)
        .map_err(|err| decode_error(parameter, data_hex, format!("not hex: {err}")))?;
    let raw = bytes.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));

    let mut number = raw as f64;
    if let Some(offset) = parameter.offset {
        number -= offset as f64;
    }
    number *= parameter.scale;
    Ok(round2(number))
}

fn lookup_value(lookup: &HashMap<i64, String>, number: f64) -> CellValue {
    if number.fract() == 0.0 {
        if let Some(text) = lookup.get(&(number as i64)) {
            return CellValue::Text(text.clone());
        }
    }
    CellValue::Text(format!("<unknown lookup: {number}>"))
}

fn decode_single(parameter: &Parameter, data_hex: &str) -> Result<CellValue, DecodeError> {
    if data_hex.len() != 4 {
        return Err(decode_error(
            parameter,
            data_hex,
            format!("expected 4 hex chars, got {}", data_hex.len()),
        ));
    }

    let number = scaled_number(parameter, data_hex)?;
    if let Some(lookup) = &parameter.lookup {
        return Ok(lookup_value(lookup, number));
    }
    Ok(CellValue::Number(number))
}

fn decode_swapped_double(parameter: &Parameter, data_hex: &str) -> Result<CellValue, DecodeError> {
    let swapped = match data_hex.len() {
        8 => format!("{}{}", &data_hex[4..], &data_hex[..4]),
        // Some definitions declare a double register but the device answers
        // with a single one; taken as-is.
        4 => data_hex.to_string(),
        len => {
            return Err(decode_error(
                parameter,
                data_hex,
                format!("expected 8 hex chars, got {len}"),
            ))
        }
    };
    Ok(CellValue::Number(scaled_number(parameter, &swapped)?))
}

/// Convert a raw hex register payload into a typed value, per the parameter's
/// parser kind.
pub fn decode(parameter: &Parameter, data_hex: &str) -> Result<CellValue, DecodeError> {
    debug!("Decode {:?} with {:?}", data_hex, parameter.parser);
    match parameter.parser {
        ParserKind::Single => decode_single(parameter, data_hex),
        ParserKind::SwappedDouble => decode_swapped_double(parameter, data_hex),
        ParserKind::Text => Ok(CellValue::Text(data_hex.to_string())),
        ParserKind::Raw => {
            debug!("Raw payload for {:?}: {:?}", parameter.name, data_hex);
            Ok(CellValue::Text(format!("<raw: {data_hex}>")))
        }
    }
}
