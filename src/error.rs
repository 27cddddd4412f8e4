use thiserror::Error;

/// Communication failures the poll orchestrator has to branch on.
///
/// `NoData` and `NoHexData` downgrade a single parameter to the `no data`
/// sentinel; every other variant ends the current poll cycle.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The inverter stopped answering, even after re-running the handshake.
    #[error("no response from inverter after {attempts} attempts")]
    Timeout { attempts: usize },

    /// The register value is the literal `no data` reply.
    #[error("register reports no data")]
    NoData,

    /// The reply payload did not hex-decode; kept verbatim for diagnosis.
    #[error("reply is not hex: {raw:?}")]
    NoHexData { raw: String },

    #[error("crc mismatch: got {got}, calculated {calculated} from {data:?}")]
    Crc {
        got: String,
        calculated: String,
        data: String,
    },

    /// The device sent a structurally broken frame.
    #[error("malformed reply: {0}")]
    Malformed(String),
}

impl ReadError {
    pub fn is_missing_data(&self) -> bool {
        matches!(self, Self::NoData | Self::NoHexData { .. })
    }
}

/// A syntactically valid frame that could not be turned into a value.
#[derive(Debug, Error)]
#[error("can not decode {data_hex:?} for {parameter:?}: {reason}")]
pub struct DecodeError {
    pub parameter: String,
    pub data_hex: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{name} value {value} is less than {min}")]
    BelowMinimum { name: String, value: f64, min: f64 },

    #[error("{name} value {value} is greater than {max}")]
    AboveMaximum { name: String, value: f64, max: f64 },
}
