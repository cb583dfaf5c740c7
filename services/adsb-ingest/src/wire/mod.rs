//! Wire-format decoders
//!
//! Three receiver encodings arrive on the ingest side: AVR hex lines,
//! BEAST byte-stuffed binary, and SBS1 CSV. Each maps to a [`WireFrame`]
//! that the decode stage consumes.

pub mod avr;
pub mod beast;
pub mod sbs1;

use chrono::{DateTime, Utc};

pub use beast::BeastDecoder;
pub use sbs1::Sbs1Update;

/// Which receiver encoding a frame arrived in. Drives sink queue routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    Avr,
    Beast,
    Sbs1,
}

impl WireProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireProtocol::Avr => "avr",
            WireProtocol::Beast => "beast",
            WireProtocol::Sbs1 => "sbs1",
        }
    }
}

/// A raw Mode S payload plus receiver-side metadata.
#[derive(Debug, Clone)]
pub struct RawModeS {
    pub payload: Vec<u8>,
    pub received: DateTime<Utc>,
    /// Receiver signal level in dBFS, when the wire format carries one.
    pub signal_rssi: Option<f64>,
    /// BEAST 12 MHz clock counter since receiver start.
    pub mlat_counter: Option<u64>,
}

/// One unit of ingest work.
#[derive(Debug, Clone)]
pub enum WireFrame {
    ModeS { raw: RawModeS, protocol: WireProtocol },
    /// 2-byte Mode A/C reply from a BEAST type-1 record; counted, not
    /// decoded further.
    ModeAc { received: DateTime<Utc> },
    Sbs1(Sbs1Update),
}
