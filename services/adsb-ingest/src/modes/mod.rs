//! Mode S frame decoding
//!
//! Bit-level protocol work lives here: CRC integrity with address overlay
//! recovery, downlink-format dispatch, and the DF17/18 extended-squitter
//! sub-decoders.

pub mod crc;
pub mod decode;
pub mod roster;
pub mod types;

pub use decode::decode;
pub use roster::IcaoRoster;
pub use types::{
    AirframeSize, AltitudeUnit, CprPosition, DecodeError, DecodedFrame, FrameBody, SpeedType,
    VerticalRateSource,
};
