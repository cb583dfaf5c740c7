//! Typed Mode S frame model
//!
//! Frames decode into a tagged [`FrameBody`] per downlink-format/type-code
//! class, wrapped in the [`DecodedFrame`] surface the tracker consumes.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced while turning raw bytes into a [`DecodedFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("CRC mismatch on DF{df} frame")]
    CrcMismatch { df: u8 },
}

/// Downlink format metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfInfo {
    pub name: &'static str,
    pub bits: usize,
}

const DF_TABLE: &[(u8, DfInfo)] = &[
    (0, DfInfo { name: "Short air-air surveillance", bits: 56 }),
    (4, DfInfo { name: "Surveillance altitude reply", bits: 56 }),
    (5, DfInfo { name: "Surveillance identity reply", bits: 56 }),
    (11, DfInfo { name: "All-call reply", bits: 56 }),
    (16, DfInfo { name: "Long air-air surveillance", bits: 112 }),
    (17, DfInfo { name: "ADS-B extended squitter", bits: 112 }),
    (18, DfInfo { name: "TIS-B / ADS-R extended squitter", bits: 112 }),
    (20, DfInfo { name: "Comm-B altitude reply", bits: 112 }),
    (21, DfInfo { name: "Comm-B identity reply", bits: 112 }),
];

/// Look up downlink-format metadata. `None` for reserved/unsupported DFs.
pub fn df_info(df: u8) -> Option<&'static DfInfo> {
    DF_TABLE.iter().find(|(d, _)| *d == df).map(|(_, info)| info)
}

/// Altitude measurement unit. Metres appear when the AC field M-bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AltitudeUnit {
    #[default]
    Feet,
    Metres,
}

impl AltitudeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            AltitudeUnit::Feet => "feet",
            AltitudeUnit::Metres => "metres",
        }
    }
}

/// One half of a CPR position report, raw 17-bit coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CprPosition {
    pub odd: bool,
    pub lat: u32,
    pub lon: u32,
    pub surface: bool,
}

/// Where a vertical rate was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalRateSource {
    Barometric,
    Gnss,
}

/// What kind of speed a velocity message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedType {
    Ground,
    Ias,
    Tas,
}

/// Airframe dimensions from operational-status sub-type 1, in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirframeSize {
    pub length_m: f32,
    pub width_m: f32,
}

/// Decoded message payload, one variant per DF/TC class.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    /// DF 0/4/16/20: altitude-bearing surveillance replies.
    SurveillanceAltitude {
        altitude: Option<i32>,
        unit: AltitudeUnit,
    },
    /// DF 5/21: identity (squawk) replies.
    SurveillanceIdentity { squawk: u16 },
    /// DF 11: all-call reply, address acquisition only.
    AllCall { capability: u8 },
    /// DF 17/18 TC 1-4: callsign and emitter category.
    Identification {
        callsign: String,
        category: Option<&'static str>,
    },
    /// DF 17/18 TC 5-8: surface position with movement and ground track.
    SurfacePosition {
        speed_kt: Option<f64>,
        track: Option<f64>,
        cpr: CprPosition,
    },
    /// DF 17/18 TC 9-18 (barometric) and 20-22 (GNSS) airborne position.
    AirbornePosition {
        altitude: Option<i32>,
        unit: AltitudeUnit,
        surveillance_status: u8,
        cpr: CprPosition,
    },
    /// DF 17/18 TC 19: airborne velocity, all four sub-types.
    AirborneVelocity {
        velocity_kt: Option<f64>,
        heading: Option<f64>,
        speed_type: SpeedType,
        vertical_rate_fpm: Option<i32>,
        vertical_rate_source: VerticalRateSource,
        hae_delta_ft: Option<i32>,
    },
    /// DF 17/18 TC 28 sub 1: emergency / priority status.
    AircraftStatus {
        emergency: u8,
        special: &'static str,
    },
    /// DF 17/18 TC 31 sub 0/1: operational status.
    OperationalStatus {
        version: u8,
        nac_p: u8,
        sil: u8,
        airframe: Option<AirframeSize>,
    },
    /// Recognized frame with no tracker-relevant payload (TCAS RA, target
    /// state, test messages, unsupported TCs).
    Other,
}

/// Surface type the tracker consumes: common fields plus the typed body.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub icao: u32,
    pub df: u8,
    pub type_code: Option<u8>,
    pub sub_type: Option<u8>,
    pub timestamp: DateTime<Utc>,
    /// Populated from wire-level metadata by the ingest path.
    pub signal_rssi: Option<f64>,
    pub source_tag: String,
    pub raw: Vec<u8>,
    pub flight_status: Option<u8>,
    pub alert: bool,
    pub spi: bool,
    pub on_ground: Option<bool>,
    /// Set when the CRC check only passed after single-bit repair.
    pub corrected: bool,
    pub body: FrameBody,
}

impl DecodedFrame {
    pub fn icao_string(&self) -> String {
        format!("{:06X}", self.icao)
    }

    /// True for the extended-squitter formats carrying an ME field.
    pub fn is_extended(&self) -> bool {
        self.df == 17 || self.df == 18
    }
}

/// Flight status field meanings, DF 4/5/20/21.
pub fn flight_status_text(fs: u8) -> &'static str {
    match fs {
        0 => "Normal, Airborne",
        1 => "Normal, On the ground",
        2 => "ALERT, Airborne",
        3 => "ALERT, On the ground",
        4 => "ALERT, Special Position Identification. Airborne or Ground",
        5 => "Normal, Special Position Identification. Airborne or Ground",
        _ => "Value is not assigned",
    }
}

/// Emergency state from TC 28 sub-type 1.
pub fn emergency_text(state: u8) -> &'static str {
    match state {
        0 => "",
        1 => "General Emergency",
        2 => "Lifeguard/Medical",
        3 => "Minimum Fuel",
        4 => "No Communications",
        5 => "Unlawful Interference",
        6 => "Downed Aircraft",
        _ => "Reserved",
    }
}

/// Specials signalled through the pilot-set squawk code.
pub fn special_squawk(squawk: u16) -> Option<&'static str> {
    match squawk {
        7500 => Some("Unlawful Interference"),
        7600 => Some("No Communications"),
        7700 => Some("General Emergency"),
        _ => None,
    }
}

/// Emitter category class for identification messages.
///
/// TC 4 is category set A, TC 3 set B, TC 2 set C; TC 1 (set D) is
/// entirely reserved.
pub fn aircraft_category(tc: u8, ca: u8) -> Option<&'static str> {
    if ca == 0 {
        return None;
    }
    let label = match (tc, ca) {
        (4, 1) => "Light (< 15500 lbs)",
        (4, 2) => "Small (15500 to 75000 lbs)",
        (4, 3) => "Large (75000 to 300000 lbs)",
        (4, 4) => "High Vortex Large (aircraft such as B-757)",
        (4, 5) => "Heavy (> 300000 lbs)",
        (4, 6) => "High Performance (> 5g acceleration and 400 kts)",
        (4, 7) => "Rotorcraft",
        (3, 1) => "Glider / sailplane",
        (3, 2) => "Lighter-than-air",
        (3, 3) => "Parachutist / Skydiver",
        (3, 4) => "Ultralight / hang-glider / paraglider",
        (3, 6) => "Unmanned Aerial Vehicle",
        (3, 7) => "Space / Trans-atmospheric vehicle",
        (2, 1) => "Surface Vehicle - Emergency Vehicle",
        (2, 2) => "Surface Vehicle - Service Vehicle",
        (2, 3) => "Point Obstacle (includes tethered balloons)",
        (2, 4) => "Cluster Obstacle",
        (2, 5) => "Line Obstacle",
        _ => return None,
    };
    Some(label)
}

/// Airframe length/width in metres, operational-status sub-type 1 code.
pub fn airframe_size(code: u8) -> Option<AirframeSize> {
    let (length_m, width_m) = match code {
        1 => (15.0, 23.0),
        2 => (25.0, 28.5),
        3 => (25.0, 34.0),
        4 => (35.0, 33.0),
        5 => (35.0, 38.0),
        6 => (45.0, 39.5),
        7 => (45.0, 45.0),
        8 => (55.0, 45.0),
        9 => (55.0, 52.0),
        10 => (65.0, 59.5),
        11 => (65.0, 67.0),
        12 => (75.0, 72.5),
        13 => (75.0, 80.0),
        14 => (85.0, 80.0),
        15 => (85.0, 90.0),
        _ => return None,
    };
    Some(AirframeSize { length_m, width_m })
}
