//! SBS1 (BaseStation) CSV decoding
//!
//! 22 comma-separated fields per line. Unlike AVR/BEAST this format has
//! already been through a decoder, so it yields altitude, squawk, callsign
//! and lat/lon directly with no CPR work.

use chrono::{DateTime, Utc};

use crate::modes::DecodeError;

/// A position-ish update parsed from one SBS1 `MSG` line.
#[derive(Debug, Clone)]
pub struct Sbs1Update {
    pub icao: u32,
    pub transmission_type: u8,
    pub received: DateTime<Utc>,
    pub raw: String,
    pub callsign: Option<String>,
    pub altitude_ft: Option<i32>,
    pub ground_speed_kt: Option<f64>,
    pub track: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub squawk: Option<u16>,
    pub alert: bool,
    pub emergency: bool,
    pub spi: bool,
    pub on_ground: Option<bool>,
}

fn opt_field<T: std::str::FromStr>(fields: &[&str], index: usize) -> Option<T> {
    fields.get(index).and_then(|s| s.trim().parse().ok())
}

fn flag_field(fields: &[&str], index: usize) -> Option<bool> {
    match fields.get(index).map(|s| s.trim()) {
        Some("1") | Some("-1") => Some(true),
        Some("0") => Some(false),
        _ => None,
    }
}

/// Parse one SBS1 line received at `received`.
pub fn parse_line(line: &str, received: DateTime<Utc>) -> Result<Sbs1Update, DecodeError> {
    let line = line.trim();
    let fields: Vec<&str> = line.split(',').collect();

    if fields.first() != Some(&"MSG") {
        return Err(DecodeError::MalformedFrame("SBS1 line is not a MSG record"));
    }
    if fields.len() < 11 {
        return Err(DecodeError::MalformedFrame("SBS1 line has too few fields"));
    }

    let transmission_type: u8 = fields[1]
        .trim()
        .parse()
        .map_err(|_| DecodeError::MalformedFrame("SBS1 transmission type is not numeric"))?;
    if !(1..=8).contains(&transmission_type) {
        return Err(DecodeError::MalformedFrame("SBS1 transmission type out of range"));
    }

    let icao = u32::from_str_radix(fields[4].trim(), 16)
        .map_err(|_| DecodeError::MalformedFrame("SBS1 ICAO is not hex"))?;

    let callsign = fields
        .get(10)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Ok(Sbs1Update {
        icao,
        transmission_type,
        received,
        raw: line.to_string(),
        callsign,
        altitude_ft: opt_field(&fields, 11),
        ground_speed_kt: opt_field(&fields, 12),
        track: opt_field(&fields, 13),
        latitude: opt_field(&fields, 14),
        longitude: opt_field(&fields, 15),
        vertical_rate_fpm: opt_field(&fields, 16),
        squawk: opt_field(&fields, 17),
        alert: flag_field(&fields, 18).unwrap_or(false),
        emergency: flag_field(&fields, 19).unwrap_or(false),
        spi: flag_field(&fields, 20).unwrap_or(false),
        on_ground: flag_field(&fields, 21),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    const MSG3: &str = "MSG,3,1,1,7C6B28,1,2023/01/01,00:00:00.000,2023/01/01,00:00:00.000,,37000,,,-33.9461,151.1772,,,0,0,0,0";
    const MSG1: &str = "MSG,1,1,1,7C6B28,1,2023/01/01,00:00:00.000,2023/01/01,00:00:00.000,QFA1   ,,,,,,,,,,,";
    const MSG4: &str = "MSG,4,1,1,7C6B28,1,2023/01/01,00:00:00.000,2023/01/01,00:00:00.000,,,412.3,270.5,,,-1216,,,,,";

    #[test]
    fn position_message() {
        let update = parse_line(MSG3, now()).unwrap();
        assert_eq!(update.icao, 0x7C6B28);
        assert_eq!(update.transmission_type, 3);
        assert_eq!(update.altitude_ft, Some(37000));
        assert_eq!(update.latitude, Some(-33.9461));
        assert_eq!(update.longitude, Some(151.1772));
        assert_eq!(update.on_ground, Some(false));
        assert!(update.callsign.is_none());
    }

    #[test]
    fn callsign_message_trims_padding() {
        let update = parse_line(MSG1, now()).unwrap();
        assert_eq!(update.callsign.as_deref(), Some("QFA1"));
        assert!(update.latitude.is_none());
    }

    #[test]
    fn velocity_message() {
        let update = parse_line(MSG4, now()).unwrap();
        assert_eq!(update.ground_speed_kt, Some(412.3));
        assert_eq!(update.track, Some(270.5));
        assert_eq!(update.vertical_rate_fpm, Some(-1216));
    }

    #[test]
    fn rejects_non_msg_lines() {
        assert!(parse_line("SEL,,1,1,7C6B28,1", now()).is_err());
        assert!(parse_line("", now()).is_err());
        assert!(parse_line("MSG,9,1,1,7C6B28,1,,,,,,", now()).is_err());
        assert!(parse_line("MSG,3,1,1,ZZZZZZ,1,,,,,,", now()).is_err());
    }

    #[test]
    fn squawk_and_flags() {
        let line = "MSG,6,1,1,7C6B28,1,2023/01/01,00:00:00.000,2023/01/01,00:00:00.000,,,,,,,,7700,1,1,0,0";
        let update = parse_line(line, now()).unwrap();
        assert_eq!(update.squawk, Some(7700));
        assert!(update.alert);
        assert!(update.emergency);
        assert!(!update.spi);
    }
}
