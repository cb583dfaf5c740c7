//! Mode S bit-field decoding
//!
//! Turns a 7- or 14-byte Mode S payload into a [`DecodedFrame`]. The first
//! 5 bits select the downlink format; DF17/18 carry a 56-bit ME field
//! dispatched on its type code.

use chrono::{DateTime, Utc};

use super::crc;
use super::roster::IcaoRoster;
use super::types::*;

/// 6-bit callsign character set for identification messages.
const AIS_CHARSET: &[u8; 64] =
    b"?ABCDEFGHIJKLMNOPQRSTUVWXYZ????? ???????????????0123456789??????";

/// Downlink formats whose trailer is the plain CRC and whose ICAO is the
/// AA field.
const DF_PLAIN_CRC: &[u8] = &[11, 17, 18];

/// Decode one Mode S payload received at `timestamp`.
///
/// `roster` vouches for addresses recovered from overlay-CRC formats;
/// zero-residual frames register their address with it.
pub fn decode(
    payload: &[u8],
    timestamp: DateTime<Utc>,
    roster: &IcaoRoster,
) -> Result<DecodedFrame, DecodeError> {
    if payload.len() != 7 && payload.len() != 14 {
        return Err(DecodeError::MalformedFrame("payload must be 7 or 14 bytes"));
    }

    let df = (payload[0] >> 3) & 0x1F;
    let info = df_info(df).ok_or(DecodeError::MalformedFrame("reserved downlink format"))?;
    if info.bits != payload.len() * 8 {
        return Err(DecodeError::MalformedFrame(
            "payload length does not match downlink format",
        ));
    }

    let mut raw = payload.to_vec();
    let mut corrected = false;

    let icao = if DF_PLAIN_CRC.contains(&df) {
        if crc::residual(&raw) != 0 {
            // Single-bit brute force only where the CRC alone can prove the
            // repair; overlay formats cannot be repaired this way.
            if df == 11 || crc::repair_single_bit(&mut raw).is_none() {
                return Err(DecodeError::CrcMismatch { df });
            }
            corrected = true;
        }
        let icao = ((raw[1] as u32) << 16) | ((raw[2] as u32) << 8) | raw[3] as u32;
        roster.register(icao, timestamp);
        icao
    } else {
        // DF 0/4/5/16/20/21: the trailer is CRC XOR address. The residual
        // is only trusted when the roster has seen the address recently.
        let candidate = crc::residual(&raw);
        if candidate == 0 || !roster.contains(candidate, timestamp) {
            return Err(DecodeError::CrcMismatch { df });
        }
        candidate
    };

    let mut frame = DecodedFrame {
        icao,
        df,
        type_code: None,
        sub_type: None,
        timestamp,
        signal_rssi: None,
        source_tag: String::new(),
        raw,
        flight_status: None,
        alert: false,
        spi: false,
        on_ground: None,
        corrected,
        body: FrameBody::Other,
    };

    match df {
        0 | 16 => {
            // VS bit: 1 = on the ground.
            frame.on_ground = Some((frame.raw[0] >> 2) & 1 == 1);
            let ac = ac13_field(&frame.raw);
            let (altitude, unit) = decode_ac13(ac);
            frame.body = FrameBody::SurveillanceAltitude { altitude, unit };
        }
        4 | 5 | 20 | 21 => {
            let fs = frame.raw[0] & 0x07;
            frame.flight_status = Some(fs);
            frame.alert = matches!(fs, 2 | 3 | 4);
            frame.spi = matches!(fs, 4 | 5);
            frame.on_ground = match fs {
                0 | 2 => Some(false),
                1 | 3 => Some(true),
                _ => None,
            };
            if df == 4 || df == 20 {
                let (altitude, unit) = decode_ac13(ac13_field(&frame.raw));
                frame.body = FrameBody::SurveillanceAltitude { altitude, unit };
            } else {
                let squawk = decode_id13(ac13_field(&frame.raw));
                frame.body = FrameBody::SurveillanceIdentity { squawk };
            }
        }
        11 => {
            let ca = frame.raw[0] & 0x07;
            frame.on_ground = ground_hint(ca);
            frame.body = FrameBody::AllCall { capability: ca };
        }
        17 | 18 => {
            let ca = frame.raw[0] & 0x07;
            frame.on_ground = ground_hint(ca);
            decode_extended_squitter(&mut frame)?;
        }
        _ => unreachable!("df_info filtered unsupported formats"),
    }

    Ok(frame)
}

/// Capability field ground/airborne hint (DF11/17).
fn ground_hint(ca: u8) -> Option<bool> {
    match ca {
        4 => Some(true),
        5 => Some(false),
        _ => None,
    }
}

/// 13-bit AC/ID field from bytes 2-3.
fn ac13_field(raw: &[u8]) -> u16 {
    ((raw[2] as u16 & 0x1F) << 8) | raw[3] as u16
}

/// ME field (bytes 4-10) as the low 56 bits of a u64.
fn me_bits(raw: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[1..8].copy_from_slice(&raw[4..11]);
    u64::from_be_bytes(buf)
}

fn decode_extended_squitter(frame: &mut DecodedFrame) -> Result<(), DecodeError> {
    let bits = me_bits(&frame.raw);
    let tc = ((bits >> 51) & 0x1F) as u8;
    let sub = ((bits >> 48) & 0x07) as u8;
    frame.type_code = Some(tc);

    match tc {
        1..=4 => {
            frame.body = FrameBody::Identification {
                callsign: decode_callsign(bits),
                category: aircraft_category(tc, sub),
            };
        }
        5..=8 => {
            frame.on_ground = Some(true);
            let movement = ((bits >> 44) & 0x7F) as u8;
            let track = if (bits >> 43) & 1 == 1 {
                Some(((bits >> 36) & 0x7F) as f64 * 360.0 / 128.0)
            } else {
                None
            };
            frame.body = FrameBody::SurfacePosition {
                speed_kt: surface_speed(movement),
                track,
                cpr: cpr_from_me(bits, true),
            };
        }
        9..=18 => {
            let (altitude, unit) = decode_ac12(((bits >> 36) & 0xFFF) as u16);
            frame.body = FrameBody::AirbornePosition {
                altitude,
                unit,
                surveillance_status: ((bits >> 49) & 0x03) as u8,
                cpr: cpr_from_me(bits, false),
            };
        }
        19 => {
            frame.sub_type = Some(sub);
            frame.body = decode_velocity(bits, sub)?;
        }
        20..=22 => {
            // GNSS height, metres straight from the 12-bit field.
            let alt = ((bits >> 36) & 0xFFF) as i32;
            frame.body = FrameBody::AirbornePosition {
                altitude: if alt > 0 { Some(alt) } else { None },
                unit: AltitudeUnit::Metres,
                surveillance_status: ((bits >> 49) & 0x03) as u8,
                cpr: cpr_from_me(bits, false),
            };
        }
        28 => {
            frame.sub_type = Some(sub);
            if sub == 1 {
                let state = ((bits >> 45) & 0x07) as u8;
                frame.body = FrameBody::AircraftStatus {
                    emergency: state,
                    special: emergency_text(state),
                };
            }
            // sub 2 is a TCAS RA broadcast, carried opaque.
        }
        31 => {
            frame.sub_type = Some(sub);
            if sub > 1 {
                return Err(DecodeError::MalformedFrame(
                    "unknown operational status sub-type",
                ));
            }
            let airframe = if sub == 1 {
                airframe_size(((bits >> 32) & 0x0F) as u8)
            } else {
                None
            };
            frame.body = FrameBody::OperationalStatus {
                version: ((bits >> 13) & 0x07) as u8,
                nac_p: ((bits >> 8) & 0x0F) as u8,
                sil: ((bits >> 4) & 0x03) as u8,
                airframe,
            };
        }
        _ => {}
    }

    Ok(())
}

fn cpr_from_me(bits: u64, surface: bool) -> CprPosition {
    CprPosition {
        odd: (bits >> 34) & 1 == 1,
        lat: ((bits >> 17) & 0x1FFFF) as u32,
        lon: (bits & 0x1FFFF) as u32,
        surface,
    }
}

/// 8 callsign characters, 6 bits each, from ME bits 9-56.
fn decode_callsign(bits: u64) -> String {
    let mut callsign = String::with_capacity(8);
    for i in 0..8 {
        let idx = ((bits >> (42 - i * 6)) & 0x3F) as usize;
        callsign.push(AIS_CHARSET[idx] as char);
    }
    callsign
}

fn decode_velocity(bits: u64, sub: u8) -> Result<FrameBody, DecodeError> {
    let supersonic = sub == 2 || sub == 4;
    let mult = if supersonic { 4 } else { 1 };

    let (velocity_kt, heading, speed_type) = match sub {
        1 | 2 => {
            let ew_raw = ((bits >> 32) & 0x3FF) as i32;
            let ns_raw = ((bits >> 21) & 0x3FF) as i32;
            if ew_raw > 0 && ns_raw > 0 {
                let mut vx = (ew_raw - 1) * mult;
                let mut vy = (ns_raw - 1) * mult;
                if (bits >> 42) & 1 == 1 {
                    vx = -vx;
                }
                if (bits >> 31) & 1 == 1 {
                    vy = -vy;
                }
                let speed = ((vx * vx + vy * vy) as f64).sqrt();
                let heading = (vx as f64).atan2(vy as f64).to_degrees().rem_euclid(360.0);
                (Some(speed), Some(heading), SpeedType::Ground)
            } else {
                (None, None, SpeedType::Ground)
            }
        }
        3 | 4 => {
            let heading = if (bits >> 42) & 1 == 1 {
                Some(((bits >> 32) & 0x3FF) as f64 * 360.0 / 1024.0)
            } else {
                None
            };
            let speed_type = if (bits >> 31) & 1 == 1 {
                SpeedType::Tas
            } else {
                SpeedType::Ias
            };
            let as_raw = ((bits >> 21) & 0x3FF) as i32;
            let speed = if as_raw > 0 {
                Some(((as_raw - 1) * mult) as f64)
            } else {
                None
            };
            (speed, heading, speed_type)
        }
        _ => {
            return Err(DecodeError::MalformedFrame(
                "unknown airborne velocity sub-type",
            ))
        }
    };

    let vr_raw = ((bits >> 10) & 0x1FF) as i32;
    let vertical_rate_fpm = if vr_raw > 0 {
        let rate = (vr_raw - 1) * 64;
        Some(if (bits >> 19) & 1 == 1 { -rate } else { rate })
    } else {
        None
    };
    let vertical_rate_source = if (bits >> 20) & 1 == 1 {
        VerticalRateSource::Barometric
    } else {
        VerticalRateSource::Gnss
    };

    let hae_raw = (bits & 0x7F) as i32;
    let hae_delta_ft = if hae_raw > 0 {
        let delta = (hae_raw - 1) * 25;
        Some(if (bits >> 7) & 1 == 1 { -delta } else { delta })
    } else {
        None
    };

    Ok(FrameBody::AirborneVelocity {
        velocity_kt,
        heading,
        speed_type,
        vertical_rate_fpm,
        vertical_rate_source,
        hae_delta_ft,
    })
}

// ---------------------------------------------------------------------------
// Altitude and identity field decoding
// ---------------------------------------------------------------------------

/// 13-bit AC field: C1 A1 C2 A2 C4 A4 M B1 Q B2 D2 B4 D4.
pub fn decode_ac13(field: u16) -> (Option<i32>, AltitudeUnit) {
    if field == 0 {
        return (None, AltitudeUnit::Feet);
    }
    if (field >> 6) & 1 == 1 {
        // M-bit: metric altitude, remaining 12 bits are metres.
        let metres = ((field & 0x1F80) >> 1) | (field & 0x003F);
        return (Some(metres as i32), AltitudeUnit::Metres);
    }
    if (field >> 4) & 1 == 1 {
        // Q-bit: 25 ft increments, M and Q removed.
        let n = ((field & 0x1F80) >> 2) | ((field & 0x0020) >> 1) | (field & 0x000F);
        (Some(n as i32 * 25 - 1000), AltitudeUnit::Feet)
    } else {
        (decode_gillham(field as u32), AltitudeUnit::Feet)
    }
}

/// Build the 13-bit AC field for a 25-ft altitude (M=0, Q=1).
#[cfg(test)]
pub fn encode_ac13(altitude_ft: i32) -> u16 {
    let n = ((altitude_ft + 1000) / 25) as u16;
    ((n & 0x7E0) << 2) | ((n & 0x010) << 1) | (n & 0x00F) | 0x0010
}

/// 12-bit AC field from airborne position messages (no M-bit).
pub fn decode_ac12(field: u16) -> (Option<i32>, AltitudeUnit) {
    if field == 0 {
        return (None, AltitudeUnit::Feet);
    }
    if (field >> 4) & 1 == 1 {
        let n = ((field & 0x0FE0) >> 1) | (field & 0x000F);
        (Some(n as i32 * 25 - 1000), AltitudeUnit::Feet)
    } else {
        // Re-insert a zero M-bit to reuse the 13-bit Gillham path.
        let field13 = ((field as u32 & 0x0FC0) << 1) | (field as u32 & 0x003F);
        (decode_gillham(field13), AltitudeUnit::Feet)
    }
}

/// 100-ft Gillham gray code altitude (Q=0 path).
fn decode_gillham(field: u32) -> Option<i32> {
    let c1 = (field >> 12) & 1;
    let a1 = (field >> 11) & 1;
    let c2 = (field >> 10) & 1;
    let a2 = (field >> 9) & 1;
    let c4 = (field >> 8) & 1;
    let a4 = (field >> 7) & 1;
    let b1 = (field >> 5) & 1;
    let b2 = (field >> 3) & 1;
    let b4 = (field >> 1) & 1;

    // 100-ft component from the C digit gray code.
    let mut c_bin = c4 * 4 + c2 * 2 + c1;
    c_bin ^= c_bin >> 2;
    c_bin ^= c_bin >> 1;
    if c_bin == 0 || c_bin >= 6 {
        return None;
    }

    // 500-ft component from the combined A/B gray code.
    let ab_gray = ((a4 * 4 + a2 * 2 + a1) << 3) | (b4 * 4 + b2 * 2 + b1);
    let mut ab_bin = ab_gray;
    ab_bin ^= ab_bin >> 4;
    ab_bin ^= ab_bin >> 2;
    ab_bin ^= ab_bin >> 1;

    let altitude = ab_bin as i32 * 500 + c_bin as i32 * 100 - 1200;
    if !(-1200..=126750).contains(&altitude) {
        return None;
    }
    Some(altitude)
}

/// 13-bit ID field (DF5/21): C1 A1 C2 A2 C4 A4 X B1 D1 B2 D2 B4 D4.
///
/// Returns the four octal digits packed as a decimal number, e.g. 7500.
pub fn decode_id13(field: u16) -> u16 {
    let field = field as u32;
    let a = ((field >> 7) & 1) * 4 + ((field >> 9) & 1) * 2 + ((field >> 11) & 1);
    let b = ((field >> 1) & 1) * 4 + ((field >> 3) & 1) * 2 + ((field >> 5) & 1);
    let c = ((field >> 8) & 1) * 4 + ((field >> 10) & 1) * 2 + ((field >> 12) & 1);
    let d = (field & 1) * 4 + ((field >> 2) & 1) * 2 + ((field >> 4) & 1);
    (a * 1000 + b * 100 + c * 10 + d) as u16
}

/// Build the 13-bit ID field from a squawk code (test support).
#[cfg(test)]
pub fn encode_id13(squawk: u16) -> u16 {
    let a = (squawk / 1000 % 10) as u16;
    let b = (squawk / 100 % 10) as u16;
    let c = (squawk / 10 % 10) as u16;
    let d = (squawk % 10) as u16;
    ((a & 4) << 5) | ((a & 2) << 8) | ((a & 1) << 11)
        | ((b & 4) >> 1) | ((b & 2) << 2) | ((b & 1) << 5)
        | ((c & 4) << 6) | ((c & 2) << 9) | ((c & 1) << 12)
        | ((d & 4) >> 2) | ((d & 2) << 1) | ((d & 1) << 4)
}

/// Surface movement field to ground speed in knots, piecewise table.
fn surface_speed(movement: u8) -> Option<f64> {
    match movement {
        0 => None,
        1 => Some(0.0),
        2..=8 => Some(0.125 + (movement - 2) as f64 * 0.125),
        9..=12 => Some(1.0 + (movement - 9) as f64 * 0.25),
        13..=38 => Some(2.0 + (movement - 13) as f64 * 0.5),
        39..=93 => Some(15.0 + (movement - 39) as f64),
        94..=108 => Some(70.0 + (movement - 94) as f64 * 2.0),
        109..=123 => Some(100.0 + (movement - 109) as f64 * 5.0),
        124 => Some(175.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn decode_hex(msg: &str, secs: i64) -> DecodedFrame {
        let payload = hex::decode(msg).unwrap();
        decode(&payload, at(secs), &IcaoRoster::default()).expect("valid frame")
    }

    #[test]
    fn df17_identification() {
        let frame = decode_hex("8D4840D6202CC371C32CE0576098", 1);
        assert_eq!(frame.df, 17);
        assert_eq!(frame.icao, 0x4840D6);
        assert_eq!(frame.icao_string(), "4840D6");
        assert_eq!(frame.type_code, Some(4));
        match &frame.body {
            FrameBody::Identification { callsign, .. } => {
                assert_eq!(callsign, "KLM1023 ");
            }
            body => panic!("expected identification, got {body:?}"),
        }
    }

    #[test]
    fn df17_identification_ezy() {
        let frame = decode_hex("8D406B902015A678D4D220AA4BDA", 1);
        match &frame.body {
            FrameBody::Identification { callsign, .. } => assert_eq!(callsign, "EZY85MH "),
            body => panic!("expected identification, got {body:?}"),
        }
    }

    #[test]
    fn df17_airborne_position_even() {
        let frame = decode_hex("8D40621D58C382D690C8AC2863A7", 0);
        assert_eq!(frame.icao, 0x40621D);
        match &frame.body {
            FrameBody::AirbornePosition { altitude, unit, cpr, .. } => {
                assert_eq!(*altitude, Some(38000));
                assert_eq!(*unit, AltitudeUnit::Feet);
                assert!(!cpr.odd);
                assert!(!cpr.surface);
                assert_eq!(cpr.lat, 93000);
                assert_eq!(cpr.lon, 51372);
            }
            body => panic!("expected airborne position, got {body:?}"),
        }
    }

    #[test]
    fn df17_airborne_position_odd() {
        let frame = decode_hex("8D40621D58C386435CC412692AD6", 1);
        match &frame.body {
            FrameBody::AirbornePosition { altitude, cpr, .. } => {
                assert_eq!(*altitude, Some(38000));
                assert!(cpr.odd);
                assert_eq!(cpr.lat, 74158);
                assert_eq!(cpr.lon, 50194);
            }
            body => panic!("expected airborne position, got {body:?}"),
        }
    }

    #[test]
    fn df17_ground_velocity() {
        let frame = decode_hex("8D485020994409940838175B284F", 1);
        assert_eq!(frame.type_code, Some(19));
        assert_eq!(frame.sub_type, Some(1));
        match &frame.body {
            FrameBody::AirborneVelocity {
                velocity_kt,
                heading,
                speed_type,
                vertical_rate_fpm,
                vertical_rate_source,
                ..
            } => {
                let speed = velocity_kt.unwrap();
                assert!((speed - 159.2).abs() < 0.5, "speed {speed}");
                let heading = heading.unwrap();
                assert!((heading - 182.88).abs() < 0.1, "heading {heading}");
                assert_eq!(*vertical_rate_fpm, Some(-832));
                assert_eq!(*speed_type, SpeedType::Ground);
                assert_eq!(*vertical_rate_source, VerticalRateSource::Gnss);
            }
            body => panic!("expected velocity, got {body:?}"),
        }
    }

    #[test]
    fn df17_airspeed_velocity() {
        // Sub-type 3: magnetic heading + true airspeed.
        let frame = decode_hex("8DA05F219B06B6AF189400CBC33F", 1);
        match &frame.body {
            FrameBody::AirborneVelocity { velocity_kt, heading, speed_type, .. } => {
                assert_eq!(*speed_type, SpeedType::Tas);
                let speed = velocity_kt.unwrap();
                assert!((speed - 375.0).abs() < 1.0, "speed {speed}");
                let heading = heading.unwrap();
                assert!((heading - 243.98).abs() < 0.1, "heading {heading}");
            }
            body => panic!("expected velocity, got {body:?}"),
        }
    }

    #[test]
    fn crc_mismatch_rejected() {
        let mut payload = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        payload[3] ^= 0x02;
        payload[8] ^= 0x80; // two errors, beyond single-bit repair
        let err = decode(&payload, at(1), &IcaoRoster::default()).unwrap_err();
        assert_eq!(err, DecodeError::CrcMismatch { df: 17 });
    }

    #[test]
    fn single_bit_error_recovered() {
        let mut payload = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        payload[5] ^= 0x01;
        let frame = decode(&payload, at(1), &IcaoRoster::default()).unwrap();
        assert!(frame.corrected);
        assert_eq!(frame.icao, 0x4840D6);
    }

    #[test]
    fn malformed_lengths() {
        let roster = IcaoRoster::default();
        assert!(matches!(
            decode(&[0x8D, 0x48], at(1), &roster),
            Err(DecodeError::MalformedFrame(_))
        ));
        // DF17 in a short frame: length does not match the format.
        let short = [0x8Du8, 0x48, 0x40, 0xD6, 0x20, 0x2C, 0xC3];
        assert!(matches!(
            decode(&short, at(1), &roster),
            Err(DecodeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn all_call_vouches_for_overlay_frames() {
        // DF11 with CA=5, plain CRC trailer.
        let mut all_call = vec![0x5D, 0x48, 0x40, 0xD6, 0, 0, 0];
        let trailer = crc::checksum(&all_call[..4]);
        all_call[4] = (trailer >> 16) as u8;
        all_call[5] = (trailer >> 8) as u8;
        all_call[6] = trailer as u8;

        let roster = IcaoRoster::default();
        let frame = decode(&all_call, at(1), &roster).unwrap();
        assert_eq!(frame.icao, 0x4840D6);
        assert_eq!(frame.body, FrameBody::AllCall { capability: 5 });
        assert_eq!(frame.on_ground, Some(false));

        // The roster now accepts an overlay frame for the same address.
        let mut altitude_reply = vec![0x20, 0x00, 0x0C, 0x38, 0, 0, 0];
        let overlay = crc::checksum(&altitude_reply[..4]) ^ 0x4840D6;
        altitude_reply[4] = (overlay >> 16) as u8;
        altitude_reply[5] = (overlay >> 8) as u8;
        altitude_reply[6] = overlay as u8;

        let frame = decode(&altitude_reply, at(2), &roster).unwrap();
        assert_eq!(frame.icao, 0x4840D6);
        assert_eq!(
            frame.body,
            FrameBody::SurveillanceAltitude {
                altitude: Some(38000),
                unit: AltitudeUnit::Feet,
            }
        );
    }

    #[test]
    fn overlay_frame_needs_roster() {
        // Surveillance identity reply carrying squawk 7700, trailer built
        // the way a transponder would: checksum XOR address.
        let icao = 0x4840D6;
        let id13 = encode_id13(7700);
        // FS = 2: alert, airborne.
        let mut payload = vec![0x2A, 0x00, 0, 0, 0, 0, 0];
        payload[2] = (id13 >> 8) as u8 & 0x1F;
        payload[3] = id13 as u8;
        let overlay = crc::checksum(&payload[..4]) ^ icao;
        payload[4] = (overlay >> 16) as u8;
        payload[5] = (overlay >> 8) as u8;
        payload[6] = overlay as u8;

        let roster = IcaoRoster::default();
        assert_eq!(
            decode(&payload, at(5), &roster).unwrap_err(),
            DecodeError::CrcMismatch { df: 5 }
        );

        roster.register(icao, at(1));
        let frame = decode(&payload, at(5), &roster).unwrap();
        assert_eq!(frame.icao, icao);
        assert_eq!(frame.body, FrameBody::SurveillanceIdentity { squawk: 7700 });
        assert!(frame.alert); // fs carried in the low bits of byte 0
    }

    #[test]
    fn ac13_round_trip() {
        // encode(decode(x)) = x for every valid M=0, Q=1 field.
        for field in 1u16..0x2000 {
            if (field >> 6) & 1 == 1 || (field >> 4) & 1 != 1 {
                continue;
            }
            let (alt, unit) = decode_ac13(field);
            assert_eq!(unit, AltitudeUnit::Feet);
            assert_eq!(encode_ac13(alt.unwrap()), field, "field {field:#06x}");
        }
    }

    #[test]
    fn ac13_metric() {
        // M-bit set: the remaining 12 bits read as metres. 1541 m encodes
        // with its high six bits above the M position.
        let metres = 0x605u16;
        let field = ((metres & 0xFC0) << 1) | (metres & 0x03F) | 0x0040;
        let (alt, unit) = decode_ac13(field);
        assert_eq!(unit, AltitudeUnit::Metres);
        assert_eq!(alt, Some(1541));
    }

    #[test]
    fn ac12_q_bit() {
        // 38000 ft: n = 1560, Q inserted at bit 4.
        let n = 1560u16;
        let field = ((n & 0x7F0) << 1) | (n & 0x00F) | 0x0010;
        let (alt, unit) = decode_ac12(field);
        assert_eq!(alt, Some(38000));
        assert_eq!(unit, AltitudeUnit::Feet);
    }

    #[test]
    fn squawk_round_trip() {
        for a in 0..8u16 {
            for b in 0..8 {
                for c in 0..8 {
                    for d in 0..8 {
                        let squawk = a * 1000 + b * 100 + c * 10 + d;
                        assert_eq!(decode_id13(encode_id13(squawk)), squawk);
                    }
                }
            }
        }
    }

    #[test]
    fn gillham_range() {
        // Every Q=0 field either refuses or lands in the sane band.
        for field in 0u32..0x2000 {
            if (field >> 4) & 1 == 1 || (field >> 6) & 1 == 1 {
                continue;
            }
            if let Some(alt) = decode_gillham(field) {
                assert!((-1200..=126750).contains(&alt), "field {field:#06x} -> {alt}");
            }
        }
    }

    #[test]
    fn surface_speed_table() {
        assert_eq!(surface_speed(0), None);
        assert_eq!(surface_speed(1), Some(0.0));
        assert_eq!(surface_speed(13), Some(2.0));
        assert_eq!(surface_speed(39), Some(15.0));
        assert_eq!(surface_speed(93), Some(69.0));
        assert_eq!(surface_speed(124), Some(175.0));
        assert_eq!(surface_speed(125), None);
    }

    #[test]
    fn callsign_charset_trailing_space() {
        let frame = decode_hex("8D4840D6202CC371C32CE0576098", 1);
        if let FrameBody::Identification { callsign, .. } = &frame.body {
            assert_eq!(callsign.len(), 8);
            assert!(callsign.ends_with(' '));
        } else {
            panic!("expected identification");
        }
    }
}
