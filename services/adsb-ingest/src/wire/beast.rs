//! BEAST binary framing
//!
//! Records are `0x1A <type> <timestamp:6BE> <signal:1> <payload>` with
//! every payload/header `0x1A` doubled. The decoder is incremental: feed
//! it chunks as they arrive off the socket, it hands back complete frames
//! and keeps partial state, resyncing past garbage to the next escape.

use chrono::{DateTime, Utc};

use super::{RawModeS, WireFrame, WireProtocol};

/// Escape / record-start byte.
const ESC: u8 = 0x1A;

#[derive(Debug, Default)]
pub struct BeastDecoder {
    buf: Vec<u8>,
}

impl BeastDecoder {
    pub fn new() -> Self {
        BeastDecoder::default()
    }

    /// Feed received bytes, collecting every record completed by them.
    pub fn push(&mut self, bytes: &[u8], received: DateTime<Utc>) -> Vec<WireFrame> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            match self.buf.iter().position(|&b| b == ESC) {
                Some(0) => {}
                Some(start) => {
                    self.buf.drain(..start);
                }
                None => {
                    self.buf.clear();
                    return out;
                }
            }
            if self.buf.len() < 2 {
                return out;
            }

            let msg_type = self.buf[1];
            let payload_len = match msg_type {
                1 => 2,
                2 => 7,
                3 => 14,
                _ => {
                    // Not a record start; resync at the next escape.
                    self.buf.drain(..1);
                    continue;
                }
            };

            // Un-stuff the 6-byte timestamp, signal byte and payload.
            let needed = 6 + 1 + payload_len;
            let mut body = Vec::with_capacity(needed);
            let mut i = 2;
            let mut resync_at = None;
            while body.len() < needed {
                let Some(&b) = self.buf.get(i) else {
                    return out; // incomplete, wait for more bytes
                };
                if b == ESC {
                    match self.buf.get(i + 1) {
                        None => return out,
                        Some(&ESC) => {
                            body.push(ESC);
                            i += 2;
                        }
                        Some(_) => {
                            // A fresh record begins mid-body: the current
                            // one was truncated, drop it.
                            resync_at = Some(i);
                            break;
                        }
                    }
                } else {
                    body.push(b);
                    i += 1;
                }
            }
            if let Some(pos) = resync_at {
                self.buf.drain(..pos);
                continue;
            }
            self.buf.drain(..i);

            let mut counter = 0u64;
            for &b in &body[..6] {
                counter = (counter << 8) | b as u64;
            }
            let signal = body[6];

            if msg_type == 1 {
                out.push(WireFrame::ModeAc { received });
            } else {
                out.push(WireFrame::ModeS {
                    raw: RawModeS {
                        payload: body[7..].to_vec(),
                        received,
                        signal_rssi: signal_to_dbfs(signal),
                        mlat_counter: Some(counter),
                    },
                    protocol: WireProtocol::Beast,
                });
            }
        }
    }
}

/// Single signal byte to dBFS. Zero means no reading.
fn signal_to_dbfs(byte: u8) -> Option<f64> {
    if byte == 0 {
        None
    } else {
        Some(20.0 * (byte as f64 / 255.0).log10())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    /// Build a record with byte-stuffing applied to the body.
    fn record(msg_type: u8, counter: u64, signal: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&counter.to_be_bytes()[2..]);
        body.push(signal);
        body.extend_from_slice(payload);

        let mut framed = vec![ESC, msg_type];
        for b in body {
            framed.push(b);
            if b == ESC {
                framed.push(ESC);
            }
        }
        framed
    }

    fn mode_s_payloads(frames: &[WireFrame]) -> Vec<&RawModeS> {
        frames
            .iter()
            .filter_map(|f| match f {
                WireFrame::ModeS { raw, .. } => Some(raw),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn long_record() {
        let payload = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        let mut dec = BeastDecoder::new();
        let frames = dec.push(&record(3, 123_456, 0x80, &payload), now());
        let raws = mode_s_payloads(&frames);
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].payload, payload);
        assert_eq!(raws[0].mlat_counter, Some(123_456));
        assert!(raws[0].signal_rssi.unwrap() < 0.0);
    }

    #[test]
    fn stuffed_escape_bytes() {
        // 0x1A in the counter and in the payload must round-trip.
        let payload = [0x1A, 0x1A, 0x20, 0x05, 0x1A, 0x71, 0xC3];
        let mut dec = BeastDecoder::new();
        let frames = dec.push(&record(2, 0x00001A001A1A, 0x1A, &payload), now());
        let raws = mode_s_payloads(&frames);
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].payload, payload);
        assert_eq!(raws[0].mlat_counter, Some(0x00001A001A1A));
    }

    #[test]
    fn split_delivery() {
        let payload = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        let framed = record(3, 42, 10, &payload);
        let mut dec = BeastDecoder::new();
        for chunk in framed.chunks(3) {
            let frames = dec.push(chunk, now());
            if !frames.is_empty() {
                assert_eq!(mode_s_payloads(&frames)[0].payload, payload);
                return;
            }
        }
        panic!("record never completed");
    }

    #[test]
    fn garbage_between_records() {
        let payload = hex::decode("02E197B2F3F9A1").unwrap();
        let mut stream = vec![0x00, 0x41, 0x56]; // junk before the first escape
        stream.extend_from_slice(&record(2, 1, 1, &payload));
        stream.extend_from_slice(&[0xFF, 0xFF]);
        stream.extend_from_slice(&record(2, 2, 1, &payload));

        let mut dec = BeastDecoder::new();
        let frames = dec.push(&stream, now());
        assert_eq!(mode_s_payloads(&frames).len(), 2);
    }

    #[test]
    fn mode_ac_counted_not_decoded() {
        let mut dec = BeastDecoder::new();
        let frames = dec.push(&record(1, 7, 3, &[0x02, 0xE1]), now());
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], WireFrame::ModeAc { .. }));
    }

    #[test]
    fn truncated_record_dropped_on_next_start() {
        let payload = hex::decode("02E197B2F3F9A1").unwrap();
        let full = record(2, 9, 1, &payload);
        let mut stream = full[..8].to_vec(); // cut mid-record
        stream.extend_from_slice(&full);

        let mut dec = BeastDecoder::new();
        let frames = dec.push(&stream, now());
        let raws = mode_s_payloads(&frames);
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].mlat_counter, Some(9));
    }
}
