//! Example-frame hunting
//!
//! The `filter` command logs frames matching an ICAO list and/or the
//! location-bearing DF17/18 type codes. Useful for pulling real test
//! vectors out of a live feed.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::info;

use crate::modes::{DecodedFrame, FrameBody};

pub struct ExampleFinder {
    icaos: HashSet<u32>,
    locations_only: bool,
}

impl ExampleFinder {
    pub fn new(icaos: &[String], locations_only: bool) -> Result<Self> {
        let icaos = icaos
            .iter()
            .map(|s| {
                u32::from_str_radix(s.trim(), 16)
                    .with_context(|| format!("invalid ICAO filter: {s}"))
            })
            .collect::<Result<HashSet<u32>>>()?;
        Ok(ExampleFinder { icaos, locations_only })
    }

    fn matches(&self, frame: &DecodedFrame) -> bool {
        if !self.icaos.is_empty() && !self.icaos.contains(&frame.icao) {
            return false;
        }
        if self.locations_only {
            return matches!(
                frame.body,
                FrameBody::AirbornePosition { .. } | FrameBody::SurfacePosition { .. }
            );
        }
        frame.is_extended()
    }

    /// Log a matching frame as a ready-to-paste hex example.
    pub fn observe(&self, frame: &DecodedFrame) {
        if !self.matches(frame) {
            return;
        }
        info!(
            icao = %frame.icao_string(),
            df = frame.df,
            tc = frame.type_code.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            frame = %hex::encode_upper(&frame.raw),
            "example frame"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{decode, IcaoRoster};
    use chrono::Utc;

    fn frame(msg: &str) -> DecodedFrame {
        let payload = hex::decode(msg).unwrap();
        decode(&payload, Utc::now(), &IcaoRoster::default()).unwrap()
    }

    #[test]
    fn icao_filter() {
        let finder = ExampleFinder::new(&["4840D6".to_string()], false).unwrap();
        assert!(finder.matches(&frame("8D4840D6202CC371C32CE0576098")));
        assert!(!finder.matches(&frame("8D485020994409940838175B284F")));
    }

    #[test]
    fn locations_only_filter() {
        let finder = ExampleFinder::new(&[], true).unwrap();
        assert!(finder.matches(&frame("8D40621D58C382D690C8AC2863A7")));
        assert!(!finder.matches(&frame("8D4840D6202CC371C32CE0576098")));
        assert!(!finder.matches(&frame("8D485020994409940838175B284F")));
    }

    #[test]
    fn bad_icao_rejected() {
        assert!(ExampleFinder::new(&["XYZ".to_string()], false).is_err());
    }
}
