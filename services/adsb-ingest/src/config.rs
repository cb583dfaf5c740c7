//! Source and sink configuration
//!
//! Sources and sinks arrive as URL-form flags: `--fetch=beast://host:port`
//! and `--sink=stdout://?queues=location-updates&ttl=60`.

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use crate::wire::WireProtocol;

/// Default ports per receiver output flavour.
const DEFAULT_PORT_BEAST: u16 = 30005;
const DEFAULT_PORT_AVR: u16 = 30002;
const DEFAULT_PORT_SBS1: u16 = 30003;

/// Where to pull frames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSpec {
    Network {
        protocol: WireProtocol,
        host: String,
        port: u16,
    },
    File {
        path: String,
        protocol: WireProtocol,
    },
}

impl FetchSpec {
    pub fn describe(&self) -> String {
        match self {
            FetchSpec::Network { protocol, host, port } => {
                format!("{}://{host}:{port}", protocol.as_str())
            }
            FetchSpec::File { path, protocol } => {
                format!("file://{path} ({})", protocol.as_str())
            }
        }
    }
}

/// Parse one `--fetch` URL.
pub fn parse_fetch(raw: &str) -> Result<FetchSpec> {
    let url = Url::parse(raw).with_context(|| format!("invalid fetch url: {raw}"))?;

    match url.scheme() {
        "beast" => network_spec(&url, WireProtocol::Beast, DEFAULT_PORT_BEAST),
        "avr" => network_spec(&url, WireProtocol::Avr, DEFAULT_PORT_AVR),
        "sbs1" => network_spec(&url, WireProtocol::Sbs1, DEFAULT_PORT_SBS1),
        "file" => {
            let mut path = String::new();
            if let Some(host) = url.host_str() {
                path.push_str(host);
            }
            path.push_str(url.path());
            if path.is_empty() {
                bail!("file fetch url needs a path: {raw}");
            }
            let proto = match query_param(&url, "proto").as_deref() {
                None | Some("avr") => WireProtocol::Avr,
                Some("sbs1") => WireProtocol::Sbs1,
                Some(other) => bail!("unknown file proto {other}, expected avr or sbs1"),
            };
            Ok(FetchSpec::File { path, protocol: proto })
        }
        other => bail!("unknown fetch scheme: {other}, expected one of [beast|avr|sbs1|file]"),
    }
}

fn network_spec(url: &Url, protocol: WireProtocol, default_port: u16) -> Result<FetchSpec> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("fetch url needs a host: {url}"))?
        .to_string();
    Ok(FetchSpec::Network {
        protocol,
        host,
        port: url.port().unwrap_or(default_port),
    })
}

/// Where to publish. The core ships stdout and file destinations;
/// message-bus schemes belong to transport adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSpec {
    pub kind: SinkKind,
    pub ttl_secs: u32,
    pub queues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    Stdout,
    File { path: String },
}

/// Parse one `--sink` URL with its `ttl` and `queues` parameters.
pub fn parse_sink(raw: &str, default_ttl: u32) -> Result<SinkSpec> {
    let url = Url::parse(raw).with_context(|| format!("invalid sink url: {raw}"))?;

    let ttl_secs = query_param(&url, "ttl")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default_ttl);

    let queues = query_param(&url, "queues")
        .map(|list| list.split(',').map(|q| q.trim().to_string()).collect())
        .unwrap_or_default();

    let kind = match url.scheme() {
        "stdout" => SinkKind::Stdout,
        "file" => {
            let mut path = String::new();
            if let Some(host) = url.host_str() {
                path.push_str(host);
            }
            path.push_str(url.path());
            if path.is_empty() {
                bail!("file sink url needs a path: {raw}");
            }
            SinkKind::File { path }
        }
        other => bail!("unknown sink scheme: {other}, expected one of [stdout|file]"),
    };

    Ok(SinkSpec { kind, ttl_secs, queues })
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
