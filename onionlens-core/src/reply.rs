//! Control-port reply parsing
//!
//! Turns raw `GETINFO circuit-status` / `GETINFO stream-status` replies into
//! structured records. The daemon's reply format drifts between versions, so
//! lines that do not fit the grammar are skipped rather than treated as errors.
//!
//! A framed reply looks like:
//!
//! ```text
//! 250+circuit-status=
//! 123 BUILT $AAAA~Guard,$BBBB~Mid,$CCCC~Exit BUILD_FLAGS=NEED_CAPACITY PURPOSE=GENERAL
//! .
//! 250 OK
//! ```
//!
//! Single-value replies put the data inline (`250-circuit-status=...`).
//! Unframed input (bare data lines) is also accepted.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::{Circuit, CircuitNode, CircuitStatus, StreamRecord, StreamStatus, DEFAULT_PURPOSE};

fn reply_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{3})([ +-])(.*)$").expect("reply code pattern"))
}

fn circuit_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)\s+(\w+)\s+([$\w,~]+)(?:\s+(.*))?$").expect("circuit line pattern")
    })
}

fn stream_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\s+(\w+)\s+(\d+)\s+(.*)$").expect("stream line pattern"))
}

/// Whether the reply carries control-protocol status codes
fn is_framed(lines: &[&str]) -> bool {
    lines.iter().any(|line| {
        let bytes = line.as_bytes();
        bytes.len() >= 4
            && bytes[..3].iter().all(u8::is_ascii_digit)
            && (bytes[3] == b'+' || bytes[3] == b'-' || &line[3..] == " OK")
    })
}

/// Extract the data lines of a reply, dropping status lines and terminators.
pub fn data_lines(reply: &str) -> Vec<&str> {
    let lines: Vec<&str> = reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if !is_framed(&lines) {
        return lines.into_iter().filter(|line| *line != ".").collect();
    }

    let mut data = Vec::new();
    let mut in_block = false;

    for line in lines {
        if in_block {
            if line == "." {
                in_block = false;
            } else if line.starts_with("..") {
                // Dot-stuffed line inside a data block
                data.push(&line[1..]);
            } else {
                data.push(line);
            }
            continue;
        }

        match reply_code_regex().captures(line) {
            Some(caps) => {
                let separator = caps.get(2).map_or("", |m| m.as_str());
                let rest = caps.get(3).map_or("", |m| m.as_str());
                match separator {
                    "+" => in_block = true,
                    "-" => {
                        if let Some((_, value)) = rest.split_once('=') {
                            if !value.is_empty() {
                                data.push(value);
                            }
                        }
                    }
                    _ => {}
                }
            }
            None if line == "." => {}
            None => data.push(line),
        }
    }

    data
}

/// Parse `key=value` pairs from a GETINFO reply (e.g. `status/circuit-established=1`).
pub fn parse_key_values(reply: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for line in reply.lines().map(str::trim) {
        let body = match reply_code_regex().captures(line) {
            Some(caps) => caps.get(3).map_or("", |m| m.as_str()),
            None => line,
        };

        if let Some((key, value)) = body.split_once('=') {
            if !key.is_empty() && !key.contains(' ') {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }

    pairs
}

/// Parse a `circuit-status` reply.
///
/// `now` stands in for `TIME_CREATED` when a line does not carry one.
pub fn parse_circuits(reply: &str, now: DateTime<Utc>) -> Vec<Circuit> {
    let mut circuits = Vec::new();

    for line in data_lines(reply) {
        match parse_circuit_line(line, now) {
            Some(circuit) => circuits.push(circuit),
            None => debug!("Skipping unparseable circuit line: {}", line),
        }
    }

    circuits
}

fn parse_circuit_line(line: &str, now: DateTime<Utc>) -> Option<Circuit> {
    let caps = circuit_line_regex().captures(line)?;

    let id = caps.get(1)?.as_str().to_string();
    let status = CircuitStatus::parse(caps.get(2)?.as_str());
    let path = caps
        .get(3)?
        .as_str()
        .split(',')
        .filter(|hop| !hop.is_empty())
        .map(CircuitNode::from_hop)
        .collect();

    let mut purpose = DEFAULT_PURPOSE.to_string();
    let mut build_flags = Vec::new();
    let mut time_created = now;

    if let Some(rest) = caps.get(4) {
        for token in rest.as_str().split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "PURPOSE" => purpose = value.to_string(),
                "BUILD_FLAGS" => {
                    build_flags = value
                        .split(',')
                        .filter(|flag| !flag.is_empty())
                        .map(String::from)
                        .collect()
                }
                "TIME_CREATED" => {
                    if let Some(created) = parse_time_created(value) {
                        time_created = created;
                    }
                }
                _ => {}
            }
        }
    }

    Some(Circuit {
        id,
        status,
        path,
        build_flags,
        purpose,
        time_created,
    })
}

/// `TIME_CREATED` is ISO-8601 in UTC, with optional fractional seconds.
fn parse_time_created(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a `stream-status` reply.
pub fn parse_streams(reply: &str) -> Vec<StreamRecord> {
    data_lines(reply)
        .into_iter()
        .filter_map(|line| {
            let caps = stream_line_regex().captures(line)?;
            Some(StreamRecord {
                stream_id: caps.get(1)?.as_str().to_string(),
                status: StreamStatus::parse(caps.get(2)?.as_str()),
                circuit_id: caps.get(3)?.as_str().to_string(),
                target: caps.get(4)?.as_str().trim().to_string(),
            })
        })
        .collect()
}
