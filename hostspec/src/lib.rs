//! Parses and expands the host specifiers accepted by network sources.
//!
//! A network source lists its targets as a set of specifiers, each of which may describe one or many hosts:
//!
//! Form | Example | Expands to
//! ---|---|---
//! Address | `10.0.0.1` | `10.0.0.1`
//! CIDR block | `10.0.0.0/30` | `10.0.0.0` .. `10.0.0.3`
//! Octet range | `10.0.0.[1:3]`, `10.0.[0:1].[1:2]` | every combination of the ranged octets
//! Host pattern | `db[1:3].example.com`, `web[a:c].example.com` | `db1.example.com` .. `db3.example.com`
//! Hostname | `db.example.com` | `db.example.com`
//!
//! Specifiers are expanded into literal hosts at connect time, then excluded hosts are subtracted.
//! The expanded list never contains duplicates; the first occurrence of a host determines its position.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

use std::{
    collections::HashSet,
    fmt::Display,
    net::Ipv4Addr,
    str::FromStr,
};

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// The largest number of hosts a single specifier may expand to.
///
/// This is the size of a `/16` network; larger blocks are rejected at parse time.
pub const MAX_EXPANSION: usize = 1 << 16;

/// Errors encountered when parsing a [`HostSpec`] from a string.
#[derive(Error, Clone, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The input did not match any of the supported forms.
    #[error("input did not match any host form: '{input}'")]
    Syntax {
        /// The input originally provided to the parser.
        input: String,
    },

    /// An octet was outside of `0..=255`.
    #[error("octet '{octet}' out of range in '{input}'")]
    Octet {
        /// The input originally provided to the parser.
        input: String,

        /// The octet that failed to parse.
        octet: String,
    },

    /// A CIDR prefix length was outside of `0..=32`.
    #[error("prefix length '{bits}' out of range in '{input}'")]
    Bits {
        /// The input originally provided to the parser.
        input: String,

        /// The prefix length that failed to parse.
        bits: String,
    },

    /// A bracketed range had its bounds reversed or mixed letters with digits.
    #[error("invalid range '[{start}:{end}]' in '{input}'")]
    Range {
        /// The input originally provided to the parser.
        input: String,

        /// The start of the range.
        start: String,

        /// The end of the range.
        end: String,
    },

    /// The specifier expands to more than [`MAX_EXPANSION`] hosts.
    #[error("'{input}' expands to {count} hosts, more than the limit of {MAX_EXPANSION}")]
    TooLarge {
        /// The input originally provided to the parser.
        input: String,

        /// The number of hosts the input would expand to.
        count: u64,
    },
}

/// An inclusive range of octet values, written `[start:end]`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct OctetRange {
    start: u8,
    end: u8,
}

impl OctetRange {
    /// A range covering exactly one value.
    pub fn single(value: u8) -> Self {
        Self {
            start: value,
            end: value,
        }
    }

    /// Whether the range covers exactly one value.
    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// The number of values covered by the range.
    pub fn len(&self) -> u64 {
        u64::from(self.end - self.start) + 1
    }

    fn values(&self) -> impl Iterator<Item = u8> + Clone {
        self.start..=self.end
    }
}

impl Display for OctetRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "[{}:{}]", self.start, self.end)
        }
    }
}

/// The bracketed portion of a [`HostSpec::Pattern`].
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum PatternRange {
    /// A numeric range, e.g. `[1:10]` or `[01:10]`.
    ///
    /// `width` is non-zero when the start bound was written with leading zeros;
    /// expanded values are then zero-padded to that width.
    Numeric {
        /// The first value in the range.
        start: u32,
        /// The last value in the range.
        end: u32,
        /// Zero-padding width, or zero for no padding.
        width: usize,
    },

    /// An alphabetic range of single characters, e.g. `[a:d]`.
    Alpha {
        /// The first character in the range.
        start: char,
        /// The last character in the range.
        end: char,
    },
}

impl PatternRange {
    fn len(&self) -> u64 {
        match self {
            PatternRange::Numeric { start, end, .. } => u64::from(end - start) + 1,
            PatternRange::Alpha { start, end } => u64::from(*end as u32 - *start as u32) + 1,
        }
    }

    fn values(&self) -> Vec<String> {
        match self {
            PatternRange::Numeric { start, end, width } => (*start..=*end)
                .map(|n| format!("{n:0width$}", width = *width))
                .collect(),
            PatternRange::Alpha { start, end } => (*start..=*end).map(String::from).collect(),
        }
    }
}

impl Display for PatternRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternRange::Numeric { start, end, width } => {
                write!(f, "[{start:0width$}:{end}]", width = *width)
            }
            PatternRange::Alpha { start, end } => write!(f, "[{start}:{end}]"),
        }
    }
}

/// A single host specifier as configured on a network source.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum HostSpec {
    /// A literal IPv4 address.
    Address(Ipv4Addr),

    /// A CIDR block; every address in the block is a host, including the network and broadcast addresses.
    Cidr {
        /// The address as written; host bits are ignored during expansion.
        address: Ipv4Addr,
        /// The prefix length.
        bits: u8,
    },

    /// An address with one or two ranged octets.
    Range([OctetRange; 4]),

    /// A hostname with a bracketed range, e.g. `db[1:3].example.com`.
    Pattern {
        /// The text before the bracket.
        prefix: String,
        /// The bracketed range.
        range: PatternRange,
        /// The text after the bracket.
        suffix: String,
    },

    /// A literal hostname.
    Hostname(String),
}

lazy_static! {
    static ref CIDR: Regex = Regex::new(r"^([0-9.]+)/([0-9]+)$").expect("cidr expression must compile");
    static ref OCTET_RANGE: Regex =
        Regex::new(r"^\[([0-9]{1,3}):([0-9]{1,3})\]$").expect("octet range expression must compile");
    static ref DOTTED: Regex = Regex::new(r"^[0-9\[\]:]+(\.[0-9\[\]:]+){3}$").expect("dotted expression must compile");
    static ref PATTERN: Regex = Regex::new(
        r"^(?P<prefix>[A-Za-z0-9-]+)\[(?P<start>[0-9]+|[A-Za-z]):(?P<end>[0-9]+|[A-Za-z])\](?P<suffix>[A-Za-z0-9-]*(?:\.[A-Za-z0-9-]+)*)$"
    )
    .expect("pattern expression must compile");
    static ref HOSTNAME: Regex = Regex::new(
        r"^[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*$"
    )
    .expect("hostname expression must compile");
}

impl HostSpec {
    /// Parse a host specifier.
    ///
    /// Surrounding whitespace is ignored. Hostnames are normalized to lowercase.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let trimmed = input.trim();
        let spec = if let Some(captures) = CIDR.captures(trimmed) {
            let address = parse_address(input, &captures[1])?;
            let bits = captures[2]
                .parse::<u8>()
                .ok()
                .filter(|bits| *bits <= 32)
                .ok_or_else(|| Error::Bits {
                    input: input.to_owned(),
                    bits: captures[2].to_owned(),
                })?;
            HostSpec::Cidr { address, bits }
        } else if DOTTED.is_match(trimmed) {
            parse_dotted(input, trimmed)?
        } else if let Some(captures) = PATTERN.captures(trimmed) {
            HostSpec::Pattern {
                prefix: captures["prefix"].to_lowercase(),
                range: parse_pattern_range(input, &captures["start"], &captures["end"])?,
                suffix: captures["suffix"].to_lowercase(),
            }
        } else if HOSTNAME.is_match(trimmed) && !trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
            HostSpec::Hostname(trimmed.to_lowercase())
        } else {
            return Err(Error::Syntax {
                input: input.to_owned(),
            });
        };

        let count = spec.len();
        if count > MAX_EXPANSION as u64 {
            return Err(Error::TooLarge {
                input: input.to_owned(),
                count,
            });
        }
        Ok(spec)
    }

    /// The number of hosts this specifier expands to.
    pub fn len(&self) -> u64 {
        match self {
            HostSpec::Address(_) | HostSpec::Hostname(_) => 1,
            HostSpec::Cidr { bits, .. } => 1u64 << (32 - u32::from(*bits)),
            HostSpec::Range(octets) => octets.iter().map(OctetRange::len).product(),
            HostSpec::Pattern { range, .. } => range.len(),
        }
    }

    /// Specifiers always cover at least one host.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether this specifier names a single host without expansion.
    pub fn is_literal(&self) -> bool {
        matches!(self, HostSpec::Address(_) | HostSpec::Hostname(_))
    }

    /// Expand the specifier into the literal hosts it describes, in ascending order.
    pub fn expand(&self) -> Vec<String> {
        match self {
            HostSpec::Address(address) => vec![address.to_string()],
            HostSpec::Hostname(name) => vec![name.clone()],
            HostSpec::Cidr { address, bits } => {
                let mask = if *bits == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(*bits))
                };
                let network = u32::from(*address) & mask;
                let count = self.len();
                (0..count)
                    .map(|offset| Ipv4Addr::from(network + offset as u32).to_string())
                    .collect()
            }
            HostSpec::Range([a, b, c, d]) => a
                .values()
                .cartesian_product(b.values())
                .cartesian_product(c.values())
                .cartesian_product(d.values())
                .map(|(((a, b), c), d)| Ipv4Addr::new(a, b, c, d).to_string())
                .collect(),
            HostSpec::Pattern {
                prefix,
                range,
                suffix,
            } => range
                .values()
                .into_iter()
                .map(|value| format!("{prefix}{value}{suffix}"))
                .collect(),
        }
    }
}

impl FromStr for HostSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostSpec::parse(s)
    }
}

impl Display for HostSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostSpec::Address(address) => write!(f, "{address}"),
            HostSpec::Hostname(name) => write!(f, "{name}"),
            HostSpec::Cidr { address, bits } => write!(f, "{address}/{bits}"),
            HostSpec::Range(octets) => write!(f, "{}", octets.iter().join(".")),
            HostSpec::Pattern {
                prefix,
                range,
                suffix,
            } => write!(f, "{prefix}{range}{suffix}"),
        }
    }
}

impl<'de> Deserialize<'de> for HostSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        HostSpec::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for HostSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

/// Parse every specifier in the list, failing on the first invalid entry.
pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<HostSpec>, Error> {
    inputs.iter().map(|s| HostSpec::parse(s.as_ref())).collect()
}

/// Expand `hosts` into a list of literal hosts, subtracting everything expanded from `exclude`.
///
/// Each host appears at most once in the output, at the position of its first occurrence.
pub fn expand<'a>(
    hosts: impl IntoIterator<Item = &'a HostSpec>,
    exclude: impl IntoIterator<Item = &'a HostSpec>,
) -> Vec<String> {
    let excluded = exclude
        .into_iter()
        .flat_map(HostSpec::expand)
        .collect::<HashSet<_>>();

    let mut seen = HashSet::new();
    let expanded = hosts
        .into_iter()
        .flat_map(HostSpec::expand)
        .filter(|host| !excluded.contains(host))
        .filter(|host| seen.insert(host.clone()))
        .collect::<Vec<_>>();

    debug!(
        "expanded to {} host(s) after excluding {} host(s)",
        expanded.len(),
        excluded.len()
    );
    expanded
}

fn parse_octet(input: &str, octet: &str) -> Result<u8, Error> {
    octet.parse::<u8>().map_err(|_| Error::Octet {
        input: input.to_owned(),
        octet: octet.to_owned(),
    })
}

fn parse_address(input: &str, address: &str) -> Result<Ipv4Addr, Error> {
    let parts = address.split('.').collect::<Vec<_>>();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty() || p.len() > 3) {
        return Err(Error::Syntax {
            input: input.to_owned(),
        });
    }

    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(parts) {
        *slot = parse_octet(input, part)?;
    }
    Ok(Ipv4Addr::from(octets))
}

/// Parses the dotted forms: plain addresses and octet ranges.
///
/// Ranges are only accepted in the last octet, or in the third octet
/// (in which case the fourth may be a range or a literal).
fn parse_dotted(input: &str, trimmed: &str) -> Result<HostSpec, Error> {
    let parts = trimmed.split('.').collect::<Vec<_>>();
    let mut octets = [OctetRange::single(0); 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        *slot = if let Some(captures) = OCTET_RANGE.captures(part) {
            let start = parse_octet(input, &captures[1])?;
            let end = parse_octet(input, &captures[2])?;
            if start > end {
                return Err(Error::Range {
                    input: input.to_owned(),
                    start: captures[1].to_owned(),
                    end: captures[2].to_owned(),
                });
            }
            OctetRange { start, end }
        } else if part.chars().all(|c| c.is_ascii_digit()) && !part.is_empty() && part.len() <= 3 {
            OctetRange::single(parse_octet(input, part)?)
        } else {
            return Err(Error::Syntax {
                input: input.to_owned(),
            });
        };
    }

    let ranged = parts.iter().map(|p| p.starts_with('[')).collect::<Vec<_>>();
    match ranged.as_slice() {
        [false, false, false, false] => {
            let [a, b, c, d] = octets.map(|o| o.start);
            Ok(HostSpec::Address(Ipv4Addr::new(a, b, c, d)))
        }
        [false, false, _, true] | [false, false, true, false] => Ok(HostSpec::Range(octets)),
        _ => Err(Error::Syntax {
            input: input.to_owned(),
        }),
    }
}

fn parse_pattern_range(input: &str, start: &str, end: &str) -> Result<PatternRange, Error> {
    let invalid = || Error::Range {
        input: input.to_owned(),
        start: start.to_owned(),
        end: end.to_owned(),
    };

    let numeric = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if numeric(start) && numeric(end) {
        let lo = start.parse::<u32>().map_err(|_| invalid())?;
        let hi = end.parse::<u32>().map_err(|_| invalid())?;
        if lo > hi {
            return Err(invalid());
        }
        let width = if start.len() > 1 && start.starts_with('0') {
            start.len()
        } else {
            0
        };
        return Ok(PatternRange::Numeric {
            start: lo,
            end: hi,
            width,
        });
    }

    let mut start_chars = start.chars();
    let mut end_chars = end.chars();
    match (start_chars.next(), end_chars.next()) {
        (Some(lo), Some(hi))
            if lo.is_ascii_alphabetic()
                && hi.is_ascii_alphabetic()
                && lo.is_ascii_lowercase() == hi.is_ascii_lowercase()
                && lo <= hi =>
        {
            Ok(PatternRange::Alpha {
                start: lo.to_ascii_lowercase(),
                end: hi.to_ascii_lowercase(),
            })
        }
        _ => Err(invalid()),
    }
}
