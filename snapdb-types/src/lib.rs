// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core types for route snapshot operations, shared across ribsnap
//! components.
//!
//! This crate provides the canonical row model that heterogeneous device
//! output is normalized into, plus the prefix and address-family types the
//! rest of the workspace is built on. It has minimal dependencies so the
//! collector and the store can both use it without pulling each other in.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Formatter};
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

pub mod normalize;
pub mod rows;

pub use rows::{BgpRow, NextHop, RibRow};

#[cfg(test)]
mod props;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct Prefix4 {
    pub value: Ipv4Addr,
    pub length: u8,
}

impl PartialOrd for Prefix4 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prefix4 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl Prefix4 {
    /// Create a new `Prefix4` from an IP address and mask length. The newly
    /// created `Prefix4` will have its host bits zeroed upon creation, e.g.
    /// ```
    /// use snapdb_types::Prefix4;
    /// use std::net::Ipv4Addr;
    /// use std::str::FromStr;
    /// let p4 = Prefix4::new(Ipv4Addr::from_str("10.0.0.10").unwrap(), 24);
    /// assert_eq!(p4.value, Ipv4Addr::from_str("10.0.0.0").unwrap());
    /// ```
    pub fn new(ip: Ipv4Addr, length: u8) -> Self {
        let mut new = Self { value: ip, length };
        new.unset_host_bits();
        new
    }

    pub fn host_bits_are_unset(&self) -> bool {
        let mask = match self.length {
            0 => 0,
            _ => (!0u32) << (32 - self.length),
        };

        self.value.to_bits() & mask == self.value.to_bits()
    }

    pub fn unset_host_bits(&mut self) {
        let mask = match self.length {
            0 => 0,
            _ => (!0u32) << (32 - self.length),
        };

        self.value = Ipv4Addr::from_bits(self.value.to_bits() & mask)
    }
}

impl fmt::Display for Prefix4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix4 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) =
            s.split_once('/').ok_or("malformed prefix".to_string())?;

        let value: Ipv4Addr = value
            .parse()
            .map_err(|_| "malformed ip addr".to_string())?;
        let length: u8 = length
            .parse()
            .map_err(|_| "malformed length".to_string())?;
        if length > 32 {
            return Err("malformed length".to_string());
        }
        Ok(Self::new(value, length))
    }
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct Prefix6 {
    pub value: Ipv6Addr,
    pub length: u8,
}

impl PartialOrd for Prefix6 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Prefix6 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl Prefix6 {
    /// Create a new `Prefix6` from an IP address and mask length. The newly
    /// created `Prefix6` will have its host bits zeroed upon creation.
    pub fn new(ip: Ipv6Addr, length: u8) -> Self {
        let mut new = Self { value: ip, length };
        new.unset_host_bits();
        new
    }

    pub fn host_bits_are_unset(&self) -> bool {
        let mask = match self.length {
            0 => 0,
            _ => (!0u128) << (128 - self.length),
        };

        self.value.to_bits() & mask == self.value.to_bits()
    }

    pub fn unset_host_bits(&mut self) {
        let mask = match self.length {
            0 => 0,
            _ => (!0u128) << (128 - self.length),
        };

        self.value = Ipv6Addr::from_bits(self.value.to_bits() & mask)
    }
}

impl fmt::Display for Prefix6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix6 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) =
            s.split_once('/').ok_or("malformed prefix".to_string())?;

        let value: Ipv6Addr = value
            .parse()
            .map_err(|_| "malformed ip addr".to_string())?;
        let length: u8 = length
            .parse()
            .map_err(|_| "malformed length".to_string())?;
        if length > 128 {
            return Err("malformed length".to_string());
        }
        Ok(Self::new(value, length))
    }
}

/// A canonical route prefix. Snapshots carry prefixes as CIDR text, so
/// unlike most wire types this one serializes as its `Display` form:
/// host bits zeroed, mask always present, lowercase for v6 (the standard
/// library's `Ipv6Addr` display is already canonical lowercase).
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Prefix {
    V4(Prefix4),
    V6(Prefix6),
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Prefix::V4(p) => p.fmt(f),
            Prefix::V6(p) => p.fmt(f),
        }
    }
}

impl From<Prefix4> for Prefix {
    fn from(value: Prefix4) -> Self {
        Self::V4(value)
    }
}

impl From<Prefix6> for Prefix {
    fn from(value: Prefix6) -> Self {
        Self::V6(value)
    }
}

impl FromStr for Prefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(prefix4) = s.parse::<Prefix4>() {
            Ok(Self::V4(prefix4))
        } else if let Ok(prefix6) = s.parse::<Prefix6>() {
            Ok(Self::V6(prefix6))
        } else {
            Err("malformed prefix".to_string())
        }
    }
}

impl Prefix {
    pub fn new(ip: IpAddr, length: u8) -> Self {
        match ip {
            IpAddr::V4(ip4) => Self::V4(Prefix4::new(ip4, length)),
            IpAddr::V6(ip6) => Self::V6(Prefix6::new(ip6, length)),
        }
    }

    /// Parse device output that may omit the mask. A bare address gets the
    /// full host mask for its family.
    pub fn parse_lenient(s: &str, afi: AddressFamily) -> Result<Self, String> {
        let s = s.trim();
        if s.contains('/') {
            return s.parse();
        }
        match afi {
            AddressFamily::Ipv4 => {
                let ip: Ipv4Addr =
                    s.parse().map_err(|_| "malformed ip addr".to_string())?;
                Ok(Self::V4(Prefix4::new(ip, 32)))
            }
            AddressFamily::Ipv6 => {
                let ip: Ipv6Addr =
                    s.parse().map_err(|_| "malformed ip addr".to_string())?;
                Ok(Self::V6(Prefix6::new(ip, 128)))
            }
        }
    }

    pub fn host_bits_are_unset(&self) -> bool {
        match self {
            Self::V4(p4) => p4.host_bits_are_unset(),
            Self::V6(p6) => p6.host_bits_are_unset(),
        }
    }

    pub fn is_v4(&self) -> bool {
        matches!(self, Prefix::V4(_))
    }

    /// The all-zeros route for this prefix's family.
    pub fn is_default_route(&self) -> bool {
        match self {
            Prefix::V4(p) => p.length == 0 && p.value.is_unspecified(),
            Prefix::V6(p) => p.length == 0 && p.value.is_unspecified(),
        }
    }
}

impl Serialize for Prefix {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Prefix {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for Prefix {
    fn schema_name() -> String {
        "Prefix".to_string()
    }

    fn json_schema(
        generator: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        String::json_schema(generator)
    }
}

/// Address family of a route table. Snapshot coordinates and on-disk
/// filenames carry the lowercase form.
#[derive(
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    PartialOrd,
    Ord,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            _ => Err(format!("unknown address family '{s}'")),
        }
    }
}

/// Which table a snapshot belongs to. Names the per-device subdirectory
/// in the store.
#[derive(
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    PartialOrd,
    Ord,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Rib,
    Bgp,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            TableKind::Rib => write!(f, "rib"),
            TableKind::Bgp => write!(f, "bgp"),
        }
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rib" => Ok(Self::Rib),
            "bgp" => Ok(Self::Bgp),
            _ => Err(format!("unknown table kind '{s}'")),
        }
    }
}

/// A snapshot timestamp: 14 digits of UTC time (`YYYYMMDDHHMMSS`),
/// optionally carrying a `-N` collision suffix. Lexical order over the
/// string form equals chronological order, which is what the archive
/// listing relies on.
#[derive(
    Debug,
    Clone,
    Serialize,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    PartialOrd,
    Ord,
    JsonSchema,
)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().format("%Y%m%d%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the `-N` retry name used when an archive for this second
    /// already exists.
    pub fn with_suffix(&self, n: u32) -> Self {
        let base = match self.0.split_once('-') {
            Some((base, _)) => base,
            None => self.0.as_str(),
        };
        Self(format!("{base}-{n}"))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, suffix) = match s.split_once('-') {
            Some((base, suffix)) => (base, Some(suffix)),
            None => (s, None),
        };
        if base.len() != 14 || !base.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("malformed timestamp '{s}'"));
        }
        if let Some(suffix) = suffix {
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(format!("malformed timestamp suffix '{s}'"));
            }
        }
        Ok(Self(s.to_string()))
    }
}
