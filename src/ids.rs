//! Sortable 12-byte object identifiers.
//!
//! Layout: 4-byte big-endian unix seconds, 5 random bytes fixed per process, and a
//! 3-byte big-endian counter seeded randomly. Rendered as 24 lowercase hex chars,
//! so the text form sorts by creation time within one process.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object id '{0}'")]
pub struct InvalidObjectId(pub String);

struct Generator {
    process: [u8; 5],
    counter: u32,
}

/// Random seed for the generator. Without an OS random source, fall back to
/// clock nanos mixed with the pid so two processes still diverge.
fn process_seed() -> [u8; 8] {
    let mut seed = [0u8; 8];
    if let Err(e) = getrandom::getrandom(&mut seed) {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0);
        let mixed = nanos ^ (u64::from(std::process::id())).rotate_left(40);
        warn!(target: "accountd::ids", error = %e, "random source unavailable; seeding object ids from clock and pid");
        seed = mixed.to_be_bytes();
    }
    seed
}

static GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| {
    let seed = process_seed();
    let mut process = [0u8; 5];
    process.copy_from_slice(&seed[..5]);
    let counter = u32::from_be_bytes([0, seed[5], seed[6], seed[7]]);
    Mutex::new(Generator { process, counter })
});

impl ObjectId {
    pub fn new() -> Self {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0);
        let (process, counter) = {
            let mut g = GENERATOR.lock();
            g.counter = (g.counter + 1) & 0x00FF_FFFF;
            (g.process, g.counter)
        };
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&process);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        ObjectId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self { ObjectId(bytes) }

    pub fn bytes(&self) -> [u8; 12] { self.0 }

    /// Creation time in unix seconds.
    pub fn timestamp(&self) -> u32 { u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]) }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn parse_hex(s: &str) -> Result<Self, InvalidObjectId> {
        if s.len() != 24 || !s.is_ascii() { return Err(InvalidObjectId(s.to_string())); }
        let mut bytes = [0u8; 12];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| InvalidObjectId(s.to_string()))?;
        }
        Ok(ObjectId(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_hex()) }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ObjectId({})", self.to_hex()) }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse_hex(s) }
}

impl From<ObjectId> for serde_json::Value {
    fn from(id: ObjectId) -> Self { serde_json::Value::String(id.to_hex()) }
}

impl From<&ObjectId> for serde_json::Value {
    fn from(id: &ObjectId) -> Self { serde_json::Value::String(id.to_hex()) }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.serialize_str(&self.to_hex()) }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        ObjectId::parse_hex(&s).map_err(serde::de::Error::custom)
    }
}
