//! A [ContentHash] is a 128-bit digest built by appending typed values one at
//! a time.
//!
//! Two hashes compare equal exactly when they were produced by identical
//! append sequences, so a hash doubles as a cheap equality proxy for whatever
//! was appended into it.  Each append folds the previous digest, a type
//! discriminant and the value's bytes through BLAKE3, so `append_u32(1)` and
//! `append_u64(1)` produce different results, as do the same values appended
//! in a different order.
//!
//! The hash is a cache key, not a cryptographic commitment; collisions are
//! treated as negligible rather than impossible.
use std::fmt;

const TAG_BOOL: u8 = 1;
const TAG_U8: u8 = 2;
const TAG_I32: u8 = 3;
const TAG_U32: u8 = 4;
const TAG_I64: u8 = 5;
const TAG_U64: u8 = 6;
const TAG_F32: u8 = 7;
const TAG_F64: u8 = 8;
const TAG_STR: u8 = 9;
const TAG_BYTES: u8 = 10;
const TAG_HASH: u8 = 11;
const TAG_I64_SLICE: u8 = 12;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// The empty hash: nothing appended yet.
    pub fn new() -> ContentHash {
        Default::default()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> ContentHash {
        ContentHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Fold `(current digest, tag, value bytes)` into the next digest.
    fn absorb(&mut self, tag: u8, bytes: &[u8]) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.0);
        hasher.update(&[tag]);
        hasher.update(bytes);
        hasher.finalize_xof().fill(&mut self.0);
    }

    pub fn append_bool(&mut self, value: bool) {
        self.absorb(TAG_BOOL, &[value as u8]);
    }

    pub fn append_u8(&mut self, value: u8) {
        self.absorb(TAG_U8, &[value]);
    }

    pub fn append_i32(&mut self, value: i32) {
        self.absorb(TAG_I32, &value.to_le_bytes());
    }

    pub fn append_u32(&mut self, value: u32) {
        self.absorb(TAG_U32, &value.to_le_bytes());
    }

    pub fn append_i64(&mut self, value: i64) {
        self.absorb(TAG_I64, &value.to_le_bytes());
    }

    pub fn append_u64(&mut self, value: u64) {
        self.absorb(TAG_U64, &value.to_le_bytes());
    }

    /// Floats are appended by bit pattern, so `-0.0` and `0.0` hash
    /// differently and NaNs hash by representation.
    pub fn append_f32(&mut self, value: f32) {
        self.absorb(TAG_F32, &value.to_bits().to_le_bytes());
    }

    pub fn append_f64(&mut self, value: f64) {
        self.absorb(TAG_F64, &value.to_bits().to_le_bytes());
    }

    pub fn append_str(&mut self, value: &str) {
        self.absorb(TAG_STR, value.as_bytes());
    }

    pub fn append_bytes(&mut self, value: &[u8]) {
        self.absorb(TAG_BYTES, value);
    }

    /// Append another hash, typically a child object's content hash.
    pub fn append_hash(&mut self, other: &ContentHash) {
        self.absorb(TAG_HASH, &other.0);
    }

    /// Append a whole slice as one value, length included.
    pub fn append_i64_slice(&mut self, values: &[i64]) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.0);
        hasher.update(&[TAG_I64_SLICE]);
        hasher.update(&(values.len() as u64).to_le_bytes());
        for v in values {
            hasher.update(&v.to_le_bytes());
        }
        hasher.finalize_xof().fill(&mut self.0);
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(&self.0[..4]))
    }
}
