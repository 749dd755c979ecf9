//! Request ID middleware
//!
//! Reuses an incoming request id header or generates one, stores it as the
//! `requestId` custom param and echoes it on the response.

use super::{Middleware, Next, Step};
use crate::{Request, Response};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom param the id is stored under
pub const REQUEST_ID_PARAM: &str = "requestId";

/// ID generator type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenerator {
    Uuid,
    NanoId,
    ShortId,
    Counter,
}

impl IdGenerator {
    pub fn generate(self) -> String {
        match self {
            IdGenerator::Uuid => generate_uuid(),
            IdGenerator::NanoId => generate_nano_id(),
            IdGenerator::ShortId => generate_short_id(),
            IdGenerator::Counter => generate_counter_id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestIdConfig {
    /// Header read from the request and written to the response
    pub header_name: String,
    /// Generate an id when the request carries none
    pub generate_id: bool,
    pub id_generator: IdGenerator,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self {
            header_name: "X-Request-ID".to_string(),
            generate_id: true,
            id_generator: IdGenerator::NanoId,
        }
    }
}

impl RequestIdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn generate_id(mut self, generate: bool) -> Self {
        self.generate_id = generate;
        self
    }

    pub fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }
}

/// Generate UUID v4
pub fn generate_uuid() -> String {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes);

    // version 4, RFC 4122 variant
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

const URL_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";

/// Generate NanoID (21 characters)
pub fn generate_nano_id() -> String {
    let mut bytes = [0u8; 21];
    fill_random(&mut bytes);
    // 64 symbols, so masking keeps the distribution uniform
    bytes.iter().map(|&b| URL_ALPHABET[(b & 63) as usize] as char).collect()
}

/// Generate short ID (8 alphanumeric characters)
pub fn generate_short_id() -> String {
    let alphanumeric = &URL_ALPHABET[..62];
    let mut bytes = [0u8; 8];
    fill_random(&mut bytes);
    bytes
        .iter()
        .map(|&b| alphanumeric[(b as usize) % alphanumeric.len()] as char)
        .collect()
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-wide monotonically increasing id
pub fn generate_counter_id() -> String {
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:016x}", count)
}

static SEED_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Fill buffer with pseudo-random bytes (not cryptographically secure)
fn fill_random(buf: &mut [u8]) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(nanos);
    hasher.write_u64(SEED_SEQUENCE.fetch_add(1, Ordering::Relaxed));
    let mut state = hasher.finish();

    for chunk in buf.chunks_mut(8) {
        // splitmix64
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        let bytes = z.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
}

/// Request ID middleware
#[derive(Debug, Clone, Default)]
pub struct RequestId {
    config: RequestIdConfig,
}

impl RequestId {
    pub fn new(config: RequestIdConfig) -> Self {
        Self { config }
    }
}

impl Middleware for RequestId {
    fn call(&self, req: &mut Request, res: &mut Response) -> Step {
        let incoming = req
            .get_header(&self.config.header_name)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let request_id = incoming.or_else(|| {
            self.config
                .generate_id
                .then(|| self.config.id_generator.generate())
        });

        if let Some(id) = request_id {
            res.set_header(self.config.header_name.clone(), id.clone());
            req.set_param(REQUEST_ID_PARAM, id);
        }

        Step::Ready(Ok(Next::Continue))
    }
}
