//! Fixed-width random identifiers for namespace rows.
//!
//! Ids are 8 characters drawn from `[a-z0-9]`. The generator is not
//! cryptographic; do not use it for anything security sensitive.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::UidConfig;
use crate::errors::AtomGraphError;

pub const UID_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";
pub const UID_WIDTH: usize = 8;

pub struct UidGenerator<R = StdRng> {
    rng: R,
    max_attempts: u32,
}

impl UidGenerator<StdRng> {
    /// Seeded from `config.seed`, or from entropy when no seed is set.
    pub fn from_config(config: &UidConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(rng, config.max_attempts)
    }
}

impl<R: Rng> UidGenerator<R> {
    pub fn new(rng: R, max_attempts: u32) -> Self {
        Self { rng, max_attempts }
    }

    /// One candidate id, with no uniqueness check.
    pub fn draw(&mut self) -> String {
        (0..UID_WIDTH)
            .map(|_| char::from(UID_ALPHABET[self.rng.gen_range(0..UID_ALPHABET.len())]))
            .collect()
    }

    /// Draw until `exists` reports an unused id.
    ///
    /// Fails with `IdSpaceExhausted` after `max_attempts` draws, and passes
    /// through any error `exists` returns.
    pub fn generate<F>(&mut self, mut exists: F) -> Result<String, AtomGraphError>
    where
        F: FnMut(&str) -> Result<bool, AtomGraphError>,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.draw();
            if !exists(&candidate)? {
                return Ok(candidate);
            }
            tracing::debug!(attempt, candidate = %candidate, "uid collision, retrying");
        }
        Err(AtomGraphError::IdSpaceExhausted {
            attempts: self.max_attempts,
        })
    }
}

pub fn is_uid(candidate: &str) -> bool {
    candidate.len() == UID_WIDTH && candidate.bytes().all(|b| UID_ALPHABET.contains(&b))
}
