//! Correlation id generation.
//!
//! Ids are 8 characters drawn uniformly from lowercase letters and digits.
//! A candidate is accepted only if it is not currently pending; after
//! [`MAX_ID_ATTEMPTS`] collisions generation gives up with
//! [`ClientError::IdExhaustion`] instead of handing out a possibly colliding
//! id. Callers treat exhaustion as fatal for that request.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::envelope::MessageId;
use crate::error::ClientError;

/// Characters a correlation id is drawn from.
pub const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";

/// Length of every generated id.
pub const ID_LENGTH: usize = 8;

/// Candidates tried before giving up.
pub const MAX_ID_ATTEMPTS: usize = 100;

/// Random correlation id source.
#[derive(Debug)]
pub struct IdGenerator {
    rng: StdRng,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator, for reproducible tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate an id for which `is_taken` returns false.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::IdExhaustion` if every one of the
    /// [`MAX_ID_ATTEMPTS`] candidates was taken.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pending: HashSet<String> = HashSet::new();
    /// let id = generator.next_id(|candidate| pending.contains(candidate))?;
    /// ```
    pub fn next_id<F>(&mut self, is_taken: F) -> Result<MessageId, ClientError>
    where
        F: Fn(&str) -> bool,
    {
        for _ in 0..MAX_ID_ATTEMPTS {
            let candidate = self.candidate();
            if !is_taken(&candidate) {
                return Ok(MessageId::from(candidate));
            }
        }

        Err(ClientError::IdExhaustion {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    fn candidate(&mut self) -> String {
        (0..ID_LENGTH)
            .map(|_| ID_ALPHABET[self.rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashSet;

    #[test]
    fn test_id_shape() {
        let mut generator = IdGenerator::with_seed(7);
        for _ in 0..200 {
            let id = generator.next_id(|_| false).expect("id");
            assert_eq!(id.as_str().len(), ID_LENGTH);
            assert!(id.as_str().bytes().all(|b| ID_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_ids_never_collide_with_growing_set() {
        let mut generator = IdGenerator::with_seed(42);
        let mut existing: HashSet<String> = HashSet::new();

        for _ in 0..5_000 {
            let id = generator
                .next_id(|candidate| existing.contains(candidate))
                .expect("id");
            assert!(!existing.contains(id.as_str()), "collision on {}", id);
            existing.insert(id.into_inner());
        }
    }

    #[test]
    fn test_collision_is_retried() {
        let mut generator = IdGenerator::with_seed(1);
        let calls = Cell::new(0);

        // First three candidates are reported as taken
        let id = generator
            .next_id(|_| {
                calls.set(calls.get() + 1);
                calls.get() <= 3
            })
            .expect("id");

        assert_eq!(calls.get(), 4);
        assert_eq!(id.as_str().len(), ID_LENGTH);
    }

    #[test]
    fn test_exhaustion_after_bounded_attempts() {
        let mut generator = IdGenerator::with_seed(3);
        let calls = Cell::new(0);

        let result = generator.next_id(|_| {
            calls.set(calls.get() + 1);
            true
        });

        assert!(matches!(
            result,
            Err(ClientError::IdExhaustion { attempts }) if attempts == MAX_ID_ATTEMPTS
        ));
        assert_eq!(calls.get(), MAX_ID_ATTEMPTS);
    }
}
