//! Collision-checked identifier generation.
//!
//! Ids key both the channel namespace and the persisted history record a
//! channel represents, so fresh ones are minted against the store with
//! check-and-retry.

use rand::Rng;
use std::future::Future;
use thiserror::Error;

/// Digits, uppercase, lowercase: 62 symbols.
pub const DEFAULT_ALPHABET: &str =
    "1234567890ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Default id length.
pub const DEFAULT_LENGTH: usize = 6;

/// Retry cap for [`IdentityGenerator::create_unique`]. Hitting it means the
/// id space is effectively full, a capacity failure rather than bad luck.
const MAX_UNIQUE_ATTEMPTS: usize = 128;

/// Identifier generation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The alphabet has no symbols to draw from.
    #[error("identifier alphabet must not be empty")]
    EmptyAlphabet,

    /// Zero-length ids cannot be unique.
    #[error("identifier length must be non-zero")]
    ZeroLength,

    /// Every attempt collided with an existing id.
    #[error("exhausted identifier space after {0} attempts")]
    SpaceExhausted(usize),
}

/// Generates fixed-length ids from a fixed alphabet.
#[derive(Debug, Clone)]
pub struct IdentityGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.chars().collect(),
            length: DEFAULT_LENGTH,
        }
    }
}

impl IdentityGenerator {
    /// Create a generator over a custom alphabet and length.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty alphabet or zero length.
    pub fn new(alphabet: &str, length: usize) -> Result<Self, IdentityError> {
        if alphabet.is_empty() {
            return Err(IdentityError::EmptyAlphabet);
        }
        if length == 0 {
            return Err(IdentityError::ZeroLength);
        }
        Ok(Self {
            alphabet: alphabet.chars().collect(),
            length,
        })
    }

    /// Draw one id. Uniqueness is the caller's concern; see
    /// [`Self::create_unique`].
    #[must_use]
    pub fn generate(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.random_range(0..self.alphabet.len())])
            .collect()
    }

    /// Mint an id the predicate reports as unused.
    ///
    /// The predicate is the only side channel; generation itself writes
    /// nothing. Retries are bounded so a saturated id space fails instead of
    /// spinning forever.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::SpaceExhausted`] when every attempt
    /// collided.
    pub async fn create_unique<F, Fut>(&self, mut exists: F) -> Result<String, IdentityError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..MAX_UNIQUE_ATTEMPTS {
            let id = self.generate();
            if !exists(id.clone()).await {
                return Ok(id);
            }
        }
        Err(IdentityError::SpaceExhausted(MAX_UNIQUE_ATTEMPTS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_use_the_default_alphabet_and_length() {
        let generator = IdentityGenerator::default();
        for _ in 0..100 {
            let id = generator.generate();
            assert_eq!(id.len(), DEFAULT_LENGTH);
            assert!(id.chars().all(|c| DEFAULT_ALPHABET.contains(c)));
        }
    }

    #[test]
    fn custom_alphabet_and_length() {
        let generator = IdentityGenerator::new("ab", 10).unwrap();
        let id = generator.generate();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert_eq!(
            IdentityGenerator::new("", 6).unwrap_err(),
            IdentityError::EmptyAlphabet
        );
        assert_eq!(
            IdentityGenerator::new("abc", 0).unwrap_err(),
            IdentityError::ZeroLength
        );
    }

    #[tokio::test]
    async fn create_unique_skips_taken_ids() {
        // With a two-symbol space, the only free id must come back
        let generator = IdentityGenerator::new("ab", 1).unwrap();
        let id = generator
            .create_unique(|candidate| async move { candidate == "a" })
            .await
            .unwrap();
        assert_eq!(id, "b");
    }

    #[tokio::test]
    async fn create_unique_returns_the_first_free_id() {
        let generator = IdentityGenerator::default();
        let mut calls = 0;
        let id = generator
            .create_unique(|_| {
                calls += 1;
                let taken = calls <= 3;
                async move { taken }
            })
            .await
            .unwrap();
        assert_eq!(calls, 4);
        assert_eq!(id.len(), DEFAULT_LENGTH);
    }

    #[tokio::test]
    async fn a_saturated_id_space_is_fatal() {
        let generator = IdentityGenerator::new("a", 1).unwrap();
        let err = generator
            .create_unique(|_| async { true })
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::SpaceExhausted(_)));
    }
}
