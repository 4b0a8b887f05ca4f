//! Deterministic text embedding into binary hypervectors.
//!
//! Every token maps to a fixed random vector seeded from its hash, and a
//! text is the majority-vote bundle of its tokens. Texts sharing words end
//! up close in Hamming distance without any model or network call.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::{Rng, SeedableRng};
use unicode_normalization::UnicodeNormalization;

/// Default number of components per vector.
pub const DEFAULT_DIMENSION: usize = 1024;

/// Embeds text as vectors of 0/1 components.
#[derive(Debug, Clone, Copy)]
pub struct TextEmbedder {
    dim: usize,
}

impl Default for TextEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl TextEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// NFKC-normalized, lower-cased alphanumeric words.
    pub fn tokens(text: &str) -> Vec<String> {
        let normalized: String = text.nfkc().collect::<String>().to_lowercase();
        normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// The vector for one token. Same token, same vector.
    pub fn token_vector(&self, token: &str) -> Vec<u8> {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let mut rng = rand::rngs::StdRng::seed_from_u64(hasher.finish());
        (0..self.dim).map(|_| rng.r#gen::<bool>() as u8).collect()
    }

    /// Bundle of the text's token vectors, or `None` for text without words.
    pub fn embed(&self, text: &str) -> Option<Vec<u8>> {
        let tokens = Self::tokens(text);
        if tokens.is_empty() {
            return None;
        }

        let mut acc = vec![0i32; self.dim];
        for token in &tokens {
            for (slot, bit) in acc.iter_mut().zip(self.token_vector(token)) {
                *slot += if bit == 1 { 1 } else { -1 };
            }
        }

        // Ties break on component parity.
        Some(
            acc.iter()
                .enumerate()
                .map(|(i, &v)| (v > 0 || (v == 0 && i % 2 == 0)) as u8)
                .collect(),
        )
    }

    /// Fraction of equal components, 0.0 to 1.0.
    pub fn similarity(a: &[u8], b: &[u8]) -> f32 {
        if a.is_empty() || a.len() != b.len() {
            return 0.0;
        }
        let same = a.iter().zip(b).filter(|(x, y)| x == y).count();
        same as f32 / a.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_normalized() {
        assert_eq!(
            TextEmbedder::tokens("Napoleon born-in ＣＯＲＳＩＣＡ, 1769!"),
            ["napoleon", "born", "in", "corsica", "1769"]
        );
        assert!(TextEmbedder::tokens(" -- ").is_empty());
    }

    #[test]
    fn embedding_is_deterministic() {
        let e = TextEmbedder::new(256);
        assert_eq!(e.embed("napoleon born in corsica"), e.embed("napoleon born in corsica"));
        assert_eq!(e.token_vector("x").len(), 256);
        assert!(e.embed("...").is_none());
    }

    #[test]
    fn shared_words_are_closer() {
        let e = TextEmbedder::default();
        let fact = e.embed("napoleon born in corsica").unwrap();
        let related = e.embed("where was napoleon born").unwrap();
        let unrelated = e.embed("tokyo population growth statistics").unwrap();

        let near = TextEmbedder::similarity(&fact, &related);
        let far = TextEmbedder::similarity(&fact, &unrelated);
        assert!(near > far, "near={near} far={far}");
        assert!(near > 0.6, "near={near}");
    }

    #[test]
    fn single_token_embeds_to_its_vector() {
        let e = TextEmbedder::new(128);
        assert_eq!(e.embed("Napoleon").unwrap(), e.token_vector("napoleon"));
    }
}
