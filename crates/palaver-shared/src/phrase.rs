//! Secret recovery phrase generation.

use rand::Rng;

use crate::constants::PHRASE_WORD_COUNT;

/// Word list for recovery phrases.
const WORDS: [&str; 24] = [
    "apple", "banana", "cherry", "dragon", "eagle", "forest", "garden", "house",
    "island", "jungle", "knight", "lemon", "mountain", "ocean", "planet", "queen",
    "river", "star", "tiger", "umbrella", "village", "water", "xylophone", "yellow",
];

/// Generate a recovery phrase of four dictionary words joined by hyphens,
/// e.g. `tiger-ocean-apple-knight`.
pub fn generate_secret_phrase() -> String {
    let mut rng = rand::rngs::OsRng;
    let mut words = Vec::with_capacity(PHRASE_WORD_COUNT);
    for _ in 0..PHRASE_WORD_COUNT {
        words.push(WORDS[rng.gen_range(0..WORDS.len())]);
    }
    words.join("-")
}
