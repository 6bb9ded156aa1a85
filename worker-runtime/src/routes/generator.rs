//! Synthetic payload generators for benchmarks.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde_json::{json, Value};

/// Custom payload generator supplied by the embedding application.
pub trait PayloadGenerator: Send + Sync {
    fn generate(&self) -> Value;
}

/// Produces one benchmark payload per call.
#[derive(Clone)]
pub enum BenchmarkGenerator {
    /// OpenAI-style `/v1/completions` body with a random prompt.
    Completions {
        model: String,
        words: usize,
        max_tokens: u32,
        temperature: f64,
    },
    /// OpenAI-style `/v1/chat/completions` body with a single random user message.
    Chat {
        model: String,
        words: usize,
        max_tokens: u32,
        temperature: f64,
    },
    Custom(Arc<dyn PayloadGenerator>),
}

impl BenchmarkGenerator {
    pub fn generate(&self) -> Value {
        match self {
            BenchmarkGenerator::Completions {
                model,
                words,
                max_tokens,
                temperature,
            } => json!({
                "model": model,
                "prompt": random_text(*words),
                "temperature": temperature,
                "max_tokens": max_tokens,
            }),
            BenchmarkGenerator::Chat {
                model,
                words,
                max_tokens,
                temperature,
            } => json!({
                "model": model,
                "messages": [
                    {"role": "user", "content": random_text(*words)}
                ],
                "temperature": temperature,
                "max_tokens": max_tokens,
            }),
            BenchmarkGenerator::Custom(generator) => generator.generate(),
        }
    }
}

impl fmt::Debug for BenchmarkGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchmarkGenerator::Completions { model, words, .. } => f
                .debug_struct("Completions")
                .field("model", model)
                .field("words", words)
                .finish_non_exhaustive(),
            BenchmarkGenerator::Chat { model, words, .. } => f
                .debug_struct("Chat")
                .field("model", model)
                .field("words", words)
                .finish_non_exhaustive(),
            BenchmarkGenerator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// `count` random lowercase words of 3 to 10 letters, space separated.
pub fn random_text(count: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut words = Vec::with_capacity(count);
    for _ in 0..count {
        let len = rng.gen_range(3..=10);
        let word: String = (0..len)
            .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
            .collect();
        words.push(word);
    }
    words.join(" ")
}
