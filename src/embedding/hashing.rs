/// Deterministic feature-hashing embedder
///
/// Offline fallback for environments without a cached sentence model, and the
/// provider used by tests. Bag-of-words with term-frequency weights, hashed
/// into a fixed number of buckets and L2-normalized. All components are
/// non-negative, so cosine similarity between two embeddings lies in [0, 1].
use super::{EmbeddingError, EmbeddingProvider};
use ahash::AHashMap;
use regex::Regex;

/// Each feature lands in this many buckets with decaying weight.
const PROBES: [f32; 3] = [1.0, 0.7, 0.5];

pub struct HashingEmbedder {
    dimension: usize,
    token_pattern: Regex,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::InitializationError(
                "Dimension must be greater than 0".to_string(),
            ));
        }

        let token_pattern = Regex::new(r"[\p{L}\p{N}]+")
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            dimension,
            token_pattern,
        })
    }

    /// Split text into hashed features.
    ///
    /// Latin-script words become one feature each. Runs of CJK ideographs have
    /// no word boundaries, so they contribute every character and every
    /// adjacent character pair instead.
    fn features(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut features = Vec::new();

        for token in self.token_pattern.find_iter(&lowered) {
            let token = token.as_str();
            if token.chars().any(is_cjk) {
                let chars: Vec<char> = token.chars().collect();
                for c in &chars {
                    features.push(c.to_string());
                }
                for pair in chars.windows(2) {
                    features.push(pair.iter().collect());
                }
            } else {
                features.push(token.to_string());
            }
        }

        features
    }

    fn bucket(&self, feature: &str, probe: usize) -> usize {
        let mut hasher = blake3::Hasher::new();
        hasher.update(feature.as_bytes());
        hasher.update(&[probe as u8]);
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % self.dimension as u64) as usize
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];

        let features = self.features(text);
        if features.is_empty() {
            return Ok(vector);
        }

        let mut freq: AHashMap<&str, f32> = AHashMap::new();
        for feature in &features {
            *freq.entry(feature.as_str()).or_insert(0.0) += 1.0;
        }

        let total = features.len() as f32;
        for (feature, count) in &freq {
            let tf = count / total;
            for (probe, weight) in PROBES.iter().enumerate() {
                vector[self.bucket(feature, probe)] += tf * weight;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // kana
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}' // hangul
        | '\u{F900}'..='\u{FAFF}')
}
