//! Text embedding for semantic tool ranking.

pub const DEFAULT_DIMENSION: usize = 384;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding dimension must be > 0, got {dim}")]
    Dimension { dim: usize },

    #[error("embedding failed: {message}")]
    Backend { message: String },
}

/// Maps text to a fixed-dimension unit-norm vector.
///
/// The dimension is fixed for the process lifetime and the mapping is
/// deterministic within a process. Token-less input yields the zero vector.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// # Errors
    ///
    /// Returns `EmbedError::Backend` if the underlying model fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// # Errors
    ///
    /// Returns the first error encountered while embedding the batch.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Token-bucket embedder: lower-case alphanumeric tokens are hashed into
/// `dim` buckets and the bucket counts are L2-normalized.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// # Errors
    ///
    /// Returns `EmbedError::Dimension` for a zero dimension.
    pub fn new(dim: usize) -> Result<Self, EmbedError> {
        if dim == 0 {
            return Err(EmbedError::Dimension { dim });
        }
        Ok(Self { dim })
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIMENSION,
        }
    }
}

fn bucket(token: &str, dim: usize) -> usize {
    let hash = blake3::hash(token.as_bytes());
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&hash.as_bytes()[..4]);
    (u32::from_le_bytes(prefix) as usize) % dim
}

/// Lower-case alphanumeric runs, the same tokenization used for tag matching.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            vector[bucket(&token, self.dim)] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}
