//! Embedding inference primitive: the batched GPU/ONNX call the orchestrator
//! treats as an opaque external dependency (§4.7's "alternative implementation
//! path" / §6's external interfaces). No concrete ONNX or GPU backend lives
//! here — only the trait boundary and a deterministic test double.

use ndarray::Array4;

use crate::error::IndexError;

/// Turns a batch of `[1, time, mel]` spectrograms, stacked as `[B,1,time,mel]`,
/// into `[B,dim]` embeddings. Implementations own whatever per-worker
/// resources the real model needs (ONNX session, GPU context, ...) and are
/// expected to be lazily constructed once per worker.
pub trait InferencePrimitive: Send + Sync {
    /// Output embedding dimensionality.
    fn embedding_dim(&self) -> usize;

    /// Run inference on `batch` (shape `[B,1,time,mel]`), returning `[B,dim]`.
    fn run_audio_inference(&self, batch: &Array4<f32>) -> Result<Vec<Vec<f32>>, IndexError>;
}

/// Deterministic stand-in used by tests and by callers with no real model
/// configured: reduces each `[1,time,mel]` slice to `embedding_dim` values
/// via a fixed, content-dependent projection so outputs are reproducible.
pub struct DeterministicTestInference {
    dim: usize,
}

impl DeterministicTestInference {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl InferencePrimitive for DeterministicTestInference {
    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn run_audio_inference(&self, batch: &Array4<f32>) -> Result<Vec<Vec<f32>>, IndexError> {
        let (b, _, time, mel) = batch.dim();
        let mut out = Vec::with_capacity(b);
        for i in 0..b {
            let slice = batch.slice(ndarray::s![i, 0, .., ..]);
            let mut embedding = vec![0.0f32; self.dim];
            for t in 0..time {
                for m in 0..mel {
                    let bucket = (t * mel + m) % self.dim;
                    embedding[bucket] += slice[[t, m]];
                }
            }
            out.push(embedding);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_inference_is_reproducible() {
        let inference = DeterministicTestInference::new(8);
        let batch = Array4::from_elem((2, 1, 4, 4), 1.0f32);
        let a = inference.run_audio_inference(&batch).unwrap();
        let b = inference.run_audio_inference(&batch).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].len(), 8);
    }
}
