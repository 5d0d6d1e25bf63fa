//! The forward-pass backend contract.
//!
//! A backend takes named input tensors and returns named output tensors for
//! one forward pass. Everything model-specific (weights, kernels, devices)
//! lives behind it.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context};
use ndarray::{Array1, Array2, ArrayD, Axis, Ix3};

pub const INPUT_IDS: &str = "input_ids";
pub const ATTENTION_MASK: &str = "attention_mask";
pub const POSITION_IDS: &str = "position_ids";
pub const LOGITS: &str = "logits";
pub const LAST_HIDDEN_STATE: &str = "last_hidden_state";
pub const ENCODER_HIDDEN_STATES: &str = "encoder_hidden_states";
pub const ENCODER_ATTENTION_MASK: &str = "encoder_attention_mask";

/// A dense tensor of one of the element types backends exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::F32(a) => a.shape(),
            Tensor::I64(a) => a.shape(),
        }
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::F32(a) => Some(a),
            Tensor::I64(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Tensor::I64(a) => Some(a),
            Tensor::F32(_) => None,
        }
    }

    /// A `[1, len]` row of token ids.
    pub fn ids(ids: &[u32]) -> Self {
        Self::row(ids.iter().map(|&id| id as i64))
    }

    /// A `[1, len]` row of ones.
    pub fn ones(len: usize) -> Self {
        Self::row(std::iter::repeat(1).take(len))
    }

    /// A `[1, len]` row of positions starting at `start`.
    pub fn positions(start: usize, len: usize) -> Self {
        Self::row((start..start + len).map(|p| p as i64))
    }

    fn row(values: impl Iterator<Item = i64>) -> Self {
        let values: Vec<i64> = values.collect();
        Tensor::I64(Array2::from_shape_fn((1, values.len()), |(_, j)| values[j]).into_dyn())
    }

    /// An empty key/value tensor of shape `[1, heads, 0, head_dim]`.
    pub fn empty_past(num_heads: usize, head_dim: usize) -> Self {
        Tensor::F32(ArrayD::zeros(vec![1, num_heads, 0, head_dim]))
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(a: ArrayD<f32>) -> Self {
        Tensor::F32(a)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(a: ArrayD<i64>) -> Self {
        Tensor::I64(a)
    }
}

pub type TensorMap = HashMap<String, Tensor>;

/// Extracts the last position's row from a `[1, seq, vocab]` logits output.
pub fn last_logits(outputs: &TensorMap) -> anyhow::Result<Array1<f32>> {
    let logits = outputs
        .get(LOGITS)
        .ok_or_else(|| anyhow!("backend output has no '{}' tensor", LOGITS))?
        .as_f32()
        .ok_or_else(|| anyhow!("'{}' must be a float tensor", LOGITS))?;
    let logits = logits
        .view()
        .into_dimensionality::<Ix3>()
        .context("logits must have shape [batch, seq, vocab]")?;
    let seq_len = logits.len_of(Axis(1));
    if logits.len_of(Axis(0)) == 0 || seq_len == 0 {
        anyhow::bail!("logits tensor is empty: shape {:?}", logits.shape());
    }
    Ok(logits.index_axis(Axis(0), 0).index_axis(Axis(0), seq_len - 1).to_owned())
}

/// Runs one forward pass over named tensors.
pub trait ForwardBackend: Send {
    fn run(&mut self, inputs: TensorMap) -> anyhow::Result<TensorMap>;

    /// Releases native resources. Called at most once by the owning session.
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Which network of a model a backend is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    /// The decoder of a decoder-only model, or of an encoder-decoder pair.
    Decoder,
    Encoder,
}

/// Opens backends for a resolved model directory.
pub trait BackendFactory {
    fn open(&self, model_dir: &Path, role: BackendRole) -> anyhow::Result<Box<dyn ForwardBackend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(&Path, BackendRole) -> anyhow::Result<Box<dyn ForwardBackend>>,
{
    fn open(&self, model_dir: &Path, role: BackendRole) -> anyhow::Result<Box<dyn ForwardBackend>> {
        self(model_dir, role)
    }
}
