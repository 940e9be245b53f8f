//! Model backend abstraction
//!
//! The control plane never touches tensors directly. Everything model-shaped
//! goes through the [`ModelBackend`] seam: loading a base model, attaching a
//! low-rank adapter, driving the optimization loop, generating text and
//! persisting artifacts. The default implementation is the byte-level
//! [`tinylm::TinyLmBackend`]; tests substitute their own.

#[cfg(test)]
pub mod mock;
pub mod tinylm;

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Reduced-precision representation requested at model load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationMode {
    /// Full precision
    None,
    /// 8-bit quantized load
    EightBit,
    /// 4-bit quantized load
    FourBit,
}

/// Low-rank adapter configuration applied on top of a frozen base model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Adapter rank
    pub rank: usize,
    /// Scaling factor (alpha)
    pub alpha: f64,
    /// Adapter dropout probability
    pub dropout: f64,
    /// Names of the projection layers the adapter targets
    pub target_projections: Vec<String>,
    /// Whether to trade compute for activation memory during training
    pub gradient_checkpointing: bool,
    /// Seed for adapter parameter initialization
    pub seed: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            rank: 16,
            alpha: 16.0,
            dropout: 0.0,
            target_projections: vec![
                "q_proj".to_string(),
                "k_proj".to_string(),
                "v_proj".to_string(),
                "o_proj".to_string(),
                "gate_proj".to_string(),
                "up_proj".to_string(),
                "down_proj".to_string(),
            ],
            gradient_checkpointing: true,
            seed: 3407,
        }
    }
}

/// Learning-rate schedule over the fixed step budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LrSchedule {
    /// Linear warmup followed by linear decay to zero
    Linear,
    /// Constant learning rate after warmup
    Constant,
}

impl LrSchedule {
    /// Learning rate for `step` (1-based) under this schedule.
    pub fn lr_at(self, base_lr: f64, step: u32, total_steps: u32, warmup_steps: u32) -> f64 {
        if warmup_steps > 0 && step <= warmup_steps {
            return base_lr * f64::from(step) / f64::from(warmup_steps);
        }
        match self {
            Self::Constant => base_lr,
            Self::Linear => {
                let decay_span = total_steps.saturating_sub(warmup_steps).max(1);
                let remaining = total_steps.saturating_sub(step);
                base_lr * f64::from(remaining) / f64::from(decay_span)
            }
        }
    }
}

/// Parameters for one optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Exact number of optimization steps to run
    pub max_steps: u32,
    /// Peak learning rate
    pub learning_rate: f64,
    /// Per-device batch size
    pub batch_size: usize,
    /// Micro-batches accumulated per optimization step
    pub gradient_accumulation: usize,
    /// Warmup steps before the decay schedule kicks in
    pub warmup_steps: u32,
    /// Weight decay constant
    pub weight_decay: f64,
    /// Learning-rate schedule
    pub schedule: LrSchedule,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_steps: 60,
            learning_rate: 2e-4,
            batch_size: 1,
            gradient_accumulation: 4,
            warmup_steps: 5,
            weight_decay: 0.01,
            schedule: LrSchedule::Linear,
        }
    }
}

/// Per-step loss observation emitted by the optimization loop.
#[derive(Debug, Clone, Copy)]
pub struct StepLoss {
    /// Completed step (1-based)
    pub step: u32,
    /// Total step budget for the run
    pub total_steps: u32,
    /// Most recently observed scalar training loss
    pub loss: f64,
}

/// A loaded, ready-to-generate model.
#[async_trait]
pub trait ModelHandle: Send + Sync + std::fmt::Debug {
    /// Identifier this handle was loaded from
    fn identifier(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str, max_tokens: usize, temperature: f64) -> Result<String>;

    /// Downcast support for backends that need their concrete handle back
    fn as_any(&self) -> &dyn Any;
}

/// A base model with an attached adapter, ready for optimization.
#[async_trait]
pub trait TrainableModel: Send {
    /// Run the optimization loop for exactly `opts.max_steps` steps over
    /// `corpus`, emitting one [`StepLoss`] per completed step.
    async fn run_optimization(
        &mut self,
        corpus: &[String],
        opts: &OptimizationConfig,
        progress: mpsc::UnboundedSender<StepLoss>,
    ) -> Result<()>;

    /// Persist the adapted model and its vocabulary artifacts to `dir`.
    fn save(&self, dir: &Path) -> Result<()>;
}

/// Opaque collaborator that owns all tensor-level behavior.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Load a ready-to-generate model for `identifier`.
    async fn load(
        &self,
        identifier: &str,
        max_seq_len: usize,
        quantization: QuantizationMode,
    ) -> Result<Arc<dyn ModelHandle>>;

    /// Attach a low-rank adapter to a loaded base model, producing a
    /// trainable instance. Backends may downcast `base` to their own
    /// handle type.
    async fn attach_adapter(
        &self,
        base: Arc<dyn ModelHandle>,
        adapter: &AdapterConfig,
    ) -> Result<Box<dyn TrainableModel>>;

    /// Reclaim any device memory associated with previously loaded models.
    fn release_memory(&self);
}
