//! Byte-level reference backend
//!
//! A deliberately small causal model over raw bytes: mean-pooled byte-window
//! embeddings through a frozen two-layer MLP, with a trainable low-rank A/B
//! adapter on the hidden projection. It exists to give the control plane a
//! real, end-to-end trainable collaborator — load, adapt, optimize, sample,
//! persist — not to produce good text. The tensor work runs on candle.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Embedding, Module, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    AdapterConfig, ModelBackend, ModelHandle, OptimizationConfig, QuantizationMode, StepLoss,
    TrainableModel,
};
use crate::error::{Error, Result};

/// 256 byte values plus one end-of-text id
const VOCAB_SIZE: usize = 257;
const EOS_ID: u32 = 256;
const EMBED_DIM: usize = 64;
const HIDDEN_DIM: usize = 128;
const MAX_CONTEXT: usize = 32;
/// Seed for fresh base-weight initialization
const BASE_SEED: u64 = 3407;

/// Prefix marking identifiers the backend may initialize from scratch
const BUILTIN_PREFIX: &str = "tinylm/";

/// Artifact metadata, written last so its presence marks a complete save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TinyLmConfig {
    pub vocab_size: usize,
    pub embed_dim: usize,
    pub hidden_dim: usize,
    pub context: usize,
    pub rank: usize,
    pub alpha: f64,
    pub base_model: String,
}

/// Frozen base parameters. Plain tensors, never part of a gradient graph
/// on their own.
#[derive(Clone)]
struct BaseWeights {
    tok_emb: Tensor,
    w1: Tensor,
    b1: Tensor,
    w2: Tensor,
    b2: Tensor,
}

impl BaseWeights {
    fn seeded(device: &Device) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(BASE_SEED);
        Ok(Self {
            tok_emb: uniform_tensor(&mut rng, &[VOCAB_SIZE, EMBED_DIM], 0.05, device)?,
            w1: uniform_tensor(&mut rng, &[HIDDEN_DIM, EMBED_DIM], 0.05, device)?,
            b1: Tensor::zeros(HIDDEN_DIM, DType::F32, device)?,
            w2: uniform_tensor(&mut rng, &[VOCAB_SIZE, HIDDEN_DIM], 0.05, device)?,
            b2: Tensor::zeros(VOCAB_SIZE, DType::F32, device)?,
        })
    }

    fn from_file(path: &Path, device: &Device) -> Result<Self> {
        let tensors = candle_core::safetensors::load(path, device)?;
        let get = |name: &str| -> Result<Tensor> {
            tensors
                .get(name)
                .cloned()
                .ok_or_else(|| Error::backend_load(format!("missing tensor '{name}'")))
        };
        Ok(Self {
            tok_emb: get("tok_emb")?,
            w1: get("w1")?,
            b1: get("b1")?,
            w2: get("w2")?,
            b2: get("b2")?,
        })
    }

    fn to_map(&self) -> HashMap<String, Tensor> {
        HashMap::from([
            ("tok_emb".to_string(), self.tok_emb.clone()),
            ("w1".to_string(), self.w1.clone()),
            ("b1".to_string(), self.b1.clone()),
            ("w2".to_string(), self.w2.clone()),
            ("b2".to_string(), self.b2.clone()),
        ])
    }
}

fn uniform_tensor(rng: &mut StdRng, shape: &[usize], std: f32, device: &Device) -> Result<Tensor> {
    let n: usize = shape.iter().product();
    let data: Vec<f32> = (0..n).map(|_| (rng.random::<f32>() - 0.5) * 2.0 * std).collect();
    Ok(Tensor::from_vec(data, shape, device)?)
}

fn encode(text: &str) -> Vec<u32> {
    text.bytes().map(u32::from).collect()
}

fn decode(tokens: &[u32]) -> String {
    let bytes: Vec<u8> = tokens
        .iter()
        .filter(|&&t| t < 256)
        .map(|&t| t as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Left-pad `tokens[..end]` with EOS into a fixed-size window.
fn window_at(tokens: &[u32], end: usize, context: usize) -> Vec<u32> {
    let start = end.saturating_sub(context);
    let mut window = vec![EOS_ID; context - (end - start)];
    window.extend_from_slice(&tokens[start..end]);
    window
}

/// Forward pass shared by inference and training.
///
/// `windows` is a `[batch, context]` u32 tensor; the result is
/// `[batch, vocab]` next-byte logits. The adapter delta is added before the
/// nonlinearity, scaled by alpha/rank.
fn forward(
    base: &BaseWeights,
    adapter: Option<(&Tensor, &Tensor, f64)>,
    windows: &Tensor,
) -> Result<Tensor> {
    let embedding = Embedding::new(base.tok_emb.clone(), EMBED_DIM);
    let embedded = embedding.forward(windows)?;
    let pooled = embedded.mean(1)?;

    let mut hidden = pooled.matmul(&base.w1.t()?)?.broadcast_add(&base.b1)?;
    if let Some((lora_a, lora_b, scale)) = adapter {
        let delta = pooled
            .matmul(&lora_a.t()?)?
            .matmul(&lora_b.t()?)?
            .affine(scale, 0.0)?;
        hidden = (hidden + delta)?;
    }
    let hidden = hidden.tanh()?;
    let logits = hidden.matmul(&base.w2.t()?)?.broadcast_add(&base.b2)?;
    Ok(logits)
}

/// A loaded tinylm model, ready to generate.
pub struct TinyLmModel {
    identifier: String,
    base: BaseWeights,
    /// Merged-in adapter, present when loaded from trained artifacts
    adapter: Option<(Tensor, Tensor, f64)>,
    context: usize,
    device: Device,
}

impl std::fmt::Debug for TinyLmModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TinyLmModel")
            .field("identifier", &self.identifier)
            .field("context", &self.context)
            .field("has_adapter", &self.adapter.is_some())
            .finish()
    }
}

impl TinyLmModel {
    fn next_token(&self, tokens: &[u32], temperature: f64) -> Result<u32> {
        let window = window_at(tokens, tokens.len(), self.context);
        let input = Tensor::from_vec(window, (1, self.context), &self.device)?;
        let adapter = self
            .adapter
            .as_ref()
            .map(|(a, b, scale)| (a, b, *scale));
        let logits = forward(&self.base, adapter, &input)?;
        let logits: Vec<f32> = logits.squeeze(0)?.to_vec1()?;
        Ok(sample(&logits, temperature))
    }
}

/// Temperature sampling over raw logits; non-positive temperature is greedy.
fn sample(logits: &[f32], temperature: f64) -> u32 {
    if temperature <= 0.0 {
        return argmax(logits);
    }
    let scaled: Vec<f32> = logits.iter().map(|l| l / temperature as f32).collect();
    let max = scaled.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scaled.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exp.iter().sum();

    let mut rng = rand::rng();
    let mut threshold = rng.random::<f32>() * total;
    for (i, weight) in exp.iter().enumerate() {
        threshold -= weight;
        if threshold <= 0.0 {
            return i as u32;
        }
    }
    argmax(logits)
}

fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0;
    for (i, l) in logits.iter().enumerate() {
        if *l > logits[best] {
            best = i;
        }
    }
    best as u32
}

#[async_trait]
impl ModelHandle for TinyLmModel {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn generate(&self, prompt: &str, max_tokens: usize, temperature: f64) -> Result<String> {
        let mut tokens = encode(prompt);
        let mut generated = Vec::new();
        for _ in 0..max_tokens {
            let next = self.next_token(&tokens, temperature)?;
            if next == EOS_ID {
                break;
            }
            tokens.push(next);
            generated.push(next);
        }
        Ok(decode(&generated))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A base model with a trainable adapter attached.
pub struct TinyLmTrainable {
    base: BaseWeights,
    lora_a: Var,
    lora_b: Var,
    scale: f64,
    seed: u64,
    context: usize,
    device: Device,
    config: TinyLmConfig,
}

impl TinyLmTrainable {
    /// One averaged micro-batch loss. Windows are sampled with repetition,
    /// so the fixed step budget works for any corpus size.
    fn micro_loss(
        &self,
        tokenized: &[Vec<u32>],
        batch_size: usize,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        let mut windows = Vec::with_capacity(batch_size * self.context);
        let mut targets = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            let text = &tokenized[rng.random_range(0..tokenized.len())];
            let position = rng.random_range(1..text.len());
            windows.extend(window_at(text, position, self.context));
            targets.push(text[position]);
        }

        let windows = Tensor::from_vec(windows, (batch_size, self.context), &self.device)?;
        let targets = Tensor::from_vec(targets, batch_size, &self.device)?;
        let logits = forward(
            &self.base,
            Some((self.lora_a.as_tensor(), self.lora_b.as_tensor(), self.scale)),
            &windows,
        )?;
        Ok(candle_nn::loss::cross_entropy(&logits, &targets)?)
    }
}

#[async_trait]
impl TrainableModel for TinyLmTrainable {
    async fn run_optimization(
        &mut self,
        corpus: &[String],
        opts: &OptimizationConfig,
        progress: mpsc::UnboundedSender<StepLoss>,
    ) -> Result<()> {
        let tokenized: Vec<Vec<u32>> = corpus
            .iter()
            .map(|text| encode(text))
            .filter(|tokens| tokens.len() >= 2)
            .collect();
        if tokenized.is_empty() {
            return Err(Error::backend_training(
                "corpus contains no trainable text",
            ));
        }

        let mut optimizer = AdamW::new(
            vec![self.lora_a.clone(), self.lora_b.clone()],
            ParamsAdamW {
                lr: opts.learning_rate,
                weight_decay: opts.weight_decay,
                ..ParamsAdamW::default()
            },
        )
        .map_err(|e| Error::backend_training(e.to_string()))?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let accumulation = opts.gradient_accumulation.max(1);

        for step in 1..=opts.max_steps {
            optimizer.set_learning_rate(opts.schedule.lr_at(
                opts.learning_rate,
                step,
                opts.max_steps,
                opts.warmup_steps,
            ));

            let mut accumulated = self.micro_loss(&tokenized, opts.batch_size.max(1), &mut rng)?;
            for _ in 1..accumulation {
                let micro = self.micro_loss(&tokenized, opts.batch_size.max(1), &mut rng)?;
                accumulated = (accumulated + micro)?;
            }
            let loss = accumulated.affine(1.0 / accumulation as f64, 0.0)?;

            optimizer
                .backward_step(&loss)
                .map_err(|e| Error::backend_training(e.to_string()))?;

            let loss_value = f64::from(loss.to_scalar::<f32>()?);
            let _ = progress.send(StepLoss {
                step,
                total_steps: opts.max_steps,
                loss: loss_value,
            });
            // keep the progress forwarder responsive during long runs
            tokio::task::yield_now().await;
        }

        Ok(())
    }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        candle_core::safetensors::save(&self.base.to_map(), dir.join("base.safetensors"))?;

        let adapter = HashMap::from([
            ("lora_a".to_string(), self.lora_a.as_tensor().clone()),
            ("lora_b".to_string(), self.lora_b.as_tensor().clone()),
        ]);
        candle_core::safetensors::save(&adapter, dir.join("adapter.safetensors"))?;

        let vocab = serde_json::json!({
            "type": "byte",
            "vocab_size": VOCAB_SIZE,
            "eos_id": EOS_ID,
        });
        std::fs::write(dir.join("vocab.json"), serde_json::to_string_pretty(&vocab)?)?;

        // config.json goes last; listings treat it as the completeness marker
        std::fs::write(
            dir.join("config.json"),
            serde_json::to_string_pretty(&self.config)?,
        )?;

        info!("saved tinylm artifacts to {}", dir.display());
        Ok(())
    }
}

/// Default model backend.
pub struct TinyLmBackend {
    device: Device,
}

impl TinyLmBackend {
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
        }
    }

    fn load_from_dir(&self, identifier: &str, dir: &Path, context: usize) -> Result<TinyLmModel> {
        let config: TinyLmConfig =
            serde_json::from_str(&std::fs::read_to_string(dir.join("config.json"))?)?;
        let base = BaseWeights::from_file(&dir.join("base.safetensors"), &self.device)?;

        let adapter_path = dir.join("adapter.safetensors");
        let adapter = if adapter_path.exists() {
            let tensors = candle_core::safetensors::load(&adapter_path, &self.device)?;
            match (tensors.get("lora_a"), tensors.get("lora_b")) {
                (Some(a), Some(b)) => Some((
                    a.clone(),
                    b.clone(),
                    config.alpha / config.rank.max(1) as f64,
                )),
                _ => return Err(Error::backend_load("adapter file is missing tensors")),
            }
        } else {
            None
        };

        Ok(TinyLmModel {
            identifier: identifier.to_string(),
            base,
            adapter,
            context: config.context.min(context),
            device: self.device.clone(),
        })
    }
}

impl Default for TinyLmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for TinyLmBackend {
    async fn load(
        &self,
        identifier: &str,
        max_seq_len: usize,
        quantization: QuantizationMode,
    ) -> Result<Arc<dyn ModelHandle>> {
        // The reference backend always computes in f32; the quantization
        // mode only shapes the recorded artifact metadata upstream.
        debug!(
            "loading '{}' (max_seq_len {}, quantization {:?})",
            identifier, max_seq_len, quantization
        );
        let context = MAX_CONTEXT.min(max_seq_len.max(1));

        let dir = Path::new(identifier);
        if dir.join("config.json").exists() {
            return Ok(Arc::new(self.load_from_dir(identifier, dir, context)?));
        }

        if identifier.starts_with(BUILTIN_PREFIX) {
            info!("initializing fresh base model for '{}'", identifier);
            return Ok(Arc::new(TinyLmModel {
                identifier: identifier.to_string(),
                base: BaseWeights::seeded(&self.device)?,
                adapter: None,
                context,
                device: self.device.clone(),
            }));
        }

        Err(Error::model_not_found(identifier))
    }

    async fn attach_adapter(
        &self,
        base: Arc<dyn ModelHandle>,
        adapter: &AdapterConfig,
    ) -> Result<Box<dyn TrainableModel>> {
        let model = base
            .as_any()
            .downcast_ref::<TinyLmModel>()
            .ok_or_else(|| Error::backend_load("handle was not produced by this backend"))?;

        let mut rng = StdRng::seed_from_u64(adapter.seed);
        let lora_a = Var::from_tensor(&uniform_tensor(
            &mut rng,
            &[adapter.rank, EMBED_DIM],
            0.05,
            &self.device,
        )?)?;
        // B starts at zero so the adapter is a no-op before training
        let lora_b = Var::from_tensor(&Tensor::zeros(
            (HIDDEN_DIM, adapter.rank),
            DType::F32,
            &self.device,
        )?)?;

        Ok(Box::new(TinyLmTrainable {
            base: model.base.clone(),
            lora_a,
            lora_b,
            scale: adapter.alpha / adapter.rank.max(1) as f64,
            seed: adapter.seed,
            context: model.context,
            device: self.device.clone(),
            config: TinyLmConfig {
                vocab_size: VOCAB_SIZE,
                embed_dim: EMBED_DIM,
                hidden_dim: HIDDEN_DIM,
                context: model.context,
                rank: adapter.rank,
                alpha: adapter.alpha,
                base_model: model.identifier.clone(),
            },
        }))
    }

    fn release_memory(&self) {
        // CPU tensors free when their handles drop; nothing to reclaim here.
        debug!("release_memory: no device allocator to flush");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LrSchedule;

    fn opts(max_steps: u32) -> OptimizationConfig {
        OptimizationConfig {
            max_steps,
            learning_rate: 1e-3,
            batch_size: 2,
            gradient_accumulation: 2,
            warmup_steps: 1,
            weight_decay: 0.01,
            schedule: LrSchedule::Linear,
        }
    }

    #[tokio::test]
    async fn unknown_identifier_is_model_not_found() {
        let backend = TinyLmBackend::new();
        let err = backend
            .load("models/absent", 1024, QuantizationMode::FourBit)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn builtin_base_loads_and_generates() {
        let backend = TinyLmBackend::new();
        let model = backend
            .load("tinylm/base", 1024, QuantizationMode::FourBit)
            .await
            .unwrap();
        assert_eq!(model.identifier(), "tinylm/base");
        // greedy decoding over fresh weights still has to terminate cleanly
        assert!(model.generate("hello", 8, 0.0).await.is_ok());
    }

    #[tokio::test]
    async fn train_save_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("advisor");
        let backend = TinyLmBackend::new();

        let base = backend
            .load("tinylm/base", 1024, QuantizationMode::FourBit)
            .await
            .unwrap();
        let mut trainable = backend
            .attach_adapter(base, &AdapterConfig::default())
            .await
            .unwrap();

        let corpus = vec![
            "### Instruction:\nsave money\n\n### Response:\nbudget first".to_string(),
            "### Instruction:\npay debt\n\n### Response:\nhighest rate first".to_string(),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        trainable
            .run_optimization(&corpus, &opts(3), tx)
            .await
            .unwrap();

        let mut losses = Vec::new();
        while let Ok(step) = rx.try_recv() {
            assert!(step.loss.is_finite());
            losses.push(step.step);
        }
        assert_eq!(losses, vec![1, 2, 3]);

        trainable.save(&out).unwrap();
        assert!(out.join("base.safetensors").exists());
        assert!(out.join("adapter.safetensors").exists());
        assert!(out.join("vocab.json").exists());
        assert!(out.join("config.json").exists());

        // reload from the artifact directory and generate
        let reloaded = backend
            .load(out.to_str().unwrap(), 1024, QuantizationMode::FourBit)
            .await
            .unwrap();
        assert!(reloaded.generate("how do I budget?", 8, 0.7).await.is_ok());
    }

    #[test]
    fn window_is_left_padded_to_context() {
        let tokens = encode("abc");
        let window = window_at(&tokens, 2, 5);
        assert_eq!(window, vec![EOS_ID, EOS_ID, EOS_ID, u32::from(b'a'), u32::from(b'b')]);
    }

    #[test]
    fn greedy_sampling_picks_the_peak() {
        let logits = vec![0.1, 3.0, -1.0];
        assert_eq!(sample(&logits, 0.0), 1);
    }

    #[test]
    fn byte_round_trip_survives_decode() {
        let tokens = encode("budget $40k");
        assert_eq!(decode(&tokens), "budget $40k");
    }
}
