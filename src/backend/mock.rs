//! Scriptable backend used across unit tests
//!
//! Counts every load/training/release call and can be told to fail either
//! path, so tests can assert call counts and exercise failure handling
//! without touching tensors.

use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    AdapterConfig, ModelBackend, ModelHandle, OptimizationConfig, QuantizationMode, StepLoss,
    TrainableModel,
};
use crate::error::{Error, Result};

pub struct MockBackend {
    pub loads: AtomicUsize,
    pub trainings: AtomicUsize,
    pub releases: AtomicUsize,
    fail_loads: AtomicBool,
    fail_training: AtomicBool,
    load_delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            trainings: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            fail_loads: AtomicBool::new(false),
            fail_training: AtomicBool::new(false),
            load_delay: None,
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn failing_loads(self) -> Self {
        self.fail_loads.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_training(self) -> Self {
        self.fail_training.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_training(&self, fail: bool) {
        self.fail_training.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MockHandle {
    identifier: String,
}

#[async_trait]
impl ModelHandle for MockHandle {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn generate(
        &self,
        _prompt: &str,
        _max_tokens: usize,
        _temperature: f64,
    ) -> Result<String> {
        Ok("### Response:\nmock reply".to_string())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockTrainable {
    fail: bool,
}

#[async_trait]
impl TrainableModel for MockTrainable {
    async fn run_optimization(
        &mut self,
        _corpus: &[String],
        opts: &OptimizationConfig,
        progress: mpsc::UnboundedSender<StepLoss>,
    ) -> Result<()> {
        for step in 1..=opts.max_steps {
            if self.fail {
                return Err(Error::backend_training("simulated optimization failure"));
            }
            let _ = progress.send(StepLoss {
                step,
                total_steps: opts.max_steps,
                loss: 2.0 / f64::from(step),
            });
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("adapter.safetensors"), b"mock")?;
        std::fs::write(dir.join("vocab.json"), b"{}")?;
        // written last, it marks the artifact complete
        std::fs::write(dir.join("config.json"), b"{\"mock\":true}")?;
        Ok(())
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn load(
        &self,
        identifier: &str,
        _max_seq_len: usize,
        _quantization: QuantizationMode,
    ) -> Result<Arc<dyn ModelHandle>> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::backend_load("simulated load failure"));
        }
        Ok(Arc::new(MockHandle {
            identifier: identifier.to_string(),
        }))
    }

    async fn attach_adapter(
        &self,
        _base: Arc<dyn ModelHandle>,
        _adapter: &AdapterConfig,
    ) -> Result<Box<dyn TrainableModel>> {
        self.trainings.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTrainable {
            fail: self.fail_training.load(Ordering::SeqCst),
        }))
    }

    fn release_memory(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
