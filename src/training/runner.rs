//! The training job runner and its state machine

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backend::{ModelBackend, OptimizationConfig};
use crate::config::TrainingConfig;
use crate::data;
use crate::error::Result;
use crate::registry::{JobRegistry, JobState, StatusUpdate};

/// Everything one fine-tuning run needs.
#[derive(Debug, Clone)]
pub struct TrainingRequest {
    /// Unique job identifier
    pub job_id: String,
    /// Training-data file to normalize and consume
    pub data_path: PathBuf,
    /// Base model identifier
    pub base_model: String,
    /// Directory the trained artifacts are persisted to
    pub output_dir: PathBuf,
    /// Exact optimization step budget
    pub max_steps: u32,
    /// Peak learning rate
    pub learning_rate: f64,
    /// Per-device batch size
    pub batch_size: usize,
}

/// Handle to a spawned training job.
///
/// The job's progress and terminal outcome are observable through the
/// registry under `job_id`; the task handle is there for callers that want
/// to await or abort the underlying task. Dropping it detaches the task.
pub struct JobHandle {
    pub job_id: String,
    pub task: JoinHandle<Result<()>>,
}

/// Drives fine-tuning runs against the model backend.
pub struct TrainingRunner {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<JobRegistry>,
    settings: TrainingConfig,
}

impl TrainingRunner {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<JobRegistry>,
        settings: TrainingConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            settings,
        }
    }

    /// Run one job to completion on the current task.
    ///
    /// Creates the job's registry record, then walks the state machine.
    /// On any failure the record is marked failed with the error message
    /// and the error is returned to the caller.
    pub async fn run(&self, request: &TrainingRequest) -> Result<()> {
        self.registry.create(&request.job_id, request.max_steps);
        match self.execute(request).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("training job {} failed: {}", request.job_id, e);
                let _ = self
                    .registry
                    .update(&request.job_id, StatusUpdate::failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Spawn one job on a background task.
    ///
    /// The registry record is created before the task starts, so a status
    /// query racing the spawn still finds the job. The spawning layer is
    /// the place errors stop: they are recorded and logged, never allowed
    /// to take down the serving process.
    pub fn spawn(self: &Arc<Self>, request: TrainingRequest) -> JobHandle {
        self.registry.create(&request.job_id, request.max_steps);
        let runner = Arc::clone(self);
        let job_id = request.job_id.clone();
        let task = tokio::spawn(async move {
            match runner.execute(&request).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!("training job {} failed: {}", request.job_id, e);
                    let _ = runner
                        .registry
                        .update(&request.job_id, StatusUpdate::failed(e.to_string()));
                    Err(e)
                }
            }
        });
        JobHandle { job_id, task }
    }

    async fn execute(&self, request: &TrainingRequest) -> Result<()> {
        info!(
            "starting training job {} (base '{}', {} steps)",
            request.job_id, request.base_model, request.max_steps
        );

        self.registry
            .update(&request.job_id, StatusUpdate::state(JobState::LoadingModel))?;
        let base = self
            .backend
            .load(
                &request.base_model,
                self.settings.max_seq_len,
                self.settings.quantization,
            )
            .await?;
        let mut trainable = self
            .backend
            .attach_adapter(base, &self.settings.adapter)
            .await?;

        self.registry
            .update(&request.job_id, StatusUpdate::state(JobState::LoadingData))?;
        let corpus = data::load_corpus(&request.data_path)?;
        info!(
            "job {}: {} examples normalized as {:?}",
            request.job_id,
            corpus.len(),
            corpus.format
        );

        self.registry
            .update(&request.job_id, StatusUpdate::state(JobState::Training))?;
        let opts = OptimizationConfig {
            max_steps: request.max_steps,
            learning_rate: request.learning_rate,
            batch_size: request.batch_size,
            gradient_accumulation: self.settings.gradient_accumulation,
            warmup_steps: self.settings.warmup_steps,
            weight_decay: self.settings.weight_decay,
            schedule: crate::backend::LrSchedule::Linear,
        };

        // The optimization loop streams one loss per completed step; the
        // forwarder turns each into a registry update. The sender moves
        // into the loop, so the forwarder drains fully before save.
        let (tx, mut rx) = mpsc::unbounded_channel::<crate::backend::StepLoss>();
        let registry = Arc::clone(&self.registry);
        let job_id = request.job_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(step) = rx.recv().await {
                let _ = registry.update(&job_id, StatusUpdate::step(step.step, step.loss));
            }
        });

        let outcome = trainable
            .run_optimization(&corpus.blocks, &opts, tx)
            .await;
        let _ = forwarder.await;
        outcome?;

        std::fs::create_dir_all(&request.output_dir)?;
        trainable.save(&request.output_dir)?;

        self.registry.update(
            &request.job_id,
            StatusUpdate::completed(format!(
                "Model saved to {}",
                request.output_dir.display()
            )),
        )?;
        info!(
            "training job {} completed, artifacts in {}",
            request.job_id,
            request.output_dir.display()
        );
        Ok(())
    }
}
