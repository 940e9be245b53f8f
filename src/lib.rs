//! tuneserve - fine-tuning and serving control plane
//!
//! This crate provides a web-facing control plane for fine-tuning and
//! serving a small instruction-following model, plus the feedback loop
//! that turns served conversations back into training data.

#![warn(rustdoc::broken_intra_doc_links)]

pub mod advisor;
pub mod artifacts;
pub mod backend;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod registry;
pub mod resources;
pub mod retrain;
pub mod server;
pub mod store;
pub mod training;

// Re-exports
pub use cache::ModelCache;
pub use config::Config;
pub use data::{Corpus, DataFormat};
pub use error::{Error, Result};
pub use registry::{JobRegistry, JobState, JobStatus};
pub use retrain::RetrainLoop;
pub use training::{TrainingRequest, TrainingRunner};

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::advisor::FinancialProfile;
use crate::backend::tinylm::TinyLmBackend;
use crate::backend::ModelBackend;
use crate::resources::ResourceDirectory;
use crate::store::{ConversationStore, NewConversation, SqliteConversationStore};
use crate::training::JobHandle;

/// Main control-plane system
///
/// Owns the shared components - backend, model cache, job registry,
/// conversation store, training runner - and wires them together for the
/// HTTP layer, the CLI and the retrain loop. Everything shared lives here
/// and is injected downward; there are no process globals.
pub struct ControlPlane {
    /// System configuration
    config: Config,
    /// Cache of loaded models, keyed by artifact path
    cache: ModelCache,
    /// Shared training-job registry
    registry: Arc<JobRegistry>,
    /// Conversation persistence
    store: Arc<dyn ConversationStore>,
    /// Training job runner
    runner: Arc<TrainingRunner>,
    /// Local financial-resource directory
    resources: ResourceDirectory,
}

impl ControlPlane {
    /// Create a control plane with the default backend and SQLite store.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        config.ensure_directories()?;
        info!("Initializing control plane");

        let backend: Arc<dyn ModelBackend> = Arc::new(TinyLmBackend::new());
        let store: Arc<dyn ConversationStore> =
            Arc::new(SqliteConversationStore::open(&config.paths.database).await?);
        Ok(Self::assemble(config, backend, store))
    }

    /// Create a control plane from injected parts, used by tests and
    /// embedders that bring their own backend or store.
    pub fn with_parts(
        config: Config,
        backend: Arc<dyn ModelBackend>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self::assemble(config, backend, store)
    }

    fn assemble(
        config: Config,
        backend: Arc<dyn ModelBackend>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let cache = ModelCache::new(
            Arc::clone(&backend),
            config.training.max_seq_len,
            config.training.quantization,
        );
        let runner = Arc::new(TrainingRunner::new(
            Arc::clone(&backend),
            Arc::clone(&registry),
            config.training.clone(),
        ));
        let resources = ResourceDirectory::new(config.paths.resources_file.clone());
        debug!("control plane components assembled");

        Self {
            config,
            cache,
            registry,
            store,
            runner,
            resources,
        }
    }

    /// Generate a chat reply from a trained model and persist the exchange.
    ///
    /// Fails with [`Error::ModelNotFound`] - without touching the model
    /// cache - when the identifier has no complete artifact on disk.
    pub async fn chat(
        &self,
        model_id: &str,
        message: &str,
        max_tokens: usize,
        temperature: f64,
        session_id: Option<String>,
    ) -> Result<String> {
        if !artifacts::model_exists(&self.config.paths.models_dir, model_id) {
            return Err(Error::model_not_found(model_id));
        }
        let model_path = self.config.paths.models_dir.join(model_id);
        let handle = self.cache.acquire(&model_path.to_string_lossy()).await?;

        let prompt = data::render_inference_prompt(message);
        let raw = handle.generate(&prompt, max_tokens, temperature).await?;
        let reply = data::extract_response(&raw);

        self.store
            .append(NewConversation {
                user_message: message.to_string(),
                ai_response: reply.clone(),
                model_id: model_id.to_string(),
                session_id,
            })
            .await?;
        Ok(reply)
    }

    /// Generate structured financial advice, enhanced with local resources.
    pub async fn advise(
        &self,
        model_id: &str,
        profile: &FinancialProfile,
        session_id: Option<String>,
    ) -> Result<String> {
        if !artifacts::model_exists(&self.config.paths.models_dir, model_id) {
            return Err(Error::model_not_found(model_id));
        }
        let model_path = self.config.paths.models_dir.join(model_id);
        let handle = self.cache.acquire(&model_path.to_string_lossy()).await?;

        let prompt = advisor::build_advice_prompt(profile);
        let raw = handle
            .generate(&prompt, self.config.chat.max_tokens, self.config.chat.temperature)
            .await?;
        let reply = data::extract_response(&raw);
        let enhanced =
            advisor::enhance_with_location(&reply, &profile.city, &profile.state, &self.resources);

        self.store
            .append(NewConversation {
                user_message: prompt,
                ai_response: reply,
                model_id: model_id.to_string(),
                session_id,
            })
            .await?;
        Ok(enhanced)
    }

    /// Spawn a training job on a background task.
    pub fn start_training(&self, request: TrainingRequest) -> JobHandle {
        self.runner.spawn(request)
    }

    /// Build the periodic retrain monitor for `model_id`.
    pub fn retrain_loop(&self, model_id: &str) -> RetrainLoop {
        RetrainLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.runner),
            self.config.retrain.clone(),
            self.config.training.default_base_model.clone(),
            model_id.to_string(),
            self.config.paths.models_dir.clone(),
            self.config.paths.export_dir.clone(),
        )
    }

    /// Kick off one manual retrain cycle in the background.
    ///
    /// The job record is registered before this returns, so the returned
    /// id is immediately pollable.
    pub fn spawn_retrain(&self, model_id: &str) -> String {
        let job_id = format!("retrain_{}", Uuid::new_v4());
        self.registry.create(&job_id, self.config.retrain.max_steps);

        let cycle = self.retrain_loop(model_id);
        let id = job_id.clone();
        tokio::spawn(async move {
            if let Err(e) = cycle.run_cycle_as(&id).await {
                warn!("manual retrain cycle {} failed: {}", id, e);
            }
        });
        job_id
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared job registry
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Conversation store
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Model cache
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Training runner
    pub fn runner(&self) -> &Arc<TrainingRunner> {
        &self.runner
    }
}
