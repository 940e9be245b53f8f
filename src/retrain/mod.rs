//! Feedback-to-retrain loop
//!
//! Served conversations accumulate in the store; once enough unconsumed
//! ones exist, a cycle exports them as a training file, retrains the target
//! model in place and, only after the run succeeds, marks exactly the
//! exported records consumed. Conversations appended while the run is in
//! flight stay eligible for the next cycle. A failed cycle changes nothing
//! and the loop keeps ticking.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RetrainConfig;
use crate::data::export;
use crate::error::Result;
use crate::store::ConversationStore;
use crate::training::{TrainingRequest, TrainingRunner};

/// What one tick of the loop did.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Not enough unconsumed conversations yet
    BelowThreshold { pending: u64, threshold: u64 },
    /// A retrain cycle ran to completion
    Retrained { job_id: String, exported: usize },
}

/// Periodic monitor that feeds conversations back into training.
pub struct RetrainLoop {
    store: Arc<dyn ConversationStore>,
    runner: Arc<TrainingRunner>,
    config: RetrainConfig,
    /// Base model retrain runs start from
    base_model: String,
    /// Model the retrained artifacts overwrite
    model_id: String,
    models_dir: PathBuf,
    export_dir: PathBuf,
}

impl RetrainLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        runner: Arc<TrainingRunner>,
        config: RetrainConfig,
        base_model: String,
        model_id: String,
        models_dir: PathBuf,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            runner,
            config,
            base_model,
            model_id,
            models_dir,
            export_dir,
        }
    }

    /// Run the monitor until the owning task is cancelled.
    pub async fn run(&self) {
        info!(
            "retrain monitor started for model '{}' (threshold {}, every {}s)",
            self.model_id, self.config.threshold, self.config.poll_interval_secs
        );
        loop {
            match self.tick().await {
                Ok(TickOutcome::Retrained { job_id, exported }) => {
                    info!(
                        "retrain cycle {} consumed {} conversations",
                        job_id, exported
                    );
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Ok(TickOutcome::BelowThreshold { pending, threshold }) => {
                    info!("retrain status: {}/{} conversations", pending, threshold);
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Err(e) => {
                    warn!("retrain tick failed: {}", e);
                    tokio::time::sleep(self.config.backoff()).await;
                }
            }
        }
    }

    /// One threshold check, retraining if it is crossed.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let pending = self.store.count_unconsumed().await?;
        if pending < self.config.threshold {
            return Ok(TickOutcome::BelowThreshold {
                pending,
                threshold: self.config.threshold,
            });
        }
        self.run_cycle().await
    }

    /// Export a snapshot, retrain, and mark the snapshot consumed.
    pub async fn run_cycle(&self) -> Result<TickOutcome> {
        let job_id = format!("retrain_{}", Uuid::new_v4());
        self.run_cycle_as(&job_id).await
    }

    /// Run one cycle under a caller-chosen job id.
    pub async fn run_cycle_as(&self, job_id: &str) -> Result<TickOutcome> {
        let snapshot = self.store.fetch_unconsumed(self.config.export_limit).await?;
        let exported = export::write_training_file(&snapshot, &self.export_dir)?;

        let request = TrainingRequest {
            job_id: job_id.to_string(),
            data_path: exported.path,
            base_model: self.base_model.clone(),
            output_dir: self.models_dir.join(&self.model_id),
            max_steps: self.config.max_steps,
            learning_rate: self.config.learning_rate,
            batch_size: self.config.batch_size,
        };

        self.runner.run(&request).await?;

        // Only the records captured at export time are consumed; anything
        // appended during the run stays pending for the next cycle.
        self.store.mark_consumed(&exported.record_ids).await?;

        Ok(TickOutcome::Retrained {
            job_id: job_id.to_string(),
            exported: exported.record_ids.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::config::TrainingConfig;
    use crate::registry::JobRegistry;
    use crate::store::{InMemoryConversationStore, NewConversation};
    use std::sync::atomic::Ordering;

    fn conversation(i: usize) -> NewConversation {
        NewConversation {
            user_message: format!("question {i}"),
            ai_response: format!("answer {i}"),
            model_id: "advisor".to_string(),
            session_id: None,
        }
    }

    struct Fixture {
        store: Arc<InMemoryConversationStore>,
        backend: Arc<MockBackend>,
        registry: Arc<JobRegistry>,
        retrain: RetrainLoop,
        _dir: tempfile::TempDir,
    }

    fn fixture(threshold: u64, backend: MockBackend) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryConversationStore::new());
        let backend = Arc::new(backend);
        let registry = Arc::new(JobRegistry::new());
        let runner = Arc::new(TrainingRunner::new(
            backend.clone(),
            registry.clone(),
            TrainingConfig::default(),
        ));
        let retrain = RetrainLoop::new(
            store.clone(),
            runner,
            RetrainConfig {
                threshold,
                max_steps: 2,
                ..RetrainConfig::default()
            },
            "tinylm/base".to_string(),
            "advisor".to_string(),
            dir.path().join("models"),
            dir.path().join("exports"),
        );
        Fixture {
            store,
            backend,
            registry,
            retrain,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn below_threshold_does_not_retrain() {
        let f = fixture(3, MockBackend::new());
        for i in 0..2 {
            f.store.append(conversation(i)).await.unwrap();
        }

        let outcome = f.retrain.tick().await.unwrap();
        assert!(matches!(
            outcome,
            TickOutcome::BelowThreshold {
                pending: 2,
                threshold: 3
            }
        ));
        assert_eq!(f.backend.trainings.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.count_unconsumed().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn exactly_threshold_triggers_one_retrain() {
        let f = fixture(3, MockBackend::new());
        for i in 0..3 {
            f.store.append(conversation(i)).await.unwrap();
        }

        let outcome = f.retrain.tick().await.unwrap();
        match outcome {
            TickOutcome::Retrained { job_id, exported } => {
                assert_eq!(exported, 3);
                assert_eq!(
                    f.registry.get(&job_id).unwrap().state,
                    crate::registry::JobState::Completed
                );
            }
            other => panic!("expected retrain, got {other:?}"),
        }
        assert_eq!(f.backend.trainings.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.count_unconsumed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consumption_matches_the_export_snapshot_exactly() {
        let f = fixture(2, MockBackend::new());
        for i in 0..4 {
            f.store.append(conversation(i)).await.unwrap();
        }

        let before = f.store.count_unconsumed().await.unwrap();
        assert_eq!(before, 4);

        let outcome = f.retrain.run_cycle().await.unwrap();
        let TickOutcome::Retrained { exported, .. } = outcome else {
            panic!("expected retrain");
        };

        f.store.append(conversation(99)).await.unwrap();
        let after = f.store.count_unconsumed().await.unwrap();
        // 4 exported and consumed, 1 new still pending
        assert_eq!(exported, 4);
        assert_eq!(after, 1);
    }

    #[tokio::test]
    async fn failed_cycle_consumes_nothing() {
        let f = fixture(2, MockBackend::new().failing_training());
        for i in 0..3 {
            f.store.append(conversation(i)).await.unwrap();
        }

        assert!(f.retrain.tick().await.is_err());
        assert_eq!(f.store.count_unconsumed().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn export_respects_the_limit() {
        let mut f = fixture(1, MockBackend::new());
        f.retrain.config.export_limit = 2;
        for i in 0..5 {
            f.store.append(conversation(i)).await.unwrap();
        }

        let TickOutcome::Retrained { exported, .. } = f.retrain.tick().await.unwrap() else {
            panic!("expected retrain");
        };
        assert_eq!(exported, 2);
        assert_eq!(f.store.count_unconsumed().await.unwrap(), 3);
    }
}
