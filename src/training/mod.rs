//! Training job execution
//!
//! One fine-tuning run is one job: load the base model, attach the adapter,
//! normalize the data, drive the optimization loop for a fixed step budget,
//! persist the artifacts. The runner owns that lifecycle and reports every
//! transition through the injected [`JobRegistry`](crate::registry::JobRegistry).

mod runner;

pub use runner::{JobHandle, TrainingRequest, TrainingRunner};
