//! Trained-model artifact management
//!
//! Models live on disk, one directory per identifier under the models root.
//! A directory only counts as a model once its `config.json` exists — the
//! backend writes that file last, so a crashed or failed run's partial
//! output never shows up in listings.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Completeness marker written last by the backend's save step.
pub const COMPLETENESS_MARKER: &str = "config.json";

/// One usable trained model on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ModelArtifact {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size_mb: f64,
    pub path: PathBuf,
}

/// Whether `models_dir/model_id` holds a complete model.
pub fn model_exists(models_dir: &Path, model_id: &str) -> bool {
    models_dir.join(model_id).join(COMPLETENESS_MARKER).exists()
}

/// List every complete model under `models_dir`, newest first.
pub fn list_models(models_dir: &Path) -> Result<Vec<ModelArtifact>> {
    let mut models = Vec::new();
    if !models_dir.exists() {
        return Ok(models);
    }

    for entry in std::fs::read_dir(models_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if !path.join(COMPLETENESS_MARKER).exists() {
            debug!("skipping incomplete model directory {}", path.display());
            continue;
        }

        let id = entry.file_name().to_string_lossy().to_string();
        let metadata = entry.metadata()?;
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        models.push(ModelArtifact {
            name: id.clone(),
            id,
            created_at: DateTime::<Utc>::from(created),
            size_mb: directory_size(&path)? as f64 / (1024.0 * 1024.0),
            path,
        });
    }

    models.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(models)
}

/// Delete the model directory for `model_id`.
pub fn delete_model(models_dir: &Path, model_id: &str) -> Result<()> {
    if model_id.contains(['/', '\\']) || model_id == "." || model_id == ".." {
        return Err(Error::invalid_data_shape(format!(
            "invalid model id '{model_id}'"
        )));
    }
    let path = models_dir.join(model_id);
    if !path.exists() {
        return Err(Error::model_not_found(model_id));
    }
    std::fs::remove_dir_all(&path)?;
    Ok(())
}

fn directory_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += directory_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_model(root: &Path, id: &str, complete: bool) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("adapter.safetensors"), vec![0u8; 2048]).unwrap();
        if complete {
            std::fs::write(dir.join(COMPLETENESS_MARKER), "{}").unwrap();
        }
    }

    #[test]
    fn lists_only_complete_models() {
        let root = tempfile::tempdir().unwrap();
        make_model(root.path(), "good", true);
        make_model(root.path(), "partial", false);

        let models = list_models(root.path()).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "good");
        assert!(models[0].size_mb > 0.0);
    }

    #[test]
    fn missing_models_dir_lists_empty() {
        let root = tempfile::tempdir().unwrap();
        let models = list_models(&root.path().join("nope")).unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn model_exists_requires_the_marker() {
        let root = tempfile::tempdir().unwrap();
        make_model(root.path(), "good", true);
        make_model(root.path(), "partial", false);
        assert!(model_exists(root.path(), "good"));
        assert!(!model_exists(root.path(), "partial"));
        assert!(!model_exists(root.path(), "absent"));
    }

    #[test]
    fn delete_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        make_model(root.path(), "good", true);
        delete_model(root.path(), "good").unwrap();
        assert!(!root.path().join("good").exists());
    }

    #[test]
    fn delete_rejects_unknown_and_traversal_ids() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            delete_model(root.path(), "absent"),
            Err(Error::ModelNotFound(_))
        ));
        assert!(delete_model(root.path(), "../escape").is_err());
    }
}
