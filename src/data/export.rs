//! Conversation-to-training-data export
//!
//! The retrain loop materializes accumulated chat conversations as a regular
//! Instruction-format training file, so the exported data flows through the
//! same normalization path as uploaded files.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::data::format::InstructionExample;
use crate::error::Result;
use crate::store::ConversationRecord;

/// Result of one export: the written file and the exact record ids it holds.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    /// Path of the training file
    pub path: PathBuf,
    /// Ids of the conversations captured in the snapshot, used later to
    /// mark exactly these records consumed
    pub record_ids: Vec<i64>,
}

/// Write `records` as an Instruction-format training file under `dir`.
pub fn write_training_file(records: &[ConversationRecord], dir: &Path) -> Result<ExportedFile> {
    let examples: Vec<InstructionExample> = records
        .iter()
        .map(|record| InstructionExample {
            instruction: record.user_message.clone(),
            input: String::new(),
            output: record.ai_response.clone(),
        })
        .collect();

    std::fs::create_dir_all(dir)?;
    let filename = format!("training_data_{}.json", Utc::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(filename);
    let content = serde_json::to_string_pretty(&examples)?;
    std::fs::write(&path, content)?;

    info!(
        "exported {} conversations to {}",
        records.len(),
        path.display()
    );
    Ok(ExportedFile {
        path,
        record_ids: records.iter().map(|r| r.id).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{load_corpus, DataFormat};

    fn record(id: i64, user: &str, ai: &str) -> ConversationRecord {
        ConversationRecord {
            id,
            timestamp: Utc::now(),
            user_message: user.to_string(),
            ai_response: ai.to_string(),
            model_id: "advisor".to_string(),
            session_id: None,
            used_for_training: false,
        }
    }

    #[test]
    fn exported_file_normalizes_as_instruction_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record(1, "How do I budget?", "Track spending first."),
            record(2, "Pay debt or invest?", "Clear high-interest debt."),
        ];

        let exported = write_training_file(&records, dir.path()).unwrap();
        assert_eq!(exported.record_ids, vec![1, 2]);

        let corpus = load_corpus(&exported.path).unwrap();
        assert_eq!(corpus.format, DataFormat::Instruction);
        assert_eq!(corpus.len(), 2);
        assert!(corpus.blocks[0].contains("How do I budget?"));
        // empty input never renders an input block
        assert!(!corpus.blocks[0].contains("### Input:"));
    }
}
