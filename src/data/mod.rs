//! Training-data normalization
//!
//! Raw uploads arrive in heterogeneous JSON shapes: a flat list of examples,
//! or an object wrapping such a list under some key. This module flattens
//! whatever arrives into a [`Corpus`] of canonical text blocks with a single
//! detected format, ready for the optimization loop.

pub mod export;
pub mod format;

use std::path::Path;

use serde_json::Value;
use tracing::debug;

pub use format::{
    detect_format, extract_response, render_example, render_inference_prompt, DataFormat,
    InstructionExample,
};

use crate::error::{Error, Result};

/// A normalized training corpus: one canonical text block per example.
#[derive(Debug, Clone)]
pub struct Corpus {
    /// Format detected from the first example
    pub format: DataFormat,
    /// Canonical text blocks, in source order
    pub blocks: Vec<String>,
}

impl Corpus {
    /// Number of examples in the corpus.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the corpus holds no examples.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Unwrap a raw payload into its example list.
///
/// A list payload is taken as-is. An object payload yields the value of the
/// first key (in document order) whose value is a list.
pub fn unwrap_examples(payload: &Value) -> Result<&Vec<Value>> {
    if let Some(list) = payload.as_array() {
        return Ok(list);
    }
    if let Some(obj) = payload.as_object() {
        for (key, value) in obj {
            if let Some(list) = value.as_array() {
                debug!("unwrapped example list from key '{}'", key);
                return Ok(list);
            }
        }
        return Err(Error::invalid_data_shape(
            "object payload has no list-valued key",
        ));
    }
    Err(Error::invalid_data_shape(
        "payload is neither a list nor an object",
    ))
}

/// Normalize a raw JSON payload into a [`Corpus`].
///
/// The format is detected once, from the first example, and applied to every
/// example in the list.
pub fn normalize_payload(payload: &Value) -> Result<Corpus> {
    let examples = unwrap_examples(payload)?;
    let first = examples.first().ok_or(Error::EmptyDataset)?;
    let format = detect_format(first)?;

    let mut blocks = Vec::with_capacity(examples.len());
    for example in examples {
        blocks.push(render_example(format, example)?);
    }

    debug!(
        "normalized {} examples as {:?} format",
        blocks.len(),
        format
    );
    Ok(Corpus { format, blocks })
}

/// Read and normalize a training-data file.
pub fn load_corpus(path: &Path) -> Result<Corpus> {
    let content = std::fs::read_to_string(path)?;
    let payload: Value = serde_json::from_str(&content)
        .map_err(|e| Error::invalid_data_shape(format!("unparseable JSON: {e}")))?;
    let corpus = normalize_payload(&payload)?;
    if corpus.is_empty() {
        return Err(Error::EmptyDataset);
    }
    Ok(corpus)
}
