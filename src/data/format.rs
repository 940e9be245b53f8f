//! Training-data formats and canonical prompt rendering
//!
//! Every supported example shape renders into one canonical text block, the
//! single string form the optimization loop consumes. The format of a data
//! file is detected once, from its first example, and applied uniformly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Supported training-data formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// `{instruction, input?, output}` records
    Instruction,
    /// Multi-turn human/assistant transcripts
    Conversation,
    /// `{question, answer}` pairs
    Qa,
}

/// One instruction-following example.
///
/// `scenario` and `advice` are accepted as aliases for `input` and `output`
/// so files exported by older tooling keep loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionExample {
    #[serde(default)]
    pub instruction: String,
    #[serde(default, alias = "scenario")]
    pub input: String,
    #[serde(default, alias = "advice")]
    pub output: String,
}

/// One turn of a conversation example.
///
/// The speaker is kept as the raw tag; anything that is not explicitly
/// `human` renders as the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub from: String,
    #[serde(alias = "text")]
    pub value: String,
}

/// One multi-turn conversation example.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationExample {
    #[serde(default, alias = "turns")]
    pub conversations: Vec<Turn>,
}

/// One question/answer example.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaExample {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

/// Detect the data format from the first example of a file.
///
/// Detection looks at key presence only. An example that matches none of the
/// known shapes is rejected outright rather than guessed at.
pub fn detect_format(first: &Value) -> Result<DataFormat> {
    let obj = first.as_object().ok_or_else(|| {
        Error::invalid_data_shape("example is not a JSON object")
    })?;

    if obj.contains_key("instruction") && (obj.contains_key("output") || obj.contains_key("advice"))
    {
        return Ok(DataFormat::Instruction);
    }
    if obj.contains_key("conversations") || obj.contains_key("turns") {
        return Ok(DataFormat::Conversation);
    }
    if obj.contains_key("question") && obj.contains_key("answer") {
        return Ok(DataFormat::Qa);
    }

    let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
    Err(Error::unsupported_format(format!(
        "no known format matches example keys [{}]",
        keys.join(", ")
    )))
}

/// Render one example into its canonical text block.
///
/// The example is interpreted under `format` regardless of its own keys;
/// fields absent from a later example render as empty strings.
pub fn render_example(format: DataFormat, example: &Value) -> Result<String> {
    match format {
        DataFormat::Instruction => {
            let ex: InstructionExample = serde_json::from_value(example.clone())
                .map_err(|e| Error::invalid_data_shape(format!("bad instruction example: {e}")))?;
            Ok(render_instruction(&ex))
        }
        DataFormat::Conversation => {
            let ex: ConversationExample = serde_json::from_value(example.clone())
                .map_err(|e| Error::invalid_data_shape(format!("bad conversation example: {e}")))?;
            Ok(render_conversation(&ex))
        }
        DataFormat::Qa => {
            let ex: QaExample = serde_json::from_value(example.clone())
                .map_err(|e| Error::invalid_data_shape(format!("bad qa example: {e}")))?;
            Ok(render_qa(&ex))
        }
    }
}

fn render_instruction(ex: &InstructionExample) -> String {
    let mut text = format!("### Instruction:\n{}\n\n", ex.instruction);
    if !ex.input.trim().is_empty() {
        text.push_str(&format!("### Input:\n{}\n\n", ex.input));
    }
    text.push_str(&format!("### Response:\n{}", ex.output));
    text
}

fn render_conversation(ex: &ConversationExample) -> String {
    let mut text = String::new();
    for turn in &ex.conversations {
        if turn.from == "human" {
            text.push_str(&format!("### Human:\n{}\n\n", turn.value));
        } else {
            text.push_str(&format!("### Assistant:\n{}\n\n", turn.value));
        }
    }
    text.trim().to_string()
}

fn render_qa(ex: &QaExample) -> String {
    format!("### Question:\n{}\n\n### Answer:\n{}", ex.question, ex.answer)
}

/// Render the serving-time prompt for a chat message.
pub fn render_inference_prompt(message: &str) -> String {
    format!(
        "### Instruction:\nProvide financial advice for this situation.\n\n### Input:\n{message}\n\n### Response:\n"
    )
}

/// Extract the model's reply from generated text.
///
/// Backends that echo the prompt return the full text; everything after the
/// last response marker is the reply.
pub fn extract_response(text: &str) -> String {
    match text.rsplit_once("### Response:") {
        Some((_, reply)) => reply.trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_instruction_format() {
        let v = json!({"instruction": "a", "output": "b"});
        assert_eq!(detect_format(&v).unwrap(), DataFormat::Instruction);
    }

    #[test]
    fn detects_instruction_format_via_advice_alias() {
        let v = json!({"instruction": "a", "advice": "b"});
        assert_eq!(detect_format(&v).unwrap(), DataFormat::Instruction);
    }

    #[test]
    fn detects_conversation_and_qa_formats() {
        let conv = json!({"conversations": [{"from": "human", "value": "hi"}]});
        assert_eq!(detect_format(&conv).unwrap(), DataFormat::Conversation);
        let qa = json!({"question": "q", "answer": "a"});
        assert_eq!(detect_format(&qa).unwrap(), DataFormat::Qa);
    }

    #[test]
    fn unknown_shape_is_rejected() {
        let v = json!({"text": "free-form"});
        assert!(matches!(
            detect_format(&v),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn instruction_with_empty_input_omits_input_block() {
        let v = json!({"instruction": "Budget advice", "input": "  ", "output": "Save more"});
        let text = render_example(DataFormat::Instruction, &v).unwrap();
        assert!(!text.contains("### Input:"));
        assert!(text.starts_with("### Instruction:\nBudget advice\n\n### Response:"));
    }

    #[test]
    fn instruction_with_input_renders_input_block() {
        let v = json!({"instruction": "Budget advice", "input": "I earn $40k", "output": "Save more"});
        let text = render_example(DataFormat::Instruction, &v).unwrap();
        assert_eq!(
            text,
            "### Instruction:\nBudget advice\n\n### Input:\nI earn $40k\n\n### Response:\nSave more"
        );
    }

    #[test]
    fn scenario_alias_maps_to_input() {
        let v = json!({"instruction": "a", "scenario": "renting", "output": "b"});
        let text = render_example(DataFormat::Instruction, &v).unwrap();
        assert!(text.contains("### Input:\nrenting"));
    }

    #[test]
    fn conversation_alternates_and_trims() {
        let v = json!({"conversations": [
            {"from": "human", "value": "hello"},
            {"from": "assistant", "value": "hi there"}
        ]});
        let text = render_example(DataFormat::Conversation, &v).unwrap();
        assert_eq!(text, "### Human:\nhello\n\n### Assistant:\nhi there");
    }

    #[test]
    fn unknown_speaker_renders_as_assistant() {
        let v = json!({"conversations": [{"from": "gpt", "value": "sure"}]});
        let text = render_example(DataFormat::Conversation, &v).unwrap();
        assert!(text.starts_with("### Assistant:"));
    }

    #[test]
    fn qa_renders_question_then_answer() {
        let v = json!({"question": "What is APR?", "answer": "Annual percentage rate."});
        let text = render_example(DataFormat::Qa, &v).unwrap();
        assert_eq!(
            text,
            "### Question:\nWhat is APR?\n\n### Answer:\nAnnual percentage rate."
        );
    }

    #[test]
    fn mixed_shape_example_renders_under_detected_format() {
        // A qa-shaped record rendered as an instruction example: missing
        // fields come out empty instead of failing.
        let v = json!({"question": "q", "answer": "a"});
        let text = render_example(DataFormat::Instruction, &v).unwrap();
        assert!(text.starts_with("### Instruction:\n\n"));
    }

    #[test]
    fn response_extraction_takes_text_after_last_marker() {
        let full = "### Instruction:\nx\n\n### Response:\npay down the card";
        assert_eq!(extract_response(full), "pay down the card");
        assert_eq!(extract_response("plain reply"), "plain reply");
    }

    #[test]
    fn inference_prompt_embeds_message() {
        let p = render_inference_prompt("I have $5k in debt");
        assert!(p.contains("### Input:\nI have $5k in debt"));
        assert!(p.ends_with("### Response:\n"));
    }
}
