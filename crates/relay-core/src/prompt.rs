//! Prompt composition: merges the context blob, the user's question and an instruction block.

use crate::context::ContextBlob;
use crate::intent::TopicFlags;

const CONTEXT_HEADER: &str = "Available system information:\n\n";

const BASE_INSTRUCTIONS: &str = "INSTRUCTIONS:
- Answer ONLY what the user asked
- Do NOT include information that was not explicitly requested
- If only system data was requested, do NOT include cloud data
- If only cloud data was requested, do NOT include IAM credentials
- Be precise and direct
";

/// Appended when credentials were requested: the model must reproduce every credential
/// field exactly. This instruction is intentionally unredacted.
pub const VERBATIM_CREDENTIALS_INSTRUCTION: &str =
    "- Reproduce EVERY credential field shown above verbatim and COMPLETE: no summarizing, no truncation, no redaction\n";

/// Appended for every other request with context.
pub const DATA_ONLY_INSTRUCTION: &str =
    "- Answer only from the data above; if it is not there, say it is not available\n";

/// Builds the final model input. With no topic flags set the raw message is returned unchanged.
pub fn compose(blob: &ContextBlob, message: &str, flags: &TopicFlags) -> String {
    if !flags.any() {
        return message.to_string();
    }

    let topic_instruction = if flags.credentials {
        VERBATIM_CREDENTIALS_INSTRUCTION
    } else {
        DATA_ONLY_INSTRUCTION
    };

    format!(
        "{}{}\nQUESTION: {}\n\n{}{}\nAnswer:",
        CONTEXT_HEADER,
        blob.render(),
        message,
        BASE_INSTRUCTIONS,
        topic_instruction
    )
}
