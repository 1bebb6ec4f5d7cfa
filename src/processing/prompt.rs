//! Prompt assembly and source previews for answers.

use crate::index::RetrievedChunk;

/// Characters of chunk text kept in a source preview.
pub const PREVIEW_CHARS: usize = 200;
const PREVIEW_SUFFIX: &str = "...";

/// Reply the model gives for questions the uploaded policy does not cover.
pub const OFF_TOPIC_REPLY: &str =
    "I can only answer questions that are directly related to the uploaded data-governance policy.";

/// Build a "stuff" prompt: every retrieved chunk in one excerpt block, then the question.
///
/// The model is scoped to the excerpts, told to refuse unrelated questions with
/// [`OFF_TOPIC_REPLY`], and asked for a short answer that cites sections.
pub fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let excerpts = chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You are a data-governance assistant. Answer the question using ONLY the policy \
         excerpts below. If the question is unrelated to data governance or outside the scope \
         of the provided policy, reply with: \"{OFF_TOPIC_REPLY}\"\n\n\
         Policy excerpts:\n{excerpts}\n\n\
         Question: {question}\n\n\
         Provide a concise answer (at most 3 sentences) and cite the relevant sections."
    )
}

/// First [`PREVIEW_CHARS`] characters of `text` followed by `...`.
///
/// The suffix is appended even when nothing was cut.
pub fn source_preview(text: &str) -> String {
    let end = text
        .char_indices()
        .nth(PREVIEW_CHARS)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len());
    format!("{}{PREVIEW_SUFFIX}", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            position: 0,
            score: 1.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn long_text_is_cut_at_two_hundred_chars() {
        let text = "a".repeat(450);
        let preview = source_preview(&text);
        assert_eq!(preview.chars().count(), 203);
        assert!(preview.ends_with("..."));
        assert!(text.starts_with(preview.trim_end_matches("...")));
    }

    #[test]
    fn short_text_still_gets_suffix() {
        assert_eq!(source_preview("Data is retained."), "Data is retained....");
        assert_eq!(source_preview(""), "...");
    }

    #[test]
    fn preview_respects_multibyte_boundaries() {
        let text = "é".repeat(250);
        let preview = source_preview(&text);
        assert_eq!(preview, format!("{}...", "é".repeat(200)));
    }

    #[test]
    fn prompt_contains_question_and_every_chunk() {
        let prompt = build_prompt(
            "How long is data kept?",
            &[chunk("Records are kept seven years."), chunk("Backups rotate weekly.")],
        );
        assert!(prompt.contains(
            "Policy excerpts:\nRecords are kept seven years.\n\nBackups rotate weekly."
        ));
        assert!(prompt.contains("Question: How long is data kept?"));
        assert!(prompt.contains("using ONLY the policy excerpts"));
        assert!(prompt.contains(OFF_TOPIC_REPLY));
        assert!(prompt.ends_with("cite the relevant sections."));
    }
}
