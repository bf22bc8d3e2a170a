use text_splitter::{ChunkConfig, TextSplitter};

use common::{error::AppError, utils::config::KnowledgeConfig, utils::text::estimate_tokens};

/// Characters per estimated token; mirrors `estimate_tokens`.
const CHARS_PER_TOKEN: usize = 4;

/// Splits cleaned text into overlapping fragments sized by the knowledge
/// configuration (target ~500 tokens, max 1000, overlap ~50). Sentence
/// locality comes from the splitter's semantic boundaries plus the overlap
/// window.
pub fn split_into_chunks(text: &str, config: &KnowledgeConfig) -> Result<Vec<String>, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::Validation("document text is empty".to_string()));
    }

    let target_chars = config.chunk_target_tokens.saturating_mul(CHARS_PER_TOKEN);
    let max_chars = config.chunk_max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let overlap_chars = config.chunk_overlap_tokens.saturating_mul(CHARS_PER_TOKEN);

    let chunk_config = ChunkConfig::new(target_chars..max_chars)
        .with_overlap(overlap_chars)
        .map_err(|e| AppError::InternalError(format!("invalid chunking configuration: {e}")))?;
    let splitter = TextSplitter::new(chunk_config);

    let chunks: Vec<String> = splitter
        .chunks(text)
        .map(str::to_owned)
        .filter(|chunk| !chunk.trim().is_empty())
        .collect();

    if chunks.is_empty() {
        return Err(AppError::Validation(
            "document produced no usable chunks".to_string(),
        ));
    }

    Ok(chunks)
}

/// Token estimate stored on each chunk row.
pub fn chunk_token_size(chunk: &str) -> u32 {
    estimate_tokens(chunk) as u32
}
