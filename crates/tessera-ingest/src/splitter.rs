//! Text splitting for the ingestion pipeline.

use async_trait::async_trait;
use tracing::debug;

use tessera_core::{
    defaults, ChunkPayload, Error, JobSpecificData, Result, SourceObject, Splitter,
};

/// Paragraph-oriented splitter.
///
/// Splits on blank lines, merges fragments below the minimum size into
/// their successor, and hard-wraps paragraphs that exceed the maximum.
/// `chunking_strategy = "fixed"` bypasses paragraph detection and cuts
/// the text into fixed-size windows.
pub struct ParagraphSplitter {
    max_chunk_size: usize,
    min_chunk_size: usize,
}

impl Default for ParagraphSplitter {
    fn default() -> Self {
        Self {
            max_chunk_size: defaults::CHUNK_SIZE,
            min_chunk_size: defaults::CHUNK_MIN_SIZE,
        }
    }
}

impl ParagraphSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sizes(max_chunk_size: usize, min_chunk_size: usize) -> Self {
        Self {
            max_chunk_size,
            min_chunk_size,
        }
    }

    fn split_paragraphs(&self, text: &str) -> Vec<String> {
        let mut pieces: Vec<String> = Vec::new();
        let mut pending = String::new();

        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            if !pending.is_empty() {
                pending.push_str("\n\n");
            }
            pending.push_str(paragraph);

            if pending.chars().count() >= self.min_chunk_size {
                pieces.extend(self.wrap_oversized(&pending));
                pending.clear();
            }
        }

        // Trailing fragment: append to the last piece rather than
        // emitting an undersized chunk, unless it is all we have.
        if !pending.is_empty() {
            match pieces.last_mut() {
                Some(last) if last.chars().count() + pending.chars().count() + 2
                    <= self.max_chunk_size =>
                {
                    last.push_str("\n\n");
                    last.push_str(&pending);
                }
                _ => pieces.push(pending),
            }
        }

        pieces
    }

    fn split_fixed(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.max_chunk_size)
            .map(|window| window.iter().collect::<String>().trim().to_string())
            .filter(|piece| !piece.is_empty())
            .collect()
    }

    /// Hard-wrap a piece that exceeds the maximum chunk size.
    fn wrap_oversized(&self, piece: &str) -> Vec<String> {
        if piece.chars().count() <= self.max_chunk_size {
            return vec![piece.to_string()];
        }
        self.split_fixed(piece)
    }
}

#[async_trait]
impl Splitter for ParagraphSplitter {
    async fn split(
        &self,
        object: &SourceObject,
        data: Option<&JobSpecificData>,
    ) -> Result<Vec<ChunkPayload>> {
        let text = object
            .cleaned_text
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("object has no cleaned text to split".into()))?;

        let strategy = data
            .and_then(|d| d.chunking_strategy.as_deref())
            .unwrap_or("paragraph");

        let pieces = match strategy {
            "fixed" => self.split_fixed(text),
            _ => self.split_paragraphs(text),
        };

        debug!(
            object_id = %object.id,
            strategy,
            chunks = pieces.len(),
            "Split object text"
        );

        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(idx, content)| {
                // Rough token estimate; good enough for sizing decisions.
                let token_count = (content.chars().count() / 4) as i32;
                ChunkPayload {
                    object_id: object.id,
                    notebook_id: object.notebook_id,
                    chunk_idx: idx as i32,
                    content,
                    summary: None,
                    tags_json: None,
                    propositions_json: None,
                    token_count: Some(token_count),
                }
            })
            .collect())
    }
}
