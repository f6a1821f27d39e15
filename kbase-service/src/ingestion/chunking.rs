//! Fixed-size sliding-window chunking.

/// One chunk of extracted text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Window position in the original split. Blank windows are dropped
    /// without renumbering, so gaps are possible.
    pub index: usize,
    /// Window text, trimmed
    pub content: String,
    pub token_count: usize,
}

/// Splits text into overlapping character windows
#[derive(Debug, Clone, Copy)]
pub struct ChunkingEngine {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingEngine {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let overlap = if overlap >= chunk_size {
            chunk_size / 2
        } else {
            overlap
        };
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Distance between the starts of consecutive windows
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Split `text` into windows of `chunk_size` characters starting every
    /// `chunk_size - overlap` characters, until a window would start past the end.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut index = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let content = window.trim();

            if !content.is_empty() {
                chunks.push(TextChunk {
                    index,
                    content: content.to_string(),
                    token_count: estimate_tokens(content),
                });
            }

            index += 1;
            start += self.step();
        }

        chunks
    }
}

/// Rough token estimate: four characters per token
pub fn estimate_tokens(content: &str) -> usize {
    content.chars().count() / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_text(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_two_thousand_chars_make_three_windows() {
        let text = numbered_text(2000);
        let chunks = ChunkingEngine::new(800, 120).split(&text);

        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(chunks[0].content, text[0..800]);
        assert_eq!(chunks[1].content, text[680..1480]);
        assert_eq!(chunks[2].content, text[1360..2000]);
        assert_eq!(chunks[0].token_count, 200);
        assert_eq!(chunks[2].token_count, 160);
    }

    #[test]
    fn test_blank_windows_keep_original_ordinals() {
        // Window 1 (chars 8..18) is all whitespace
        let text = format!("{}{}{}", "abcdefgh", " ".repeat(12), "ijklmnopqrstuvwxyz");
        let chunks = ChunkingEngine::new(10, 2).split(&text);

        let indexes: Vec<_> = chunks.iter().map(|c| c.index).collect();
        assert!(!indexes.contains(&1));
        assert_eq!(indexes[0], 0);
        assert!(indexes.windows(2).all(|w| w[0] < w[1]));
        assert!(chunks.iter().all(|c| !c.content.trim().is_empty()));
    }

    #[test]
    fn test_whitespace_only_text_yields_nothing() {
        assert!(ChunkingEngine::new(800, 120).split("   \n\t  ").is_empty());
        assert!(ChunkingEngine::new(800, 120).split("").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = ChunkingEngine::new(800, 120).split("  hello world  ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello world");
        assert_eq!(chunks[0].token_count, 2);
    }

    #[test]
    fn test_overlap_clamped_when_not_smaller_than_size() {
        let engine = ChunkingEngine::new(100, 100);
        assert_eq!(engine.step(), 50);
        let engine = ChunkingEngine::new(0, 0);
        assert_eq!(engine.step(), 1);
    }

    #[test]
    fn test_multibyte_text_counts_characters() {
        let text = "知".repeat(900);
        let chunks = ChunkingEngine::new(800, 120).split(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content.chars().count(), 800);
        assert_eq!(chunks[1].content.chars().count(), 220);
    }
}
