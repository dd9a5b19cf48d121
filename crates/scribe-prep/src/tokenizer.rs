//! Character-level CTC tokenizer backed by a [`Vocabulary`].

use crate::vocab::Vocabulary;

/// Maps transcripts to label ids and ids back to text.
#[derive(Clone, Debug)]
pub struct CharTokenizer {
    vocab: Vocabulary,
}

impl CharTokenizer {
    /// Wrap a vocabulary.
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    /// The underlying vocabulary.
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// One id per character. Spaces become the word delimiter; characters
    /// outside the vocabulary become the unknown token.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut buf = [0u8; 4];
        text.chars()
            .map(|c| {
                if c == ' ' {
                    self.vocab.delimiter_id()
                } else {
                    self.vocab
                        .id(c.encode_utf8(&mut buf))
                        .unwrap_or_else(|| self.vocab.unk_id())
                }
            })
            .collect()
    }

    /// Turn ids back into text.
    ///
    /// With `group_tokens`, runs of the same id collapse to one (CTC
    /// de-duplication, for model predictions only). Padding is dropped, the
    /// delimiter becomes a space, every other symbol is kept as is, and the
    /// result is trimmed at both ends. Ids outside the vocabulary are skipped.
    pub fn decode(&self, ids: &[u32], group_tokens: bool) -> String {
        let mut grouped: Vec<u32> = ids.to_vec();
        if group_tokens {
            grouped.dedup();
        }

        let mut text = String::new();
        for id in grouped {
            if id == self.vocab.pad_id() {
                continue;
            }
            if id == self.vocab.delimiter_id() {
                text.push(' ');
            } else if let Some(symbol) = self.vocab.symbol(id) {
                text.push_str(symbol);
            }
        }
        text.trim().to_string()
    }
}
