//! Character vocabulary: build from transcripts, persist, reload.
//!
//! Ids are dense `0..N-1`. Characters are sorted before enumeration so the
//! same corpus always yields the same ids. The space character is always
//! part of the set and its id is re-keyed to the word delimiter; the unknown
//! and padding tokens take the two highest ids.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;

use scribe_settings::TokenizerSettings;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::parallel::WorkerPool;
use crate::types::{PrepError, Result, ResultExt};

/// Spellings of the three reserved symbols.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Unknown character.
    pub unk: String,
    /// Padding.
    pub pad: String,
    /// Stand-in for a literal space.
    pub word_delimiter: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self::from(&TokenizerSettings::default())
    }
}

impl From<&TokenizerSettings> for SpecialTokens {
    fn from(s: &TokenizerSettings) -> Self {
        Self {
            unk: s.unk_token.clone(),
            pad: s.pad_token.clone(),
            word_delimiter: s.word_delimiter_token.clone(),
        }
    }
}

impl SpecialTokens {
    fn contains(&self, symbol: &str) -> bool {
        symbol == self.unk || symbol == self.pad || symbol == self.word_delimiter
    }
}

/// Immutable symbol ↔ id mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    symbols: Vec<String>,
    index: HashMap<String, u32>,
    tokens: SpecialTokens,
    unk_id: u32,
    pad_id: u32,
    delimiter_id: u32,
}

/// Unique characters of one shard of transcripts.
pub fn character_set<S: AsRef<str>>(transcripts: &[S]) -> BTreeSet<char> {
    transcripts
        .iter()
        .flat_map(|t| t.as_ref().chars())
        .collect()
}

impl Vocabulary {
    /// Build the vocabulary from the union of characters in both splits.
    ///
    /// Character sets are collected per transcript on `pool` and merged by
    /// set union.
    pub fn build<S: AsRef<str> + Sync>(
        train: &[S],
        test: &[S],
        tokens: &SpecialTokens,
        pool: &WorkerPool,
    ) -> Result<Self> {
        let shard_union = |shard: &[S]| {
            pool.map_reduce(
                shard,
                BTreeSet::new,
                |t| t.as_ref().chars().collect::<BTreeSet<char>>(),
                |mut a, b| {
                    a.extend(b);
                    a
                },
            )
        };
        let mut chars = shard_union(train);
        chars.extend(shard_union(test));

        if chars.is_empty() {
            return Err(PrepError::EmptyVocabulary);
        }
        let _ = chars.insert(' ');

        let mut symbols = Vec::with_capacity(chars.len() + 2);
        for c in chars {
            if c == ' ' {
                symbols.push(tokens.word_delimiter.clone());
                continue;
            }
            let symbol = c.to_string();
            if tokens.contains(&symbol) {
                warn!(symbol = %symbol, "transcript character collides with a reserved token, dropped");
                continue;
            }
            symbols.push(symbol);
        }
        symbols.push(tokens.unk.clone());
        symbols.push(tokens.pad.clone());

        let vocab = Self::from_symbols(symbols, tokens.clone())?;
        info!(
            size = vocab.len(),
            train = train.len(),
            test = test.len(),
            "vocabulary built"
        );
        Ok(vocab)
    }

    /// Build from symbols listed in id order.
    pub fn from_symbols(symbols: Vec<String>, tokens: SpecialTokens) -> Result<Self> {
        let mut index = HashMap::with_capacity(symbols.len());
        for (id, symbol) in symbols.iter().enumerate() {
            let id = u32::try_from(id).vocabulary("id overflow")?;
            if index.insert(symbol.clone(), id).is_some() {
                return Err(PrepError::Vocabulary(format!("duplicate symbol {symbol:?}")));
            }
        }
        let lookup = |symbol: &str| {
            index
                .get(symbol)
                .copied()
                .ok_or_else(|| PrepError::Vocabulary(format!("missing reserved symbol {symbol:?}")))
        };
        let unk_id = lookup(&tokens.unk)?;
        let pad_id = lookup(&tokens.pad)?;
        let delimiter_id = lookup(&tokens.word_delimiter)?;
        if index.contains_key(" ") {
            return Err(PrepError::Vocabulary(
                "literal space must be replaced by the word delimiter".into(),
            ));
        }
        Ok(Self {
            symbols,
            index,
            tokens,
            unk_id,
            pad_id,
            delimiter_id,
        })
    }

    /// Read a `{symbol: id}` JSON artifact. Ids must be dense and unique.
    pub fn load(path: &Path, tokens: SpecialTokens) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .vocabulary(&format!("read {}", path.display()))?;
        let map: HashMap<String, u32> =
            serde_json::from_str(&raw).vocabulary(&format!("parse {}", path.display()))?;

        let mut slots: Vec<Option<String>> = vec![None; map.len()];
        for (symbol, id) in map {
            let slot = slots.get_mut(id as usize).ok_or_else(|| {
                PrepError::Vocabulary(format!("id {id} for {symbol:?} is out of range"))
            })?;
            if slot.is_some() {
                return Err(PrepError::Vocabulary(format!("id {id} assigned twice")));
            }
            *slot = Some(symbol);
        }
        // Every slot is filled: N entries with unique ids in 0..N.
        let symbols: Vec<String> = slots.into_iter().flatten().collect();
        let vocab = Self::from_symbols(symbols, tokens)?;
        debug!(path = %path.display(), size = vocab.len(), "vocabulary loaded");
        Ok(vocab)
    }

    /// Serialize as a JSON object in id order.
    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Write the artifact to `path`, creating parent directories.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PrepError::io(parent, e))?;
        }
        let file = std::fs::File::create(path).map_err(|e| PrepError::io(path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        self.write_json(&mut writer)?;
        writer.flush().map_err(|e| PrepError::io(path, e))?;
        info!(path = %path.display(), size = self.len(), "vocabulary persisted");
        Ok(())
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Always false for a valid vocabulary (reserved symbols exist).
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Id of `symbol`, if present.
    pub fn id(&self, symbol: &str) -> Option<u32> {
        self.index.get(symbol).copied()
    }

    /// Symbol for `id`, if in range.
    pub fn symbol(&self, id: u32) -> Option<&str> {
        self.symbols.get(id as usize).map(String::as_str)
    }

    /// Symbols in id order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Reserved token spellings.
    pub fn tokens(&self) -> &SpecialTokens {
        &self.tokens
    }

    /// Id of the unknown token.
    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    /// Id of the padding token.
    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    /// Id of the word delimiter.
    pub fn delimiter_id(&self) -> u32 {
        self.delimiter_id
    }
}

impl Serialize for Vocabulary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.symbols.iter().zip(0u32..))
    }
}
