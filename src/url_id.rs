//! Human-readable encounter URL ids.
//!
//! A URL id is a handful of distinct dictionary words, capitalized and
//! concatenated (`"AmberFalconRiverStoneMaple"`). The word list is loaded
//! once by the caller and injected; nothing here reads files lazily or keeps
//! global state.

use rand::seq::SliceRandom;
use rand::Rng;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

/// Default number of words per URL id.
pub const DEFAULT_URL_ID_WORDS: usize = 5;

/// Error type for word lists and URL id generation.
#[derive(Debug, thiserror::Error)]
pub enum WordListError {
    /// The word list could not be read.
    #[error("failed to read word list: {0}")]
    Io(#[from] std::io::Error),
    /// Not enough distinct words to build an id.
    #[error("word list has {available} words, {required} required")]
    TooFewWords {
        /// Words in the list.
        available: usize,
        /// Words per id.
        required: usize,
    },
}

/// Immutable, cheaply clonable list of words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordList {
    words: Arc<[String]>,
}

impl WordList {
    /// Build from an iterator of words. Blank entries are dropped.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words: words.into() }
    }

    /// Read one word per line.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, WordListError> {
        let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_words(lines))
    }

    /// Read one word per line from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WordListError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The words.
    pub fn words(&self) -> &[String] {
        &self.words
    }
}

/// Generates URL ids from an injected word list.
#[derive(Debug, Clone)]
pub struct UrlIdGenerator {
    words: WordList,
    size: usize,
}

impl UrlIdGenerator {
    /// Create a generator producing ids of `size` words.
    pub fn new(words: WordList, size: usize) -> Result<Self, WordListError> {
        if size == 0 || words.len() < size {
            return Err(WordListError::TooFewWords {
                available: words.len(),
                required: size,
            });
        }
        Ok(Self { words, size })
    }

    /// Words per id.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Generate an id using the given random source.
    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        self.words
            .words()
            .choose_multiple(rng, self.size)
            .map(|w| capitalize(w))
            .collect()
    }

    /// Generate an id using the thread-local random source.
    pub fn generate(&self) -> String {
        self.generate_with(&mut rand::thread_rng())
    }
}

/// First character uppercased, the rest lowercased.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
