//! Character-Level Tokenizer
//!
//! Every distinct character of the training text becomes one token. The
//! vocabulary is the sorted set of those characters plus one extra id, the
//! **boundary token**, which marks both the start and the end of a document.
//!
//! ## Example
//!
//! ```text
//! text:   "hello"
//! chars:  ['e', 'h', 'l', 'o']          ids 0..4
//! boundary token: 4                     vocab_size = 5
//!
//! encode("hello")     = [1, 0, 2, 2, 3]
//! encode_doc("hello") = [4, 1, 0, 2, 2, 3, 4]
//! ```
//!
//! ## Lossy Round Trips
//!
//! Characters that were not in the training text have no id and are dropped by
//! [`CharTokenizer::encode`]; ids that are not characters (the boundary token or
//! anything out of range) are dropped by [`CharTokenizer::decode`]. Round trips
//! are therefore exact only for text drawn from the vocabulary.

use std::collections::{BTreeSet, HashMap};

/// A character tokenizer built from a training text
#[derive(Debug, Clone, PartialEq)]
pub struct CharTokenizer {
    /// Sorted distinct characters; a character's index is its id
    chars: Vec<char>,

    /// Inverse of `chars`
    ids: HashMap<char, usize>,
}

impl CharTokenizer {
    /// Build the vocabulary from every distinct character in `text`
    ///
    /// # Example
    ///
    /// ```rust
    /// # use microgpt::CharTokenizer;
    /// let tok = CharTokenizer::new("abba");
    /// assert_eq!(tok.chars(), &['a', 'b']);
    /// assert_eq!(tok.boundary_token(), 2);
    /// assert_eq!(tok.vocab_size(), 3);
    /// ```
    pub fn new(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect::<BTreeSet<_>>().into_iter().collect();
        Self::from_chars(chars)
    }

    /// Rebuild a tokenizer from an already-sorted character list
    pub fn from_chars(chars: Vec<char>) -> Self {
        let ids = chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { chars, ids }
    }

    /// Convert text to token ids, silently skipping unknown characters
    pub fn encode(&self, text: &str) -> Vec<usize> {
        text.chars()
            .filter_map(|c| self.ids.get(&c).copied())
            .collect()
    }

    /// Convert token ids back to text, skipping the boundary token and any
    /// out-of-range id
    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter()
            .filter_map(|&id| self.chars.get(id))
            .collect()
    }

    /// Encode a whole document wrapped in boundary tokens
    ///
    /// # Returns
    ///
    /// `[boundary] + encode(text) + [boundary]`
    pub fn encode_doc(&self, text: &str) -> Vec<usize> {
        let bos = self.boundary_token();
        let mut ids = Vec::with_capacity(text.len() + 2);
        ids.push(bos);
        ids.extend(self.encode(text));
        ids.push(bos);
        ids
    }

    /// Number of distinct characters plus the boundary token
    pub fn vocab_size(&self) -> usize {
        self.chars.len() + 1
    }

    /// Id of the start/end-of-document token
    pub fn boundary_token(&self) -> usize {
        self.chars.len()
    }

    /// The sorted character list; index = id
    pub fn chars(&self) -> &[char] {
        &self.chars
    }
}
