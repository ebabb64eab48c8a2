//! Letter frequency counting over a set of files.
//!
//! [`FileFetcher`] reads each file on a worker thread, the payload is mapped
//! to a [`LetterFrequency`] right there, and the aggregator merges the
//! per-file tables. Merging is element-wise addition, so the result does not
//! depend on the order in which files complete.

use std::path::PathBuf;

use serde::Serialize;

use crate::fetcher::{FetchError, Fetcher, FetcherExt, MapPayload};

pub const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Occurrence counts of the ASCII letters `a..=z`, case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LetterFrequency([u64; 26]);

impl LetterFrequency {
    pub fn new() -> LetterFrequency {
        LetterFrequency::default()
    }

    /// Counts the letters of `bytes`. Non-letters are ignored.
    pub fn count(bytes: &[u8]) -> LetterFrequency {
        let mut counts = [0u64; 26];
        for &b in bytes {
            let b = b.to_ascii_lowercase();
            if b.is_ascii_lowercase() {
                counts[usize::from(b - b'a')] += 1;
            }
        }
        LetterFrequency(counts)
    }

    /// Element-wise sum of two tables.
    pub fn merge(mut self, other: LetterFrequency) -> LetterFrequency {
        for (total, n) in self.0.iter_mut().zip(other.0) {
            *total += n;
        }
        self
    }

    /// Count for `letter`, or zero for anything outside `a..=z`/`A..=Z`.
    pub fn get(&self, letter: char) -> u64 {
        let letter = letter.to_ascii_lowercase();
        if letter.is_ascii_lowercase() {
            self.0[letter as usize - 'a' as usize]
        } else {
            0
        }
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// `(letter, count)` pairs in alphabetical order.
    pub fn iter(&self) -> impl Iterator<Item = (char, u64)> + '_ {
        ALPHABET.iter().map(|&b| char::from(b)).zip(self.0.iter().copied())
    }
}

/// Reads the whole file at the target path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    type Target = PathBuf;
    type Payload = Vec<u8>;

    fn fetch(&self, path: &PathBuf) -> Result<Vec<u8>, FetchError> {
        std::fs::read(path).map_err(|e| FetchError::io(path.display().to_string(), &e))
    }
}

/// A fetcher producing the letter frequency of each file.
pub fn letter_frequency_fetcher()
-> MapPayload<FileFetcher, impl Fn(Vec<u8>) -> LetterFrequency + Send + Sync> {
    FileFetcher.map_payload(|bytes: Vec<u8>| LetterFrequency::count(&bytes))
}
