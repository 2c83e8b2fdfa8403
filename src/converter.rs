//! Byte → code-point offset conversion.
//!
//! The merge engine works on byte lengths, while callers (and the
//! HuggingFace-compatible formats) expect offsets counted in Unicode code
//! points. Every offset pair leaving the model goes through this map.

use rustc_hash::FxHashMap;

use crate::types::Offsets;

/// Maps every byte offset of a text to the index of the code point containing it.
#[derive(Debug, Clone)]
pub struct BytesToCharOffsetConverter {
    map: FxHashMap<usize, usize>,
    byte_len: usize,
    char_len: usize,
}

impl BytesToCharOffsetConverter {
    /// Builds the map with one linear scan over the code points of `text`.
    ///
    /// Each byte of a multi-byte code point maps to that code point's index.
    pub fn new(text: &str) -> Self {
        let mut map = FxHashMap::with_capacity_and_hasher(text.len(), Default::default());
        let mut byte = 0;
        let mut char_len = 0;

        for (char_idx, c) in text.chars().enumerate() {
            let width = c.len_utf8();
            for b in byte..byte + width {
                map.insert(b, char_idx);
            }
            byte += width;
            char_len = char_idx + 1;
        }

        Self {
            map,
            byte_len: byte,
            char_len,
        }
    }

    /// Code-point index of the character containing byte `offset`.
    pub fn get(&self, offset: usize) -> Option<usize> {
        self.map.get(&offset).copied()
    }

    /// Converts a half-open byte range into a half-open code-point range.
    ///
    /// The end is taken from the last byte inside the range, so a range that
    /// covers only part of a code point (as byte-fallback tokens do) still maps
    /// to that whole code point. Returns `None` when the range is not inside
    /// the text.
    pub fn convert(&self, offsets: Offsets) -> Option<Offsets> {
        let (start, end) = offsets;
        if start > end || end > self.byte_len {
            return None;
        }
        if start == self.byte_len {
            return Some((self.char_len, self.char_len));
        }

        let char_start = self.get(start)?;
        if start == end {
            return Some((char_start, char_start));
        }
        let char_end = self.get(end - 1)? + 1;
        Some((char_start, char_end))
    }

    /// The raw byte → code-point map.
    pub fn as_map(&self) -> &FxHashMap<usize, usize> {
        &self.map
    }

    pub fn char_len(&self) -> usize {
        self.char_len
    }
}
