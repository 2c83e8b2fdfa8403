//! Word - the mutable unit of BPE merging.
//!
//! A [`Word`] is a *Vec-as-arena* doubly-linked list of [`Symbol`]s. Links are
//! plain indices into the arena, so merges never move memory: a merged-away
//! symbol is tombstoned (`byte_len == 0`) and dropped later by a single
//! compaction pass.
//!
//! Two merge drivers live here:
//! - [`Word::merge`] applies one specific pair everywhere and reports the
//!   adjacency-count deltas a trainer needs.
//! - [`Word::merge_all`] applies a full ranked merge table with a priority
//!   queue, optionally with seeded BPE-dropout.

use std::{cmp::Ordering, collections::BinaryHeap};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    error::{BpeError, WordError},
    types::{MergeMap, Offsets, Pair, Rank, TokenId, WChange},
};

/// Seed used for dropout sampling unless the caller picks another one.
pub const DEFAULT_DROPOUT_SEED: u64 = 99;

/// BPE-dropout configuration: skip probability plus the sampler seed.
///
/// A fresh generator is seeded for every [`Word::merge_all`] call, so the same
/// word, merge table and `Dropout` always produce the same tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    p: f32,
    seed: u64,
}

impl Dropout {
    /// Creates a dropout setting with [`DEFAULT_DROPOUT_SEED`].
    ///
    /// # Errors
    ///
    /// Returns [`BpeError::InvalidDropout`] unless `p` lies in `[0, 1)`.
    pub fn new(p: f32) -> Result<Self, BpeError> {
        if !(0.0..1.0).contains(&p) {
            return Err(BpeError::InvalidDropout(p));
        }
        Ok(Self {
            p,
            seed: DEFAULT_DROPOUT_SEED,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn probability(&self) -> f32 {
        self.p
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Merge candidate in the priority queue.
///
/// Ordered by rank (lowest first) with position as the tiebreaker, so equal-rank
/// merges are applied leftmost-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Merge {
    /// Arena index of the left symbol.
    pos: usize,
    rank: Rank,
    /// Id the pair was expected to collapse into when queued.
    new_id: TokenId,
}

impl PartialOrd for Merge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Merge {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed (other vs self) to get min-heap behavior from BinaryHeap.
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.pos.cmp(&self.pos))
    }
}

/// One node of a [`Word`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// Vocabulary id of the substring this symbol currently spans.
    pub id: TokenId,
    /// Arena index of the previous live symbol, if any.
    pub prev: Option<usize>,
    /// Arena index of the next live symbol, if any.
    pub next: Option<usize>,
    /// Number of original-text bytes covered. Zero marks a tombstone.
    pub byte_len: usize,
}

impl Symbol {
    /// Creates an unlinked symbol.
    pub fn new(id: TokenId, byte_len: usize) -> Self {
        Self {
            id,
            prev: None,
            next: None,
            byte_len,
        }
    }

    /// Absorbs `other` (the right-hand side of a pair) into `self`.
    ///
    /// `other` itself is left untouched; the caller tombstones it.
    pub fn merge_with(&mut self, other: &Symbol, new_id: TokenId) {
        self.id = new_id;
        self.byte_len += other.byte_len;
        self.next = other.next;
    }

    pub fn is_tombstoned(&self) -> bool {
        self.byte_len == 0
    }
}

/// Ordered sequence of [`Symbol`]s for one text fragment.
///
/// Outside of an in-flight merge pass, links always mirror array order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word {
    symbols: Vec<Symbol>,
}

impl Word {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            symbols: Vec::with_capacity(capacity),
        }
    }

    /// Appends a symbol spanning `byte_len` bytes and links it to the tail.
    pub fn add(&mut self, id: TokenId, byte_len: usize) {
        let idx = self.symbols.len();
        let prev = match self.symbols.last_mut() {
            Some(last) => {
                last.next = Some(idx);
                Some(idx - 1)
            }
            None => None,
        };
        self.symbols.push(Symbol {
            id,
            prev,
            next: None,
            byte_len,
        });
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Inserts `symbol` at array position `i`, shifting later symbols right.
    ///
    /// # Errors
    ///
    /// Returns [`WordError::IndexOutOfBounds`] if `i > len`.
    pub fn insert(&mut self, symbol: Symbol, i: usize) -> Result<(), WordError> {
        if i > self.symbols.len() {
            return Err(WordError::IndexOutOfBounds {
                index: i,
                len: self.symbols.len(),
            });
        }
        self.symbols.insert(i, symbol);
        self.relink();
        Ok(())
    }

    /// Removes and returns the symbol at array position `i`.
    ///
    /// # Errors
    ///
    /// Returns [`WordError::IndexOutOfBounds`] if `i >= len`.
    pub fn remove(&mut self, i: usize) -> Result<Symbol, WordError> {
        if i >= self.symbols.len() {
            return Err(WordError::IndexOutOfBounds {
                index: i,
                len: self.symbols.len(),
            });
        }
        let removed = self.symbols.remove(i);
        self.relink();
        Ok(removed)
    }

    /// Replaces every occurrence of the adjacent pair `(c1, c2)` with a single
    /// `replacement` symbol, scanning once from left to right.
    ///
    /// For each replacement, up to four deltas are emitted: the adjacency broken
    /// and the adjacency created on each side that has a neighbour. The scan
    /// resumes right after the new symbol, so merging `(a, a)` in `a a a` only
    /// takes the leftmost pair. Training reproducibility depends on this exact
    /// order.
    ///
    /// # Errors
    ///
    /// Only on an internal index violation, which would be an engine bug.
    pub fn merge(
        &mut self,
        c1: TokenId,
        c2: TokenId,
        replacement: TokenId,
    ) -> Result<Vec<WChange>, WordError> {
        let mut changes = Vec::new();
        let mut i = 0;

        while i < self.symbols.len() {
            let is_pair = self.symbols[i].id == c1
                && self.symbols.get(i + 1).is_some_and(|next| next.id == c2);

            if is_pair {
                let first = self.symbols[i];
                let second = self.symbols[i + 1];

                if i > 0 {
                    let left = self.symbols[i - 1].id;
                    changes.push(WChange::new(left, first.id, -1));
                    changes.push(WChange::new(left, replacement, 1));
                }

                let mut merged = first;
                merged.merge_with(&second, replacement);

                self.insert(merged, i)?;
                self.remove(i + 1)?;
                self.remove(i + 1)?;

                if let Some(right) = self.symbols.get(i + 1).map(|s| s.id) {
                    changes.push(WChange::new(second.id, right, -1));
                    changes.push(WChange::new(replacement, right, 1));
                }
            }

            i += 1;
        }

        Ok(changes)
    }

    /// Applies every merge in `merges` that can fire, lowest rank first.
    ///
    /// With `dropout`, each popped candidate is skipped with probability `p`;
    /// skipped candidates go back into the queue as soon as a candidate is kept.
    /// Stale candidates (whose symbols changed since they were queued) are
    /// discarded silently. The word is compacted before returning.
    pub fn merge_all(&mut self, merges: &MergeMap, dropout: Option<&Dropout>) {
        let mut queue: BinaryHeap<Merge> = BinaryHeap::with_capacity(self.symbols.len());
        let mut skip: Vec<Merge> = Vec::with_capacity(queue.capacity());

        self.seed_queue(merges, &mut queue);

        let mut sampler = dropout
            .filter(|d| d.probability() > 0.0)
            .map(|d| (d.probability(), StdRng::seed_from_u64(d.seed())));

        while let Some(top) = queue.pop() {
            if let Some((p, rng)) = sampler.as_mut()
                && rng.random::<f32>() < *p
            {
                skip.push(top);
                continue;
            }

            queue.extend(skip.drain(..));
            self.apply_merge(top, merges, &mut queue);
        }

        self.compact();
    }

    /// Ids of the symbols in order.
    pub fn ids(&self) -> Vec<TokenId> {
        self.symbols.iter().map(|s| s.id).collect()
    }

    /// Half-open byte ranges of the symbols in order, starting at 0.
    pub fn offsets(&self) -> Vec<Offsets> {
        let mut pos = 0;
        self.symbols
            .iter()
            .map(|s| {
                let start = pos;
                pos += s.byte_len;
                (start, pos)
            })
            .collect()
    }

    /// Queues every adjacent pair of the current sequence found in `merges`.
    fn seed_queue(&self, merges: &MergeMap, queue: &mut BinaryHeap<Merge>) {
        for (pos, window) in self.symbols.windows(2).enumerate() {
            if let Some(val) = merges.get(&Pair(window[0].id, window[1].id)) {
                queue.push(Merge {
                    pos,
                    rank: val.rank,
                    new_id: val.new_id,
                });
            }
        }
    }

    /// Validates `top` against the current links and applies it.
    fn apply_merge(&mut self, top: Merge, merges: &MergeMap, queue: &mut BinaryHeap<Merge>) {
        let Some(left) = self.symbols.get(top.pos).copied() else {
            return;
        };
        if left.is_tombstoned() {
            return;
        }
        let Some(right_pos) = left.next else {
            return;
        };
        let Some(right) = self.symbols.get(right_pos).copied() else {
            return;
        };
        if right.is_tombstoned() {
            return;
        }

        // the pair may have changed since this candidate was queued
        match merges.get(&Pair(left.id, right.id)) {
            Some(val) if val.new_id == top.new_id => {}
            _ => return,
        }

        self.symbols[top.pos].merge_with(&right, top.new_id);
        self.symbols[right_pos].byte_len = 0;

        if let Some(next) = right.next
            && let Some(after) = self.symbols.get_mut(next)
        {
            after.prev = Some(top.pos);
        }

        let merged = self.symbols[top.pos];

        // new pair with the left neighbour
        if let Some(prev) = merged.prev
            && let Some(before) = self.symbols.get(prev)
            && !before.is_tombstoned()
            && let Some(val) = merges.get(&Pair(before.id, merged.id))
        {
            queue.push(Merge {
                pos: prev,
                rank: val.rank,
                new_id: val.new_id,
            });
        }

        // new pair with the right neighbour
        if let Some(next) = merged.next
            && let Some(after) = self.symbols.get(next)
            && !after.is_tombstoned()
            && let Some(val) = merges.get(&Pair(merged.id, after.id))
        {
            queue.push(Merge {
                pos: top.pos,
                rank: val.rank,
                new_id: val.new_id,
            });
        }
    }

    /// Drops tombstones and re-linearizes the links.
    fn compact(&mut self) {
        self.symbols.retain(|s| !s.is_tombstoned());
        self.relink();
    }

    fn relink(&mut self) {
        let n = self.symbols.len();
        for (i, symbol) in self.symbols.iter_mut().enumerate() {
            symbol.prev = i.checked_sub(1);
            symbol.next = (i + 1 < n).then_some(i + 1);
        }
    }
}
