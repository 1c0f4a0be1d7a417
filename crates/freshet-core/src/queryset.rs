use crate::types::QueryId;

/// Grow-on-insert bitmap over query ids.
///
/// Microbatches address their target queries with one of these; the wire
/// codec ships the raw words, so membership layout is part of the wire
/// format (bit `id % 64` of word `id / 64`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySet {
    words: Vec<u64>,
}

impl QuerySet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set containing exactly `id`.
    pub fn singleton(id: QueryId) -> Self {
        let mut set = Self::new();
        set.insert(id);
        set
    }

    /// Builds a set from raw bitmap words (wire decode path).
    pub fn from_words(words: Vec<u64>) -> Self {
        let mut set = Self { words };
        set.trim();
        set
    }

    /// Raw bitmap words (wire encode path). Never ends in a zero word.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn insert(&mut self, id: QueryId) {
        let word = (id / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (id % 64);
    }

    pub fn remove(&mut self, id: QueryId) {
        let word = (id / 64) as usize;
        if word < self.words.len() {
            self.words[word] &= !(1 << (id % 64));
            self.trim();
        }
    }

    pub fn contains(&self, id: QueryId) -> bool {
        let word = (id / 64) as usize;
        word < self.words.len() && self.words[word] & (1 << (id % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of member ids.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Adds every member of `other`.
    pub fn union_with(&mut self, other: &QuerySet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst |= *src;
        }
    }

    /// True if every member of `self` is also in `other`.
    pub fn is_subset_of(&self, other: &QuerySet) -> bool {
        self.words.iter().enumerate().all(|(i, w)| {
            let ow = other.words.get(i).copied().unwrap_or(0);
            w & !ow == 0
        })
    }

    /// Smallest member, if any.
    pub fn first(&self) -> Option<QueryId> {
        self.iter().next()
    }

    /// Removes and returns the smallest member.
    pub fn pop_first(&mut self) -> Option<QueryId> {
        let id = self.first()?;
        self.remove(id);
        Some(id)
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = QueryId> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, word)| {
            (0..64).filter_map(move |bit| {
                if word & (1 << bit) != 0 {
                    Some((wi * 64) as QueryId + bit as QueryId)
                } else {
                    None
                }
            })
        })
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}
