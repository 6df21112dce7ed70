//! Fixed-capacity bit-set used for component sets and system requirements.
//!
//! A [`Bitfield`] is sized once at construction and never grows. Entities
//! carry one describing the component kinds they own; systems carry one
//! describing the kinds they require. Matching an entity against a system is
//! a single [`Bitfield::test_mask`] call.

use std::fmt;

type Word = u64;

const WORD_BITS: usize = Word::BITS as usize;

// ---------------------------------------------------------------------------
// Bitfield
// ---------------------------------------------------------------------------

/// A zero-initialised set of bits backed by `ceil(num_bits / 64)` words.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bitfield {
    words: Box<[Word]>,
}

impl Bitfield {
    /// Allocate a bit-set able to hold `num_bits` bits, all cleared.
    ///
    /// # Panics
    ///
    /// Panics if `num_bits` is zero.
    pub fn new(num_bits: usize) -> Self {
        assert!(num_bits >= 1, "Bitfield::new({num_bits}): invalid size");

        let num_words = num_bits.div_ceil(WORD_BITS);

        Self {
            words: vec![0; num_words].into_boxed_slice(),
        }
    }

    /// Number of bits this set can address (rounded up to whole words).
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    #[inline]
    fn locate(bit: usize) -> (usize, Word) {
        (bit / WORD_BITS, 1 << (bit % WORD_BITS))
    }

    /// Set `bit`.
    #[inline]
    pub fn set(&mut self, bit: usize) {
        let (word, mask) = Self::locate(bit);
        self.words[word] |= mask;
    }

    /// Clear `bit`.
    #[inline]
    pub fn clear(&mut self, bit: usize) {
        let (word, mask) = Self::locate(bit);
        self.words[word] &= !mask;
    }

    /// Whether `bit` is set.
    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        let (word, mask) = Self::locate(bit);
        self.words[word] & mask != 0
    }

    /// Clear every bit.
    pub fn reset(&mut self) {
        self.words.fill(0);
    }

    /// Returns `true` iff every bit set in `mask` is also set in `self`.
    ///
    /// Both sets are expected to come from the same registry and therefore
    /// have the same width. Words are compared from the highest index down;
    /// the result does not depend on the order.
    pub fn test_mask(&self, mask: &Bitfield) -> bool {
        debug_assert_eq!(
            self.words.len(),
            mask.words.len(),
            "test_mask: bitfields of different widths"
        );

        self.words
            .iter()
            .zip(mask.words.iter())
            .rev()
            .all(|(bits, mask)| bits & mask == *mask)
    }

    /// Whether no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterate over the indices of all set bits, lowest first.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..WORD_BITS)
                .filter(move |b| word & (1 << b) != 0)
                .map(move |b| i * WORD_BITS + b)
        })
    }
}

impl fmt::Debug for Bitfield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter_ones()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
