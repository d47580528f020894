//! Compact bitset representation for clades (taxon sets) in phylogenetic trees.
//!
//! # Overview
//! A clade is identified by the set of taxa it subtends. Each bit position
//! corresponds to a taxon index, so two clades from different posterior trees
//! are the same clade iff their bitsets are equal.
//!
//! # Example
//! For a run with taxa [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - Clade {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Clade {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset recording which taxa belong to a clade.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily large
/// taxon sets. Each u64 word holds 64 taxon indices.
///
/// A cardinality-1 bitset is a tip; a full-cardinality bitset is the root
/// clade. The bitset is the hash key of the clade registry, so it is never
/// mutated after registration.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed. Calculate as `(num_taxa + 63) / 64`
    ///
    /// # Example
    /// ```
    /// # use tree_annotate::bitset::Bitset;
    /// // For a run with 100 taxa, need 2 words (128 bits)
    /// let bs = Bitset::zeros(2);
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Creates the bitset of a tip clade: exactly one taxon present.
    ///
    /// # Example
    /// ```
    /// # use tree_annotate::bitset::Bitset;
    /// let bs = Bitset::singleton(1, 5);
    /// assert_eq!(bs.count_ones(), 1);
    /// assert!(bs.get(5));
    /// ```
    pub fn singleton(words: usize, idx: usize) -> Self {
        let mut bs = Bitset::zeros(words);
        bs.set(idx);
        bs
    }

    /// Sets the bit at the given index to 1, marking a taxon as present.
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6; // Equivalent to idx / 64
        let bit = idx & 63; // Equivalent to idx % 64
        self.0[word] |= 1u64 << bit;
    }

    /// Tests whether the taxon at the given index is present.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        let word = idx >> 6;
        let bit = idx & 63;
        (self.0[word] & (1u64 << bit)) != 0
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// An internal node's clade is the union of its children's clades:
    /// `self` becomes `self ∪ other`.
    ///
    /// # Example
    /// ```
    /// # use tree_annotate::bitset::Bitset;
    /// let mut left = Bitset::singleton(1, 0);  // {0}
    /// let right = Bitset::singleton(1, 1);     // {1}
    ///
    /// left.or_assign(&right); // {0} ∪ {1} = {0, 1}
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Counts the number of set bits (population count).
    ///
    /// Returns how many taxa are in this clade.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Tests whether `self ⊆ other`: every taxon of this clade is also in
    /// `other`. A single AND+compare per word.
    ///
    /// Used by the common-ancestor height pass to find, in a posterior tree,
    /// the smallest node containing a whole target clade.
    ///
    /// # Example
    /// ```
    /// # use tree_annotate::bitset::Bitset;
    /// let mut ab = Bitset::zeros(1);
    /// ab.set(0);
    /// ab.set(1);
    /// let mut abc = ab.clone();
    /// abc.set(2);
    /// assert!(ab.is_subset(&abc));
    /// assert!(!abc.is_subset(&ab));
    /// ```
    #[inline]
    pub fn is_subset(&self, other: &Bitset) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| (a & b) == *a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        assert_eq!(bs.0[0], 0b0101);
        assert!(bs.get(0));
        assert!(!bs.get(1));
        assert!(bs.get(2));
    }

    #[test]
    fn test_bitset_or() {
        let mut bs1 = Bitset::zeros(1);
        bs1.set(0);
        bs1.set(1);

        let mut bs2 = Bitset::zeros(1);
        bs2.set(2);
        bs2.set(3);

        bs1.or_assign(&bs2);
        assert_eq!(bs1.0[0], 0b1111);
    }

    #[test]
    fn test_count_ones() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        bs.set(5);
        assert_eq!(bs.count_ones(), 3);
    }

    /// Visual example: clades of a small tree.
    ///
    /// ```text
    ///           root
    ///          /    \
    ///        node1   D
    ///        /   \
    ///       A    node2
    ///            /   \
    ///           B     C
    /// ```
    ///
    /// Taxon mapping: A=0, B=1, C=2, D=3
    ///
    /// Clades:
    /// - node2: {B, C} → `0b0110`
    /// - node1: {A, B, C} → `0b0111`
    /// - root:  {A, B, C, D} → `0b1111`
    #[test]
    fn test_mini_tree_example() {
        // Clade of node2: {B, C}
        let mut node2 = Bitset::zeros(1);
        node2.set(1); // B
        node2.set(2); // C
        assert_eq!(node2.0[0], 0b0110);
        assert_eq!(node2.count_ones(), 2);

        // Clade of node1: {A} ∪ {B, C}
        let mut node1 = Bitset::singleton(1, 0); // A
        node1.or_assign(&node2);
        assert_eq!(node1.0[0], 0b0111);
        assert_eq!(node1.count_ones(), 3);

        // Every clade is a subset of the root clade
        let mut root = node1.clone();
        root.set(3); // D
        assert!(node2.is_subset(&root));
        assert!(node1.is_subset(&root));
        assert!(!root.is_subset(&node1));
    }

    #[test]
    fn test_subset_across_words() {
        let mut small = Bitset::zeros(2);
        small.set(3);
        small.set(100);

        let mut large = small.clone();
        large.set(64);

        assert!(small.is_subset(&large));
        assert!(small.is_subset(&small));
        assert!(!large.is_subset(&small));
    }

    #[test]
    fn test_large_taxon_set() {
        // More than 64 taxa (multiple words)
        let mut bs = Bitset::zeros(2);
        bs.set(0); // First word
        bs.set(63); // Last bit of first word
        bs.set(64); // First bit of second word
        bs.set(127); // Last bit of second word

        assert_eq!(bs.count_ones(), 4);
        assert_eq!(bs.0[0], 1u64 | (1u64 << 63));
        assert_eq!(bs.0[1], 1u64 | (1u64 << 63));
    }
}
