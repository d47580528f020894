//! Clade registry: occurrence counts, credibilities, and attribute
//! sample collection keyed by taxon bitset.
//!
//! # Overview
//! Pass 1 over the trace registers every clade and counts how many trees
//! contain it; `credibility = count / trees_used` after the pass. The
//! registry then scores candidate summary trees (sum of log clade
//! credibilities) and, once a target is fixed, collects per-node attribute
//! samples in pass 2 for exactly the target's clades. Memory stays
//! proportional to the target tree, not the trace.
//!
//! # Example
//! With taxa A..D and a posterior where {A,B} appears in 3 of 4 trees:
//!
//! ```text
//!   bitset 0b0011 → count 3, credibility 0.75
//! ```
//!
//! Any tree containing {A,B} gains ln(0.75) toward its credibility score.

use std::collections::HashMap;

use crate::bitset::Bitset;
use crate::error::{Result, SummaryError};
use crate::stats;
use crate::tree::{SummaryTree, TaxonIndex, Value};

/// One registered clade.
#[derive(Clone, Debug)]
pub struct Clade {
    pub bitset: Bitset,
    /// Trees (after burn-in) containing this clade.
    pub count: usize,
    /// `count / trees_used`; 0.0 until credibilities are calculated.
    pub credibility: f64,
    /// Per-tracked-attribute sample columns. `Some` only for clades of
    /// the target tree, and only once collection has begun.
    samples: Option<Vec<Vec<Value>>>,
    /// Collection-pass occurrences, used to enforce uniform column
    /// coverage.
    collected: usize,
}

impl Clade {
    fn new(bitset: Bitset) -> Self {
        Clade {
            bitset,
            count: 0,
            credibility: 0.0,
            samples: None,
            collected: 0,
        }
    }

    /// Collected sample columns, indexed like the registry's tracked
    /// attribute list.
    pub fn samples(&self) -> Option<&Vec<Vec<Value>>> {
        self.samples.as_ref()
    }
}

/// Aggregate credibility figures for the registered clades.
#[derive(Clone, Debug)]
pub struct CredibilityReport {
    pub unique_clades: usize,
    /// Clades seen in more than one tree.
    pub recurring_clades: usize,
    pub min: f64,
    pub mean: f64,
    pub median: f64,
    /// (credibility threshold, number of clades at or above it).
    pub thresholds: Vec<(f64, usize)>,
}

/// The clade → count/credibility/samples map for one summarization run.
///
/// The embedded [`TaxonIndex`] is fixed by the first tree registered;
/// later trees must use the same taxon set.
pub struct CladeRegistry {
    clades: HashMap<Bitset, Clade>,
    taxa: TaxonIndex,
    include_tips: bool,
    tracked: Vec<String>,
}

impl CladeRegistry {
    /// `include_tips` controls whether tip (single-taxon) clades get
    /// counted entries; their credibility is always 1 in practice, so the
    /// default pipeline leaves them out of the counting pass.
    pub fn new(include_tips: bool) -> Self {
        CladeRegistry {
            clades: HashMap::new(),
            taxa: TaxonIndex::new(),
            include_tips,
            tracked: Vec::new(),
        }
    }

    pub fn taxa(&self) -> &TaxonIndex {
        &self.taxa
    }

    /// Number of distinct registered clades.
    pub fn len(&self) -> usize {
        self.clades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clades.is_empty()
    }

    /// Attribute names whose samples are being collected, in column order.
    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    /// Maps every node of `tree` to its clade bitset (indexed by node id).
    ///
    /// The first call fixes the taxon index; later calls fail with
    /// [`SummaryError::UnknownTaxon`] on any label outside that set.
    pub fn node_bitsets(&mut self, tree: &SummaryTree) -> Result<Vec<Bitset>> {
        let order = tree.postorder();
        if self.taxa.is_empty() {
            for &id in &order {
                if let Some(label) = &tree.node(id).taxon {
                    self.taxa.get_or_insert(label);
                }
            }
        }
        let words = self.taxa.words();
        let mut bitsets = vec![Bitset::zeros(words); tree.len()];
        for &id in &order {
            if tree.is_tip(id) {
                let label = tree.node(id).taxon.as_deref().unwrap_or("");
                bitsets[id] = Bitset::singleton(words, self.taxa.get(label)?);
            } else {
                let mut bs = Bitset::zeros(words);
                for &child in &tree.node(id).children {
                    bs.or_assign(&bitsets[child]);
                }
                bitsets[id] = bs;
            }
        }
        Ok(bitsets)
    }

    /// Registers every clade of `tree`, incrementing occurrence counts.
    /// Returns the root clade's bitset.
    pub fn register(&mut self, tree: &SummaryTree) -> Result<Bitset> {
        let bitsets = self.node_bitsets(tree)?;
        for id in 0..tree.len() {
            if tree.is_tip(id) && !self.include_tips {
                continue;
            }
            let bs = &bitsets[id];
            match self.clades.get_mut(bs) {
                Some(clade) => clade.count += 1,
                None => {
                    let mut clade = Clade::new(bs.clone());
                    clade.count = 1;
                    self.clades.insert(bs.clone(), clade);
                }
            }
        }
        Ok(bitsets[tree.root()].clone())
    }

    /// Converts counts into credibilities. Fails if any count exceeds
    /// `trees_used`: the counting pass and this call then disagree about
    /// the stream.
    pub fn calculate_credibilities(&mut self, trees_used: usize) -> Result<()> {
        if trees_used == 0 {
            return Err(SummaryError::NoTrees);
        }
        for clade in self.clades.values_mut() {
            if clade.count > trees_used {
                return Err(SummaryError::InconsistentCount {
                    count: clade.count,
                    trees: trees_used,
                });
            }
            clade.credibility = clade.count as f64 / trees_used as f64;
        }
        Ok(())
    }

    /// Sum of ln(credibility) over the internal-node clades of `tree`.
    ///
    /// The maximum-clade-credibility tree is the trace tree maximizing
    /// this score. A clade absent from the registry contributes ln(0) =
    /// −∞, so such a tree can never win.
    pub fn log_clade_credibility(&mut self, tree: &SummaryTree) -> Result<f64> {
        let bitsets = self.node_bitsets(tree)?;
        let mut score = 0.0;
        for id in 0..tree.len() {
            if tree.is_tip(id) {
                continue;
            }
            let credibility = self
                .clades
                .get(&bitsets[id])
                .map(|c| c.credibility)
                .unwrap_or(0.0);
            score += credibility.ln();
        }
        Ok(score)
    }

    /// Opens sample columns for every clade of the target tree, tips
    /// included. Target clades absent from the registry (possible with a
    /// user-supplied target) get zero-count entries, so collection and
    /// annotation always find them.
    pub fn begin_collection(&mut self, target: &SummaryTree, attributes: &[String]) -> Result<()> {
        self.tracked = attributes.to_vec();
        let columns = self.tracked.len();
        for bs in self.node_bitsets(target)? {
            let clade = self
                .clades
                .entry(bs)
                .or_insert_with_key(|k| Clade::new(k.clone()));
            clade.samples = Some(vec![Vec::new(); columns]);
            clade.collected = 0;
        }
        Ok(())
    }

    /// Pass-2 step: appends one sample per tracked attribute for every
    /// node of `tree` whose clade has open columns.
    ///
    /// `height` and `length` are synthesized from the tree geometry.
    /// Other attributes may be absent from a clade entirely; its column
    /// stays empty and is never annotated. Partial coverage (present on
    /// some occurrences of a clade, missing on others) is fatal: the
    /// summary statistics assume each column covers every occurrence.
    pub fn collect_attributes(&mut self, tree: &SummaryTree) -> Result<()> {
        let bitsets = self.node_bitsets(tree)?;
        let CladeRegistry { clades, tracked, .. } = self;
        for id in 0..tree.len() {
            let Some(clade) = clades.get_mut(&bitsets[id]) else {
                continue;
            };
            let Some(columns) = clade.samples.as_mut() else {
                continue;
            };
            let node = tree.node(id);
            let seen = clade.collected;
            for (k, name) in tracked.iter().enumerate() {
                match name.as_str() {
                    "height" => columns[k].push(Value::Real(node.height)),
                    "length" => columns[k].push(Value::Real(node.length)),
                    _ => match node.attributes.get(name) {
                        Some(value) => {
                            if columns[k].len() != seen {
                                return Err(SummaryError::MissingAttribute(name.clone()));
                            }
                            columns[k].push(value.clone());
                        }
                        None => {
                            if !columns[k].is_empty() {
                                return Err(SummaryError::MissingAttribute(name.clone()));
                            }
                        }
                    },
                }
            }
            clade.collected += 1;
        }
        Ok(())
    }

    /// Looks a clade up, failing with a readable taxon list if absent.
    pub fn get(&self, bitset: &Bitset) -> Result<&Clade> {
        self.clades
            .get(bitset)
            .ok_or_else(|| SummaryError::MissingClade(self.format_clade(bitset)))
    }

    /// `{A,B,C}`-style rendering of a clade's taxon set.
    pub fn format_clade(&self, bitset: &Bitset) -> String {
        let labels: Vec<&str> = (0..self.taxa.len())
            .filter(|&i| bitset.get(i))
            .map(|i| self.taxa.label(i))
            .collect();
        format!("{{{}}}", labels.join(","))
    }

    /// Summary of clade credibilities across the registry, with counts at
    /// the conventional support thresholds.
    pub fn report(&self) -> CredibilityReport {
        let credibilities: Vec<f64> = self.clades.values().map(|c| c.credibility).collect();
        self.aggregate(credibilities)
    }

    /// Same figures restricted to the internal-node clades of `tree`:
    /// how well supported the chosen summary tree actually is.
    pub fn target_report(&mut self, tree: &SummaryTree) -> Result<CredibilityReport> {
        let bitsets = self.node_bitsets(tree)?;
        let credibilities = (0..tree.len())
            .filter(|&id| !tree.is_tip(id))
            .map(|id| self.get(&bitsets[id]).map(|c| c.credibility))
            .collect::<Result<Vec<f64>>>()?;
        Ok(self.aggregate(credibilities))
    }

    fn aggregate(&self, credibilities: Vec<f64>) -> CredibilityReport {
        let thresholds = [1.0, 0.99, 0.95, 0.5]
            .into_iter()
            .map(|t| (t, credibilities.iter().filter(|&&c| c >= t).count()))
            .collect();
        CredibilityReport {
            unique_clades: self.clades.len(),
            recurring_clades: self.clades.values().filter(|c| c.count > 1).count(),
            min: stats::min_max(&credibilities).map(|(lo, _)| lo).unwrap_or(0.0),
            mean: stats::mean(&credibilities),
            median: stats::median(&credibilities),
            thresholds,
        }
    }
}
