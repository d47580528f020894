//! Rooted, attributed tree model for posterior tree traces.
//!
//! # Overview
//! Trees in an MCMC trace carry per-node annotations (evolutionary rates,
//! discrete traits, coordinate vectors, ...) alongside the topology and
//! branch lengths. The parser tags every annotation value once, at
//! ingestion, as a [`Value`] variant; every later consumer dispatches on
//! that tag instead of re-sniffing strings.
//!
//! # CRITICAL: Why taxon NAMES, not node ids
//! Node ids are assigned during parsing and differ from tree to tree even
//! when the taxa are identical. The [`TaxonIndex`] fixes one label → index
//! bijection for the whole run (from the first tree seen, or the NEXUS
//! TRANSLATE block), so topologically identical clades always map to the
//! same bitset.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, SummaryError};

/// An annotation value, tagged once at ingestion.
///
/// `Real`, `Boolean`, `Category` and `Vector` are the ingestion variants;
/// `Categories` only appears on output (the key set of a mode frequency
/// table). Ranges, HPD intervals and probability tables reuse `Vector`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Real(f64),
    Boolean(bool),
    Category(String),
    Vector(Vec<f64>),
    Categories(Vec<String>),
}

impl Value {
    /// Numeric view: reals as-is, booleans {0,1}-coded. `None` otherwise.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(x) => Some(*x),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

/// Stable bijection between taxon labels and bit positions.
///
/// Established once per run and reused by every pass, so that the clade
/// bitsets of all trees are directly comparable.
#[derive(Clone, Debug, Default)]
pub struct TaxonIndex {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl TaxonIndex {
    pub fn new() -> Self {
        TaxonIndex::default()
    }

    /// Looks a label up, inserting it at the next free index if new.
    /// Only the first tree of a run should ever insert.
    pub fn get_or_insert(&mut self, label: &str) -> usize {
        if let Some(&idx) = self.index.get(label) {
            return idx;
        }
        let idx = self.labels.len();
        self.labels.push(label.to_string());
        self.index.insert(label.to_string(), idx);
        idx
    }

    pub fn get(&self, label: &str) -> Result<usize> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| SummaryError::UnknownTaxon(label.to_string()))
    }

    pub fn label(&self, idx: usize) -> &str {
        &self.labels[idx]
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of u64 words a clade bitset needs for this taxon set.
    pub fn words(&self) -> usize {
        self.labels.len().div_ceil(64)
    }
}

/// One node of a [`SummaryTree`].
#[derive(Clone, Debug)]
pub struct SummaryNode {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Branch length to the parent; 0.0 at the root.
    pub length: f64,
    /// Node height: longest path to a descendant tip (tips sit at 0).
    /// Derived from branch lengths by [`SummaryTree::compute_heights`].
    /// The height-summary policy overwrites it on the target tree.
    pub height: f64,
    /// Taxon label; `Some` exactly at tips.
    pub taxon: Option<String>,
    pub attributes: HashMap<String, Value>,
}

/// Arena-backed rooted tree. Node 0 is always the root.
#[derive(Clone, Debug, Default)]
pub struct SummaryTree {
    nodes: Vec<SummaryNode>,
}

impl SummaryTree {
    pub fn new() -> Self {
        SummaryTree { nodes: Vec::new() }
    }

    /// Appends a node; wires it into `parent`'s child list if given.
    pub fn add_node(&mut self, parent: Option<usize>) -> usize {
        let id = self.nodes.len();
        self.nodes.push(SummaryNode {
            parent,
            children: Vec::new(),
            length: 0.0,
            height: 0.0,
            taxon: None,
            attributes: HashMap::new(),
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        id
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> &SummaryNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: usize) -> &mut SummaryNode {
        &mut self.nodes[id]
    }

    pub fn is_tip(&self, id: usize) -> bool {
        self.nodes[id].children.is_empty()
    }

    pub fn tip_count(&self) -> usize {
        (0..self.nodes.len()).filter(|&i| self.is_tip(i)).count()
    }

    /// Postorder node ids: every child precedes its parent, siblings in
    /// left-to-right order. Iterative, so deep trees cannot overflow the
    /// stack.
    pub fn postorder(&self) -> Vec<usize> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let mut stack = vec![self.root()];
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().copied());
        }
        order.reverse();
        order
    }

    /// Derives node heights from branch lengths: tips at 0, each internal
    /// node at the maximum of `child.height + child.length`. For an
    /// ultrametric (time) tree all root-to-tip paths agree and this is the
    /// usual node age.
    pub fn compute_heights(&mut self) {
        for id in self.postorder() {
            let h = if self.is_tip(id) {
                0.0
            } else {
                self.nodes[id]
                    .children
                    .iter()
                    .map(|&c| self.nodes[c].height + self.nodes[c].length)
                    .fold(f64::NEG_INFINITY, f64::max)
            };
            self.nodes[id].height = h;
        }
    }

    pub fn set_attribute(&mut self, id: usize, name: &str, value: Value) {
        self.nodes[id].attributes.insert(name.to_string(), value);
    }

    pub fn attribute(&self, id: usize, name: &str) -> Option<&Value> {
        self.nodes[id].attributes.get(name)
    }

    /// Sorted union of attribute names over all nodes. Sorted so that the
    /// collection tuple layout is deterministic across runs.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for node in &self.nodes {
            for name in node.attributes.keys() {
                names.insert(name.clone());
            }
        }
        names.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds ((A:1,B:1):1,C:2); the workhorse fixture.
    pub fn three_taxon_tree() -> SummaryTree {
        let mut t = SummaryTree::new();
        let root = t.add_node(None);
        let ab = t.add_node(Some(root));
        t.node_mut(ab).length = 1.0;
        let a = t.add_node(Some(ab));
        t.node_mut(a).length = 1.0;
        t.node_mut(a).taxon = Some("A".to_string());
        let b = t.add_node(Some(ab));
        t.node_mut(b).length = 1.0;
        t.node_mut(b).taxon = Some("B".to_string());
        let c = t.add_node(Some(root));
        t.node_mut(c).length = 2.0;
        t.node_mut(c).taxon = Some("C".to_string());
        t.compute_heights();
        t
    }

    #[test]
    fn test_postorder_children_before_parents() {
        let t = three_taxon_tree();
        let order = t.postorder();
        assert_eq!(order.len(), t.len());
        let pos: HashMap<usize, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        for id in 0..t.len() {
            for &c in &t.node(id).children {
                assert!(pos[&c] < pos[&id], "child {c} must precede parent {id}");
            }
        }
        // root last
        assert_eq!(*order.last().unwrap(), t.root());
    }

    #[test]
    fn test_heights_from_lengths() {
        let t = three_taxon_tree();
        // tips at 0, (A,B) at 1, root at 2
        assert_eq!(t.node(2).height, 0.0);
        assert_eq!(t.node(1).height, 1.0);
        assert_eq!(t.node(0).height, 2.0);
    }

    #[test]
    fn test_taxon_index_is_stable() {
        let mut idx = TaxonIndex::new();
        assert_eq!(idx.get_or_insert("B"), 0);
        assert_eq!(idx.get_or_insert("A"), 1);
        // repeated lookups never reassign
        assert_eq!(idx.get_or_insert("B"), 0);
        assert_eq!(idx.get("A").unwrap(), 1);
        assert!(idx.get("Z").is_err());
        assert_eq!(idx.words(), 1);
    }

    #[test]
    fn test_value_as_real() {
        assert_eq!(Value::Real(2.5).as_real(), Some(2.5));
        assert_eq!(Value::Boolean(true).as_real(), Some(1.0));
        assert_eq!(Value::Boolean(false).as_real(), Some(0.0));
        assert_eq!(Value::Category("x".into()).as_real(), None);
    }

    #[test]
    fn test_attribute_names_sorted_union() {
        let mut t = three_taxon_tree();
        t.set_attribute(1, "rate", Value::Real(0.5));
        t.set_attribute(0, "posterior", Value::Real(1.0));
        assert_eq!(t.attribute_names(), vec!["posterior", "rate"]);
    }
}
