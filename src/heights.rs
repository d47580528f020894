//! Common-ancestor height summarization.
//!
//! # Overview
//! The mean-height policy only averages over trees that contain a clade
//! exactly, which biases weakly supported clades toward the few trees
//! that happen to contain them. The common-ancestor estimator instead
//! uses *every* tree: for each target clade it finds, per posterior tree,
//! the smallest node whose taxon set contains the clade (the common
//! ancestor of those taxa in that tree) and averages that node's height
//! over the whole trace.
//!
//! # Example
//! Target clade {A,B}; a posterior tree shaped ((A,C),B) has no {A,B}
//! node, but the root subtends {A,B,C} ⊇ {A,B}, so that tree contributes
//! the root height.
//!
//! In a postorder scan the first node whose bitset is a superset of the
//! clade is the minimal one: every node after it in postorder that also
//! contains the clade is one of its ancestors or a larger subtree.

use crate::bitset::Bitset;
use crate::clades::CladeRegistry;
use crate::error::{Result, SummaryError};
use crate::tree::SummaryTree;

/// Accumulates common-ancestor heights for the target tree's clades over
/// one extra pass of the trace, then applies them in a single batch.
pub struct CommonAncestorHeights {
    /// Target clades in postorder, paired with their target node ids.
    clades: Vec<(Bitset, usize)>,
    sums: Vec<f64>,
    trees: usize,
}

impl CommonAncestorHeights {
    /// Fixes the clade set from the target tree. The order is the
    /// target's postorder, so accumulation is deterministic.
    pub fn new(registry: &mut CladeRegistry, target: &SummaryTree) -> Result<Self> {
        let bitsets = registry.node_bitsets(target)?;
        let clades: Vec<(Bitset, usize)> = target
            .postorder()
            .into_iter()
            .map(|id| (bitsets[id].clone(), id))
            .collect();
        let sums = vec![0.0; clades.len()];
        Ok(CommonAncestorHeights {
            clades,
            sums,
            trees: 0,
        })
    }

    /// Accumulates one posterior tree: for every target clade, the height
    /// of the minimal node containing it.
    pub fn observe(&mut self, registry: &mut CladeRegistry, tree: &SummaryTree) -> Result<()> {
        let bitsets = registry.node_bitsets(tree)?;
        let order = tree.postorder();
        for (k, (clade, _)) in self.clades.iter().enumerate() {
            let ancestor = order
                .iter()
                .copied()
                .find(|&id| clade.is_subset(&bitsets[id]))
                .ok_or_else(|| SummaryError::MissingClade(registry.format_clade(clade)))?;
            self.sums[k] += tree.node(ancestor).height;
        }
        self.trees += 1;
        Ok(())
    }

    /// Writes the averaged heights onto the target tree in one batch.
    pub fn apply(&self, target: &mut SummaryTree) -> Result<()> {
        if self.trees == 0 {
            return Err(SummaryError::NoTrees);
        }
        for (k, &(_, id)) in self.clades.iter().enumerate() {
            target.node_mut(id).height = self.sums[k] / self.trees as f64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::parse_newick;

    fn tree(newick: &str) -> SummaryTree {
        parse_newick(newick, None).unwrap()
    }

    #[test]
    fn test_exact_clades_average_directly() {
        let mut reg = CladeRegistry::new(false);
        let target = tree("((A:1,B:1):1,C:2);");
        reg.register(&target).unwrap();

        let mut ca = CommonAncestorHeights::new(&mut reg, &target).unwrap();
        ca.observe(&mut reg, &tree("((A:1,B:1):1,C:2);")).unwrap();
        ca.observe(&mut reg, &tree("((A:3,B:3):1,C:4);")).unwrap();

        let mut annotated = target.clone();
        ca.apply(&mut annotated).unwrap();

        let ab = (0..annotated.len())
            .find(|&i| !annotated.is_tip(i) && i != annotated.root())
            .unwrap();
        assert_eq!(annotated.node(ab).height, 2.0);
        assert_eq!(annotated.node(annotated.root()).height, 3.0);
    }

    #[test]
    fn test_absent_clade_falls_back_to_enclosing_ancestor() {
        let mut reg = CladeRegistry::new(false);
        let target = tree("((A:1,B:1):1,C:2);");
        reg.register(&target).unwrap();

        let mut ca = CommonAncestorHeights::new(&mut reg, &target).unwrap();
        // {A,B} is present at height 1
        ca.observe(&mut reg, &tree("((A:1,B:1):1,C:2);")).unwrap();
        // {A,B} is absent; its common ancestor is the root at height 3
        ca.observe(&mut reg, &tree("((A:2,C:2):1,B:3);")).unwrap();

        let mut annotated = target.clone();
        ca.apply(&mut annotated).unwrap();

        let ab = (0..annotated.len())
            .find(|&i| !annotated.is_tip(i) && i != annotated.root())
            .unwrap();
        assert_eq!(annotated.node(ab).height, 2.0);
    }

    #[test]
    fn test_minimal_superset_not_root() {
        let mut reg = CladeRegistry::new(false);
        let target = tree("(((A:1,B:1):1,C:2):1,D:3);");
        reg.register(&target).unwrap();

        let mut ca = CommonAncestorHeights::new(&mut reg, &target).unwrap();
        // {A,B} missing, but {A,B,C} at height 2 encloses it; the root
        // at height 3 must not be chosen
        ca.observe(&mut reg, &tree("(((A:2,C:2):0,B:2):1,D:3);")).unwrap();

        let mut annotated = target.clone();
        ca.apply(&mut annotated).unwrap();

        let bitsets = reg.node_bitsets(&target).unwrap();
        let ab = (0..target.len())
            .find(|&i| bitsets[i].count_ones() == 2)
            .unwrap();
        assert_eq!(annotated.node(ab).height, 2.0);
    }

    #[test]
    fn test_tip_heights_come_from_the_trace() {
        let mut reg = CladeRegistry::new(false);
        let target = tree("((A:1,B:1):1,C:2);");
        reg.register(&target).unwrap();

        let mut ca = CommonAncestorHeights::new(&mut reg, &target).unwrap();
        ca.observe(&mut reg, &tree("((A:1,B:1):1,C:2);")).unwrap();
        let mut annotated = target.clone();
        ca.apply(&mut annotated).unwrap();

        let a = (0..annotated.len())
            .find(|&i| annotated.node(i).taxon.as_deref() == Some("A"))
            .unwrap();
        assert_eq!(annotated.node(a).height, 0.0);
    }

    #[test]
    fn test_apply_without_observations_fails() {
        let mut reg = CladeRegistry::new(false);
        let target = tree("((A:1,B:1):1,C:2);");
        reg.register(&target).unwrap();
        let ca = CommonAncestorHeights::new(&mut reg, &target).unwrap();
        let mut annotated = target.clone();
        assert!(matches!(
            ca.apply(&mut annotated).unwrap_err(),
            SummaryError::NoTrees
        ));
    }

    #[test]
    fn test_deterministic_across_repeats() {
        let trace = [
            "((A:1,B:1):1,C:2);",
            "((A:2,C:2):1,B:3);",
            "((A:1,B:1):2,C:3);",
        ];
        let run = || {
            let mut reg = CladeRegistry::new(false);
            let target = tree(trace[0]);
            reg.register(&target).unwrap();
            let mut ca = CommonAncestorHeights::new(&mut reg, &target).unwrap();
            for n in &trace {
                ca.observe(&mut reg, &tree(n)).unwrap();
            }
            let mut annotated = target.clone();
            ca.apply(&mut annotated).unwrap();
            (0..annotated.len())
                .map(|i| annotated.node(i).height)
                .collect::<Vec<f64>>()
        };
        assert_eq!(run(), run());
    }
}
