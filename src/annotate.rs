//! Turns collected attribute samples into annotations on the target tree.
//!
//! # Overview
//! One walk over the target tree. Every node looks up its clade, receives
//! `posterior` (internal nodes), and per tracked attribute a block of
//! summary statistics whose shape depends on the sampled type:
//!
//! ```text
//!   rate     (Real)      rate=mean, rate_median, rate_range={lo,hi},
//!                        rate_95%_HPD={lo,hi}
//!   height              height_mean, height_median, height_range,
//!                        height_95%_HPD (+ the node height itself,
//!                        per the height-summary policy)
//!   host     (Category)  host=mode, host.prob, host.set, host.set.prob
//!   location (Vector)    location1=..., location2=..., and joint
//!                        location1_80%HPD_1={...} region boundaries
//! ```
//!
//! The exact names match the established posterior-summary vocabulary so
//! existing tree viewers read the output unchanged.

use std::collections::BTreeMap;

use crate::clades::CladeRegistry;
use crate::error::Result;
use crate::hpd::{self, ContourSource};
use crate::stats;
use crate::tree::{SummaryTree, Value};

/// How the target tree's node heights are set from the posterior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeightSummary {
    /// Leave the target's own heights untouched.
    Keep,
    /// Mean of the clade's sampled heights. Can produce a node older than
    /// its parent when the two clades' samples disagree; the branch then
    /// gets a negative length on output.
    Mean,
    /// Median of the clade's sampled heights.
    Median,
    /// Mean height of the minimal enclosing node across all posterior
    /// trees, computed by the dedicated third pass. Well defined even for
    /// clades the posterior rarely contains.
    CommonAncestor,
}

/// Statistic writer for one summarization run.
pub struct NodeAnnotator {
    pub heights: HeightSummary,
    /// Internal nodes below this posterior get no statistics and no
    /// height change; only `posterior` itself is still written. The walk
    /// is never pruned. 0.0 disables filtering.
    pub posterior_limit: f64,
    /// Mass of the 1-D HPD intervals.
    pub hpd_mass: f64,
    /// Masses of the joint 2-D regions, one annotation block each.
    pub hpd2d_masses: Vec<f64>,
}

impl NodeAnnotator {
    /// Annotates every node of `target` from the registry's collected
    /// samples. Fails if a target clade has no registry entry.
    pub fn annotate(
        &self,
        registry: &mut CladeRegistry,
        target: &mut SummaryTree,
        contour: Option<&dyn ContourSource>,
    ) -> Result<()> {
        let bitsets = registry.node_bitsets(target)?;
        let tracked: Vec<String> = registry.tracked().to_vec();

        // The target came in carrying its own sampled values for the
        // tracked attributes. Clear them first: every surviving
        // annotation must be a summary, not a leftover input value.
        for id in 0..target.len() {
            let node = target.node_mut(id);
            for name in &tracked {
                node.attributes.remove(name);
            }
        }

        for id in 0..target.len() {
            let clade = registry.get(&bitsets[id])?;
            let posterior = clade.credibility;
            let is_tip = target.is_tip(id);
            let filter =
                self.posterior_limit > 0.0 && posterior < self.posterior_limit && !is_tip;

            if !filter {
                if let Some(columns) = clade.samples() {
                    let columns = columns.clone();
                    for (k, name) in tracked.iter().enumerate() {
                        let column = &columns[k];
                        if column.is_empty() {
                            continue;
                        }
                        if name == "height" {
                            self.annotate_height(target, id, column);
                        } else {
                            self.annotate_column(target, id, name, column, contour);
                        }
                    }
                }
            }

            // written last so a sampled attribute of the same name cannot
            // mask the credibility
            if !is_tip {
                target.set_attribute(id, "posterior", Value::Real(posterior));
            }
        }
        Ok(())
    }

    fn annotate_height(&self, tree: &mut SummaryTree, id: usize, column: &[Value]) {
        let values: Vec<f64> = column.iter().filter_map(Value::as_real).collect();
        self.numeric(tree, id, "height", "height_mean", &values);
        match self.heights {
            HeightSummary::Mean => tree.node_mut(id).height = stats::mean(&values),
            HeightSummary::Median => tree.node_mut(id).height = stats::median(&values),
            HeightSummary::Keep | HeightSummary::CommonAncestor => {}
        }
    }

    fn annotate_column(
        &self,
        tree: &mut SummaryTree,
        id: usize,
        name: &str,
        column: &[Value],
        contour: Option<&dyn ContourSource>,
    ) {
        match &column[0] {
            Value::Boolean(_) => {
                let values: Vec<f64> = column.iter().filter_map(Value::as_real).collect();
                tree.set_attribute(id, name, Value::Real(stats::mean(&values)));
            }
            Value::Real(_) => {
                let values: Vec<f64> = column.iter().filter_map(Value::as_real).collect();
                self.numeric(tree, id, name, name, &values);
            }
            Value::Category(_) => self.categorical(tree, id, name, column),
            Value::Vector(_) => self.vector(tree, id, name, column, contour),
            // output-only shape, never sampled
            Value::Categories(_) => {}
        }
    }

    /// Scalar block: mean always; median, range and HPD only when the
    /// samples actually vary (a constant's extra statistics are noise).
    fn numeric(
        &self,
        tree: &mut SummaryTree,
        id: usize,
        stem: &str,
        mean_name: &str,
        values: &[f64],
    ) {
        tree.set_attribute(id, mean_name, Value::Real(stats::mean(values)));
        let Some((lo, hi)) = stats::min_max(values) else {
            return;
        };
        if lo < hi {
            tree.set_attribute(
                id,
                &format!("{stem}_median"),
                Value::Real(stats::median(values)),
            );
            tree.set_attribute(id, &format!("{stem}_range"), Value::Vector(vec![lo, hi]));
            let (l, h) = hpd::interval(values, self.hpd_mass);
            tree.set_attribute(
                id,
                &format!("{stem}_{}%_HPD", format_pct(self.hpd_mass)),
                Value::Vector(vec![l, h]),
            );
        }
    }

    /// Mode plus the full relative-frequency table. A count tie
    /// concatenates the tied labels with `+` and scales the reported
    /// mode probability by the number of tied labels; categories iterate
    /// in sorted order so the output is identical across runs.
    fn categorical(&self, tree: &mut SummaryTree, id: usize, name: &str, column: &[Value]) {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for value in column {
            if let Value::Category(label) = value {
                *counts.entry(label).or_default() += 1;
            }
        }
        let total: usize = counts.values().sum();
        if total == 0 {
            return;
        }
        let max = counts.values().copied().max().unwrap_or(0);

        let mut mode = String::new();
        let mut tied = 0usize;
        for (&label, &count) in &counts {
            if count == max {
                if tied > 0 {
                    mode.push('+');
                }
                mode.push_str(label);
                tied += 1;
            }
        }

        tree.set_attribute(id, name, Value::Category(mode));
        tree.set_attribute(
            id,
            &format!("{name}.prob"),
            Value::Real(max as f64 / total as f64 * tied as f64),
        );
        tree.set_attribute(
            id,
            &format!("{name}.set"),
            Value::Categories(counts.keys().map(|s| s.to_string()).collect()),
        );
        tree.set_attribute(
            id,
            &format!("{name}.set.prob"),
            Value::Vector(
                counts
                    .values()
                    .map(|&c| c as f64 / total as f64)
                    .collect(),
            ),
        );
    }

    /// Per-component scalar blocks under `name1`, `name2`, ... plus, for
    /// bivariate traits, joint HPD region boundaries from the contour
    /// service (skipped when no service is configured).
    fn vector(
        &self,
        tree: &mut SummaryTree,
        id: usize,
        name: &str,
        column: &[Value],
        contour: Option<&dyn ContourSource>,
    ) {
        let dim = match &column[0] {
            Value::Vector(v) => v.len(),
            _ => return,
        };
        let mut components: Vec<Vec<f64>> = Vec::with_capacity(dim);
        for comp in 0..dim {
            let values: Vec<f64> = column
                .iter()
                .filter_map(|v| match v {
                    Value::Vector(x) => x.get(comp).copied(),
                    _ => None,
                })
                .collect();
            let stem = format!("{name}{}", comp + 1);
            self.numeric(tree, id, &stem, &stem, &values);
            components.push(values);
        }

        if dim != 2 {
            return;
        }
        let Some(contour) = contour else {
            return;
        };
        let varies = |v: &[f64]| stats::min_max(v).is_some_and(|(lo, hi)| lo < hi);
        if !varies(&components[0]) || !varies(&components[1]) {
            return;
        }
        for &mass in &self.hpd2d_masses {
            let pct = format_pct(mass);
            let polygons = contour.contour(&components[0], &components[1], mass);
            for (i, polygon) in polygons.iter().enumerate() {
                let xs: Vec<f64> = polygon.iter().map(|p| p.0).collect();
                let ys: Vec<f64> = polygon.iter().map(|p| p.1).collect();
                tree.set_attribute(
                    id,
                    &format!("{name}1_{pct}%HPD_{}", i + 1),
                    Value::Vector(xs),
                );
                tree.set_attribute(
                    id,
                    &format!("{name}2_{pct}%HPD_{}", i + 1),
                    Value::Vector(ys),
                );
            }
        }
    }
}

/// 0.95 → "95", 0.8 → "80", 0.825 → "82.5".
fn format_pct(mass: f64) -> String {
    let pct = mass * 100.0;
    if (pct - pct.round()).abs() < 1e-9 {
        format!("{}", pct.round() as i64)
    } else {
        format!("{pct}")
    }
}
