//! The 2–3 pass summarization pipeline.
//!
//! Pass 1 streams the trace, registering clades and counting occurrences;
//! the maximum-clade-credibility scan (or a user target) then fixes the
//! target tree; pass 2 streams again, collecting attribute samples for
//! exactly the target's clades; an optional pass 3 accumulates
//! common-ancestor heights. Annotation is a single walk at the end.
//!
//! Every pass mutates registry state the next pass depends on, so the
//! pipeline is strictly sequential.

use std::path::PathBuf;
use std::time::Instant;

use crate::annotate::{HeightSummary, NodeAnnotator};
use crate::clades::CladeRegistry;
use crate::error::{Result, SummaryError};
use crate::heights::CommonAncestorHeights;
use crate::hpd::ContourSource;
use crate::io::{self, TreeTrace};
use crate::tree::SummaryTree;

/// Where the target tree comes from.
pub enum TargetChoice {
    /// The trace tree maximizing the sum of log clade credibilities.
    MaxCladeCredibility,
    /// A tree supplied by the user (NEXUS or bare Newick file).
    UserTree(PathBuf),
}

/// Knobs for one run.
pub struct SummaryOptions {
    /// Drop the first N trees.
    pub burnin_trees: usize,
    /// Keep only trees with STATE_ greater than this.
    pub burnin_states: usize,
    /// Internal nodes below this posterior get no statistics.
    pub posterior_limit: f64,
    pub heights: HeightSummary,
    /// Mass of 1-D HPD intervals.
    pub hpd_mass: f64,
    /// Masses of joint 2-D HPD regions.
    pub hpd2d_masses: Vec<f64>,
    /// Count tip (single-taxon) clades in pass 1.
    pub include_tips: bool,
    pub quiet: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        SummaryOptions {
            burnin_trees: 0,
            burnin_states: 0,
            posterior_limit: 0.0,
            heights: HeightSummary::Mean,
            hpd_mass: 0.95,
            hpd2d_masses: vec![0.8],
            include_tips: false,
            quiet: true,
        }
    }
}

/// What a finished run looked like.
#[derive(Debug)]
pub struct RunContext {
    pub total_trees: usize,
    pub trees_used: usize,
    /// Trace name of the chosen target (file stem for a user tree).
    pub target_name: String,
}

/// Drives the passes over a [`TreeTrace`] and produces the annotated
/// target tree.
pub struct PosteriorSummarizer {
    pub options: SummaryOptions,
    pub target: TargetChoice,
    pub contour: Option<Box<dyn ContourSource>>,
}

impl PosteriorSummarizer {
    pub fn new(options: SummaryOptions, target: TargetChoice) -> Self {
        PosteriorSummarizer {
            options,
            target,
            contour: None,
        }
    }

    fn used(&self, index: usize, state: usize) -> bool {
        index >= self.options.burnin_trees
            && (self.options.burnin_states == 0 || state > self.options.burnin_states)
    }

    /// Runs the whole pipeline.
    pub fn run(&self, trace: &TreeTrace) -> Result<(SummaryTree, RunContext)> {
        let quiet = self.options.quiet;
        let mut registry = CladeRegistry::new(self.options.include_tips);

        // pass 1: clade registration
        let t0 = Instant::now();
        let mut trees_used = 0usize;
        for item in trace.trees() {
            let item = item?;
            if !self.used(item.index, item.state) {
                continue;
            }
            registry.register(&item.tree)?;
            trees_used += 1;
        }
        if trees_used == 0 {
            return Err(SummaryError::NoTrees);
        }
        registry.calculate_credibilities(trees_used)?;
        log_if(
            !quiet,
            format!(
                "Registered clades from {trees_used} of {} trees {:.3}s",
                trace.len(),
                t0.elapsed().as_secs_f64()
            ),
        );
        let report = registry.report();
        log_if(
            !quiet,
            format!(
                "Found {} unique clades ({} in more than one tree)",
                report.unique_clades, report.recurring_clades
            ),
        );

        // target selection
        let t1 = Instant::now();
        let (mut target, target_name) = match &self.target {
            TargetChoice::MaxCladeCredibility => {
                let (tree, name, score) = self.find_mcc_tree(&mut registry, trace)?;
                log_if(
                    !quiet,
                    format!(
                        "Highest log clade credibility {score:.4} for {name} {:.3}s",
                        t1.elapsed().as_secs_f64()
                    ),
                );
                (tree, name)
            }
            TargetChoice::UserTree(path) => {
                let tree = io::read_target_tree(path)?;
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "target".to_string());
                log_if(!quiet, format!("Read user target tree from {path:?}"));
                (tree, name)
            }
        };

        // pass 2: attribute collection, bounded by the target's clades
        let t2 = Instant::now();
        let tracked = self.tracked_attributes(trace)?;
        registry.begin_collection(&target, &tracked)?;
        for item in trace.trees() {
            let item = item?;
            if !self.used(item.index, item.state) {
                continue;
            }
            registry.collect_attributes(&item.tree)?;
        }
        log_if(
            !quiet,
            format!(
                "Collected {} attributes over {trees_used} trees {:.3}s",
                tracked.len(),
                t2.elapsed().as_secs_f64()
            ),
        );

        // statistics onto the target
        let annotator = NodeAnnotator {
            heights: self.options.heights,
            posterior_limit: self.options.posterior_limit,
            hpd_mass: self.options.hpd_mass,
            hpd2d_masses: self.options.hpd2d_masses.clone(),
        };
        annotator.annotate(&mut registry, &mut target, self.contour.as_deref())?;

        // pass 3: common-ancestor heights, batch-applied after annotation
        if self.options.heights == HeightSummary::CommonAncestor {
            let t3 = Instant::now();
            let mut ca = CommonAncestorHeights::new(&mut registry, &target)?;
            for item in trace.trees() {
                let item = item?;
                if !self.used(item.index, item.state) {
                    continue;
                }
                ca.observe(&mut registry, &item.tree)?;
            }
            ca.apply(&mut target)?;
            log_if(
                !quiet,
                format!(
                    "Computed common-ancestor heights {:.3}s",
                    t3.elapsed().as_secs_f64()
                ),
            );
        }

        let support = registry.target_report(&target)?;
        log_if(
            !quiet,
            format!(
                "Target clade credibilities: min {:.4}, mean {:.4}, median {:.4}",
                support.min, support.mean, support.median
            ),
        );
        for (threshold, count) in &support.thresholds {
            log_if(
                !quiet,
                format!("  clades with credibility >= {threshold}: {count}"),
            );
        }

        Ok((
            target,
            RunContext {
                total_trees: trace.len(),
                trees_used,
                target_name,
            },
        ))
    }

    /// MCC scan: rescores every used tree against the finished registry
    /// and keeps the best. Ties keep the earliest tree, so reruns pick
    /// the same target.
    fn find_mcc_tree(
        &self,
        registry: &mut CladeRegistry,
        trace: &TreeTrace,
    ) -> Result<(SummaryTree, String, f64)> {
        let mut best: Option<(SummaryTree, String, f64)> = None;
        for item in trace.trees() {
            let item = item?;
            if !self.used(item.index, item.state) {
                continue;
            }
            let score = registry.log_clade_credibility(&item.tree)?;
            if best.as_ref().is_none_or(|(_, _, s)| score > *s) {
                best = Some((item.tree, item.name, score));
            }
        }
        best.ok_or(SummaryError::NoTrees)
    }

    /// The attribute columns to collect: synthesized height and length,
    /// plus every annotation name present in the first used tree.
    fn tracked_attributes(&self, trace: &TreeTrace) -> Result<Vec<String>> {
        let mut tracked = vec!["height".to_string(), "length".to_string()];
        for item in trace.trees() {
            let item = item?;
            if !self.used(item.index, item.state) {
                continue;
            }
            for name in item.tree.attribute_names() {
                if !tracked.contains(&name) {
                    tracked.push(name);
                }
            }
            break;
        }
        Ok(tracked)
    }
}

pub(crate) fn log_if(show: bool, msg: String) {
    if show {
        println!("{}", msg);
    }
}
