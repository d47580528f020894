use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;
use tree_annotate::annotate::HeightSummary;
use tree_annotate::io::{write_annotated_tree, TreeTrace};
use tree_annotate::pipeline::{PosteriorSummarizer, SummaryOptions, TargetChoice};

/// Summarize a BEAST/NEXUS posterior tree trace onto a single annotated
/// target tree: clade posteriors, per-attribute statistics and HPD
/// intervals, with a choice of node-height summaries.
#[derive(Parser, Debug)]
#[command(name = "tree-annotate", version, about = "Annotated summary tree from a posterior tree trace")]
struct Args {
    /// Path to BEAST .trees (NEXUS) file, .gz accepted
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output path for the annotated NEXUS tree, .gz accepted
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Burn-in by number of trees (drop first N trees)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,

    /// Burn-in by state (keep trees with STATE_ > value)
    #[arg(short = 's', long = "burnin-states", default_value_t = 0)]
    burnin_states: usize,

    /// Node height summary: keep | mean | median | ca
    #[arg(long = "heights", value_enum, default_value_t = HeightsArg::Mean)]
    heights: HeightsArg,

    /// Posterior below which node statistics are suppressed (0 = off)
    #[arg(long = "limit", default_value_t = 0.0)]
    limit: f64,

    /// Probability mass of 1-D HPD intervals
    #[arg(long = "hpd", default_value_t = 0.95)]
    hpd: f64,

    /// Probability masses of joint 2-D HPD regions, comma-separated
    #[arg(long = "hpd2d", value_delimiter = ',', default_value = "0.8")]
    hpd2d: Vec<f64>,

    /// User-supplied target tree (NEXUS or Newick); default is the
    /// maximum-clade-credibility tree from the trace
    #[arg(long = "target")]
    target: Option<PathBuf>,

    /// Also count tip (single-taxon) clades during registration
    #[arg(long = "count-tip-clades", default_value_t = false)]
    count_tip_clades: bool,

    /// Quiet mode: suppresses progress messages on stdout
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum HeightsArg { Keep, Mean, Median, Ca }

fn main() {
    let args = Args::parse();

    let t0 = Instant::now();
    let trace = match TreeTrace::open(&args.input) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to read {:?}: {e}", args.input);
            std::process::exit(2);
        }
    };
    if trace.is_empty() {
        eprintln!("No trees parsed from {:?}.", args.input);
        std::process::exit(2);
    }
    let read_s = t0.elapsed().as_secs_f64();
    log_if(!args.quiet, format!("Reading trace {read_s:.3}s"));
    log_if(
        !args.quiet,
        format!("Read {} taxa for {} trees", trace.translate().len(), trace.len()),
    );

    let options = SummaryOptions {
        burnin_trees: args.burnin_trees,
        burnin_states: args.burnin_states,
        posterior_limit: args.limit,
        heights: match args.heights {
            HeightsArg::Keep => HeightSummary::Keep,
            HeightsArg::Mean => HeightSummary::Mean,
            HeightsArg::Median => HeightSummary::Median,
            HeightsArg::Ca => HeightSummary::CommonAncestor,
        },
        hpd_mass: args.hpd,
        hpd2d_masses: args.hpd2d.clone(),
        include_tips: args.count_tip_clades,
        quiet: args.quiet,
    };
    let target = match args.target {
        Some(path) => TargetChoice::UserTree(path),
        None => TargetChoice::MaxCladeCredibility,
    };

    let t1 = Instant::now();
    let summarizer = PosteriorSummarizer::new(options, target);
    let (annotated, ctx) = match summarizer.run(&trace) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to summarize trace: {e}");
            std::process::exit(3);
        }
    };
    log_if(
        !args.quiet,
        format!(
            "Summarized {} of {} trees onto {} {:.3}s",
            ctx.trees_used,
            ctx.total_trees,
            ctx.target_name,
            t1.elapsed().as_secs_f64()
        ),
    );

    let t2 = Instant::now();
    if let Err(e) = write_annotated_tree(&args.output, &annotated) {
        eprintln!("Failed to write output {:?}: {e}", args.output);
        std::process::exit(4);
    }
    log_if(
        !args.quiet,
        format!("Writing to output {:.3}s", t2.elapsed().as_secs_f64()),
    );
}

fn log_if(show: bool, msg: String) {
    if show { println!("{}", msg); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hpd2d_defaults_to_80_percent() {
        let args = Args::parse_from(["tree-annotate", "-i", "in.trees", "-o", "out.tree"]);
        assert_eq!(args.hpd2d, vec![0.8]);
    }

    #[test]
    fn test_hpd2d_parses_comma_separated_masses() {
        let args = Args::parse_from([
            "tree-annotate",
            "-i",
            "in.trees",
            "-o",
            "out.tree",
            "--hpd2d",
            "0.5,0.9",
        ]);
        assert_eq!(args.hpd2d, vec![0.5, 0.9]);
    }
}
