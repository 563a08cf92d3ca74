//! Clustering run command handlers: run, snapshot, compare.

use anyhow::Result;
use colored::Colorize;

use crate::cli::output::{
    output_json, print_error, print_header, print_kv, print_success, OutputMode,
};
use crate::init::AppContext;
use crate::services::pipeline::{PipelineOutcome, PipelineStatus};

pub async fn handle_run(ctx: &mut AppContext, mode: OutputMode) -> Result<()> {
    let outcome = ctx.pipeline.run_current().await;
    report_outcome(&outcome, mode);
    Ok(())
}

pub async fn handle_snapshot(ctx: &mut AppContext, period: &str, mode: OutputMode) -> Result<()> {
    let outcome = ctx.pipeline.run_snapshot(period).await;
    report_outcome(&outcome, mode);
    Ok(())
}

pub async fn handle_compare(
    ctx: &mut AppContext,
    from: &str,
    to: &str,
    mode: OutputMode,
) -> Result<()> {
    let report = ctx.pipeline.compare_snapshots(from, to).await?;

    if mode == OutputMode::Json {
        output_json(&report);
        return Ok(());
    }

    print_header(&format!("Evolution: {} -> {}", from, to));
    print_kv("Splits", &report.splits.to_string());
    print_kv("Merges", &report.merges.to_string());
    print_kv("Continuations", &report.continuations.to_string());
    print_kv("Edges stored", &report.edges_created.to_string());
    if report.edges_failed > 0 {
        print_error(&format!("{} edge(s) failed to persist", report.edges_failed));
    }
    Ok(())
}

fn report_outcome(outcome: &PipelineOutcome, mode: OutputMode) {
    if mode == OutputMode::Json {
        output_json(outcome);
        return;
    }

    if outcome.status == PipelineStatus::Error {
        print_error(&outcome.message);
        return;
    }

    print_success(&outcome.message);
    if let Some(stats) = &outcome.stats {
        print_kv("Run", &stats.run_id);
        print_kv(
            "Clusters",
            &format!(
                "{} (sizes {}..{}, avg {:.1})",
                stats.n_clusters, stats.min_cluster_size, stats.max_cluster_size, stats.avg_cluster_size
            ),
        );
        print_kv(
            "Outliers",
            &format!("{} ({:.1}%)", stats.n_outliers, stats.outlier_ratio * 100.0),
        );
        if stats.archived_clusters > 0 {
            print_kv("Archived", &stats.archived_clusters.to_string());
        }
        if stats.labels.fallbacks > 0 {
            print_kv("Label fallbacks", &stats.labels.fallbacks.to_string());
        }
        if let Some(evolution) = &stats.evolution {
            print_kv(
                "Evolution",
                &format!(
                    "{} split(s), {} merge(s), {} continuation(s)",
                    evolution.splits, evolution.merges, evolution.continuations
                ),
            );
        }
        print_kv(
            "Elapsed",
            &format!(
                "{:.2}s ({:.0} units/s)",
                stats.elapsed_seconds, stats.units_per_second
            ),
        );
    }
    for warning in &outcome.errors {
        println!("  {} {}", "warning:".yellow(), warning);
    }
}
