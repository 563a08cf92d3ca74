//! Status command handler: live generation overview.

use anyhow::Result;
use colored::Colorize;
use serde::Deserialize;

use crate::cli::output::{output_json, print_header, print_kv, print_table, OutputMode};
use crate::init::AppContext;
use crate::models::{cluster, state};

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

async fn table_count(ctx: &AppContext, query: &str) -> Result<usize> {
    let mut response = ctx.db.query(query).await?;
    let rows: Vec<CountResult> = response.take(0).unwrap_or_default();
    Ok(rows.first().map(|r| r.count).unwrap_or(0))
}

pub async fn handle_status(ctx: &mut AppContext, mode: OutputMode) -> Result<()> {
    let total_units =
        table_count(ctx, "SELECT count() AS count FROM meaningful_unit GROUP ALL").await?;
    let embedded_units = table_count(
        ctx,
        "SELECT count() AS count FROM meaningful_unit WHERE embedding IS NOT NONE GROUP ALL",
    )
    .await?;

    let clusters = cluster::active_current_clusters(&ctx.db).await?;
    let latest = state::latest_state(&ctx.db).await?;

    if mode == OutputMode::Json {
        let json = serde_json::json!({
            "data_path": ctx.data_path.display().to_string(),
            "total_units": total_units,
            "embedded_units": embedded_units,
            "active_clusters": clusters,
            "latest_run": latest,
        });
        output_json(&json);
        return Ok(());
    }

    println!(
        "{}",
        format!("Knowledge graph: {}", ctx.data_path.display()).bold()
    );
    print_kv(
        "Units",
        &format!("{} ({} embedded)", total_units, embedded_units),
    );

    print_header("Live topic generation");
    let rows: Vec<Vec<String>> = clusters
        .iter()
        .map(|c| {
            vec![
                c.cluster_key.clone(),
                c.label.clone(),
                c.member_count.to_string(),
            ]
        })
        .collect();
    print_table(&["Key", "Label", "Members"], rows);

    if let Some(run) = latest {
        print_header("Latest run");
        print_kv("Run", &run.run_id);
        print_kv("Type", &run.run_type);
        if let Some(period) = &run.period {
            print_kv("Period", period);
        }
        print_kv("Phase", run.phase.as_str());
        print_kv(
            "Result",
            &format!(
                "{} cluster(s), {} outlier(s) of {} unit(s)",
                run.n_clusters, run.n_outliers, run.total_units
            ),
        );
    }

    Ok(())
}
