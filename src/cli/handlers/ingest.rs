use std::path::Path;
use std::sync::Arc;

use crate::init::AppContext;
use crate::services::{DocumentReport, LogProgressReporter, NormalizationOutcome};

pub struct IngestOptions {
    pub document_id: Option<String>,
    pub concurrency: Option<usize>,
    pub detect_arcs: bool,
    pub normalize_stats: bool,
}

/// Document id from a file name: lowercase, anything outside `[a-z0-9_.-]` becomes `-`.
pub fn document_id_from_path(file: &Path) -> String {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let id: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let id = id.trim_matches('-').to_string();
    if id.is_empty() {
        "document".to_string()
    } else {
        id
    }
}

pub async fn handle_ingest(
    ctx: &AppContext,
    file: &Path,
    options: IngestOptions,
    json: bool,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Failed to read file '{}': {}", file.display(), e))?;
    let document_id = options
        .document_id
        .unwrap_or_else(|| document_id_from_path(file));

    let mut config = ctx.config.clone();
    if let Some(n) = options.concurrency {
        config.concurrency = n;
    }
    config.stages.detect_arcs &= options.detect_arcs;
    config.stages.normalize_stats &= options.normalize_stats;

    let pipeline = ctx
        .pipeline(config)
        .with_progress(Arc::new(LogProgressReporter));
    let report = pipeline.run(&document_id, &text).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &DocumentReport) {
    println!("Document {}", report.document_id);
    println!(
        "  {} episodes, {} molecules, {} events ({} detached memories)",
        report.episodes.len(),
        report.molecules,
        report.events,
        report.detached_memories
    );
    println!("  {} verbs, {} vibes, {} arcs", report.verbs, report.vibes, report.arcs.len());
    match &report.normalization {
        NormalizationOutcome::Normalized { molecules, .. } => {
            println!("  stats normalized over {molecules} molecules")
        }
        NormalizationOutcome::AlreadyNormalized => println!("  stats were already normalized"),
        NormalizationOutcome::Skipped => println!("  normalization skipped"),
    }
    for episode in &report.episodes {
        println!(
            "  [{}] {} @ {}{} - {} events, {} verbs, {} vibes",
            episode.index,
            episode.label,
            episode.location,
            if episode.location_stub { " (stub)" } else { "" },
            episode.events,
            episode.verbs,
            episode.vibes
        );
    }
    if !report.needs_review.is_empty() {
        println!("  {} items need review", report.needs_review.len());
    }
    if !report.failures.is_empty() {
        println!("  {} entity failures:", report.failures.len());
        for failure in &report.failures {
            println!("    {} [{}] {}", failure.entity_id, failure.kind, failure.message);
        }
    }
    println!("  took {} ms", report.duration_ms);
}
