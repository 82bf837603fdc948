//! Trailing-window aggregation over audit log files: query counts, intent
//! distribution, timings, tokens, and cost. Reads every
//! `audit_log_*.jsonl` in the log directory and tolerates corrupt lines.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AuditError;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditSummary {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub success_rate: f64,
    pub intent_distribution: std::collections::BTreeMap<String, usize>,
    pub avg_processing_time_ms: f64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

/// Summarize every audit line stamped at or after `since`.
pub fn summarize(dir: impl AsRef<Path>, since: DateTime<Utc>) -> Result<AuditSummary, AuditError> {
    let dir = dir.as_ref();
    let mut summary = AuditSummary::default();
    let mut processing_times: Vec<f64> = Vec::new();
    let mut corrupt_lines = 0usize;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        // No log directory yet means no queries yet.
        Err(_) => return Ok(summary),
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("audit_log_") || !name.ends_with(".jsonl") {
            continue;
        }
        let file = fs::File::open(entry.path())?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
                corrupt_lines += 1;
                continue;
            };
            let Some(timestamp) = value
                .get("timestamp")
                .and_then(|v| v.as_str())
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            else {
                corrupt_lines += 1;
                continue;
            };
            if timestamp.with_timezone(&Utc) < since {
                continue;
            }

            summary.total_queries += 1;
            let errored = value
                .get("error_occurred")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if errored {
                summary.failed_queries += 1;
            } else {
                summary.successful_queries += 1;
            }

            if let Some(intent) = value.get("intent").and_then(|v| v.as_str()) {
                *summary
                    .intent_distribution
                    .entry(intent.to_string())
                    .or_insert(0) += 1;
            }
            if let Some(ms) = value
                .get("total_processing_time_ms")
                .and_then(|v| v.as_f64())
            {
                processing_times.push(ms);
            }
            if let Some(tokens) = value.get("total_tokens").and_then(|v| v.as_u64()) {
                summary.total_tokens += tokens;
            }
            if let Some(cost) = value.get("estimated_cost_usd").and_then(|v| v.as_f64()) {
                summary.total_cost_usd += cost;
            }
        }
    }

    if corrupt_lines > 0 {
        tracing::warn!(corrupt_lines, dir = %dir.display(), "skipped corrupt audit lines");
    }
    if summary.total_queries > 0 {
        summary.success_rate = summary.successful_queries as f64 / summary.total_queries as f64;
    }
    if !processing_times.is_empty() {
        summary.avg_processing_time_ms =
            processing_times.iter().sum::<f64>() / processing_times.len() as f64;
    }
    Ok(summary)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
