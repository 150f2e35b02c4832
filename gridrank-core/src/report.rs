// Report generation for a scan's latest results

use crate::model::{Alert, RankResult, Scan, ScanShape};
use crate::service::ScanDetails;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankStats {
    pub points: usize,
    pub found: usize,
    pub not_found: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rank: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_rank: Option<u32>,
    /// Points where the business ranks in the top 3.
    pub top_three: usize,
}

impl RankStats {
    pub fn from_results(results: &[RankResult]) -> Self {
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        let ranks: Vec<u32> = results.iter().filter_map(|r| r.rank).collect();
        let average_rank = if ranks.is_empty() {
            None
        } else {
            Some(ranks.iter().map(|&r| r as f64).sum::<f64>() / ranks.len() as f64)
        };

        Self {
            points: results.len(),
            found: ranks.len(),
            not_found: results.len() - ranks.len() - failed,
            failed,
            average_rank,
            best_rank: ranks.iter().copied().min(),
            top_three: ranks.iter().filter(|&&r| r <= 3).count(),
        }
    }
}

/// Rank at each cell of a square grid, row-major from the north-west corner.
/// `None` where the business was not found or no result exists.
pub fn rank_matrix(scan: &Scan, results: &[RankResult]) -> Option<Vec<Vec<Option<u32>>>> {
    if scan.layout() != ScanShape::Square || scan.grid_size <= 1 || scan.radius <= 0.0 {
        return None;
    }

    let size = scan.grid_size.min(crate::grid::MAX_GRID_SIZE) as usize;
    let mut matrix = vec![vec![None; size]; size];
    for result in results {
        let index = result.grid_index as usize;
        if result.grid_index >= 0 && index < size * size {
            matrix[index / size][index % size] = result.rank;
        }
    }
    Some(matrix)
}

/// Results of the most recent run. Scheduled runs accumulate; only the latest is reported.
pub fn latest_run(results: &[RankResult]) -> Vec<RankResult> {
    let Some(latest) = results.iter().max_by_key(|r| r.id) else {
        return Vec::new();
    };
    results
        .iter()
        .filter(|r| r.run_id == latest.run_id)
        .cloned()
        .collect()
}

pub fn generate_text_report(details: &ScanDetails) -> String {
    let scan = &details.scan;
    let results = latest_run(&details.results);
    let stats = RankStats::from_results(&results);
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("\n                           GRIDRANK SCAN REPORT\n");
    report.push_str(RULE);
    report.push_str("\n\n");

    report.push_str(&format!("Scan ID:      {}\n", scan.id));
    report.push_str(&format!("Keyword:      {}\n", scan.keyword));
    if let Some(ref business) = scan.business_name {
        report.push_str(&format!("Business:     {}\n", business));
    }
    report.push_str(&format!("Status:       {}\n", scan.status.as_str()));
    report.push_str(&format!(
        "Center:       {:.6}, {:.6}\n",
        scan.center_lat, scan.center_lng
    ));
    report.push_str(&format!(
        "Grid:         {} {}x{} over {} km\n",
        scan.shape.as_str(),
        scan.grid_size,
        scan.grid_size,
        scan.radius
    ));
    report.push_str(&format!("Frequency:    {}\n", scan.frequency.as_str()));
    if let Some(last_run) = scan.last_run_at {
        report.push_str(&format!(
            "Last Run:     {}\n",
            last_run.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(next_run) = scan.next_run {
        report.push_str(&format!(
            "Next Run:     {}\n",
            next_run.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    report.push('\n');

    report.push_str(RULE);
    report.push_str("\nSUMMARY\n");
    report.push_str(RULE);
    report.push_str("\n\n");
    report.push_str(&format!("Points probed:   {}\n", stats.points));
    report.push_str(&format!("Listed:          {}\n", stats.found));
    report.push_str(&format!("Not listed:      {}\n", stats.not_found));
    report.push_str(&format!("Probe failures:  {}\n", stats.failed));
    report.push_str(&format!("Top 3:           {}\n", stats.top_three));
    if let Some(average) = stats.average_rank {
        report.push_str(&format!("Average rank:    {:.2}\n", average));
    }
    if let Some(best) = stats.best_rank {
        report.push_str(&format!("Best rank:       #{}\n", best));
    }
    report.push('\n');

    if let Some(matrix) = rank_matrix(scan, &results) {
        report.push_str(RULE);
        report.push_str("\nRANK GRID (north at top, '-' = not listed)\n");
        report.push_str(RULE);
        report.push_str("\n\n");
        for row in matrix {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| match cell {
                    Some(rank) => format!("{:>4}", rank),
                    None => format!("{:>4}", "-"),
                })
                .collect();
            report.push_str(&cells.join(""));
            report.push('\n');
        }
        report.push('\n');
    } else if !results.is_empty() {
        report.push_str(RULE);
        report.push_str("\nPOINTS\n");
        report.push_str(RULE);
        report.push_str("\n\n");
        for result in &results {
            report.push_str(&format_point_line(result));
        }
        report.push('\n');
    }

    if !details.alerts.is_empty() {
        report.push_str(RULE);
        report.push_str("\nALERTS\n");
        report.push_str(RULE);
        report.push_str("\n\n");
        for alert in &details.alerts {
            report.push_str(&format_alert_line(alert));
        }
        report.push('\n');
    }

    report.push_str(RULE);
    report.push_str("\n                              End of Report\n");
    report.push_str(RULE);
    report.push('\n');

    report
}

fn format_point_line(result: &RankResult) -> String {
    let outcome = match (&result.error, result.rank) {
        (Some(error), _) => format!("error: {}", error),
        (None, Some(rank)) => format!("#{}", rank),
        (None, None) => "not listed".to_string(),
    };
    format!(
        "  [{:>3}] {:.6},{:.6}  {}  via {}\n",
        result.grid_index, result.lat, result.lng, outcome, result.vantage
    )
}

fn format_alert_line(alert: &Alert) -> String {
    format!("  [{}] {}\n", alert.kind.as_str(), alert.message)
}

pub fn generate_json_report(details: &ScanDetails) -> Result<String, serde_json::Error> {
    let results = latest_run(&details.results);
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "gridrank",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "scan": details.scan,
            "summary": RankStats::from_results(&results),
            "grid": rank_matrix(&details.scan, &results),
            "results": results,
            "alerts": details.alerts
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
