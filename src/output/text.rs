//! Human-readable suite summary

use crate::suite::runner::{SpecStatus, SuiteReport};

/// Render the end-of-run summary
pub fn render_summary(report: &SuiteReport) -> String {
    let mut lines = vec![
        "═══════════════════════════════════════════════════════════".to_string(),
        format!("                    {}", report.suite_name.to_uppercase()),
        "═══════════════════════════════════════════════════════════".to_string(),
        String::new(),
        format!("Elapsed Time: {:.3}s", report.duration.as_secs_f64()),
        String::new(),
        "Specs:".to_string(),
        format!("  Passed:  {}", report.count(SpecStatus::Passed)),
        format!("  Failed:  {}", report.count(SpecStatus::Failed)),
        format!("  Skipped: {}", report.count(SpecStatus::Skipped)),
    ];

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        lines.push(String::new());
        lines.push("Failures:".to_string());
        for outcome in failures {
            match outcome.message {
                Some(ref message) => lines.push(format!("  {}: {}", outcome.name, message)),
                None => lines.push(format!("  {}", outcome.name)),
            }
        }
    }

    lines.push(String::new());
    lines.push(if report.passed() { "SUCCESS!" } else { "FAIL!" }.to_string());
    lines.join("\n")
}

/// Print the end-of-run summary to stdout
pub fn print_summary(report: &SuiteReport) {
    println!();
    println!("{}", render_summary(report));
}
