//! JUnit XML report
//!
//! One file per worker, `junit_<prefix><NN>.xml` with `NN` the two-digit
//! worker index, in the layout CI dashboards expect from the node tests.

use crate::suite::runner::{SpecStatus, SuiteReport};
use crate::Result;
use anyhow::Context;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Report file name for a worker
pub fn junit_file_name(prefix: &str, node: usize) -> String {
    format!("junit_{}{:02}.xml", prefix, node)
}

/// Writes the JUnit report of one worker
#[derive(Debug, Clone)]
pub struct JUnitReporter {
    path: PathBuf,
}

impl JUnitReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reporter writing into `dir`, created if missing
    ///
    /// Returns `None` (after logging) when the directory cannot be created;
    /// the run goes on without a JUnit report.
    pub fn for_report_dir(dir: &Path, prefix: &str, node: usize) -> Option<Self> {
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!("Failed creating report directory {}: {}", dir.display(), e);
            return None;
        }
        Some(Self::new(dir.join(junit_file_name(prefix, node))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, report: &SuiteReport) -> Result<()> {
        std::fs::write(&self.path, render(report))
            .with_context(|| format!("Failed to write JUnit report {}", self.path.display()))?;
        info!("JUnit report written to {}", self.path.display());
        Ok(())
    }
}

/// Render the report as JUnit XML
pub fn render(report: &SuiteReport) -> String {
    let mut xml = String::new();
    let _ = writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        xml,
        r#"<testsuite name="{}" tests="{}" failures="{}" errors="0" skipped="{}" time="{:.3}" timestamp="{}">"#,
        escape(&report.suite_name),
        report.outcomes.len(),
        report.count(SpecStatus::Failed),
        report.count(SpecStatus::Skipped),
        report.duration.as_secs_f64(),
        report.started.format("%Y-%m-%dT%H:%M:%S"),
    );

    for outcome in &report.outcomes {
        let _ = write!(
            xml,
            r#"  <testcase name="{}" classname="{}" time="{:.3}">"#,
            escape(&outcome.name),
            escape(&report.suite_name),
            outcome.duration.as_secs_f64(),
        );
        let message = escape(outcome.message.as_deref().unwrap_or_default());
        match outcome.status {
            SpecStatus::Passed => {}
            SpecStatus::Failed => {
                let _ = write!(xml, r#"<failure type="Failure" message="{}">{}</failure>"#, message, message);
            }
            SpecStatus::Skipped => {
                let _ = write!(xml, r#"<skipped message="{}"></skipped>"#, message);
            }
        }
        if !outcome.output.is_empty() {
            let _ = write!(xml, "<system-out>{}</system-out>", escape(&outcome.output));
        }
        let _ = writeln!(xml, "</testcase>");
    }

    let _ = writeln!(xml, "</testsuite>");
    xml
}

/// Escape text for XML attributes and content
///
/// Control characters XML 1.0 cannot carry are dropped.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::runner::SpecOutcome;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    fn report() -> SuiteReport {
        let mut report = SuiteReport::new("E2eNode Suite", Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        report.duration = Duration::from_millis(2500);
        report.outcomes = vec![
            SpecOutcome {
                name: "kubelet".to_string(),
                status: SpecStatus::Passed,
                duration: Duration::from_millis(1500),
                output: String::new(),
                message: None,
            },
            SpecOutcome {
                name: "summary <api>".to_string(),
                status: SpecStatus::Failed,
                duration: Duration::from_millis(1000),
                output: "expected \"a\" & got 'b'\n".to_string(),
                message: Some("exit status 1".to_string()),
            },
            SpecOutcome::skipped("mirror pods", "setup failed"),
        ];
        report
    }

    #[test]
    fn test_junit_file_name() {
        assert_eq!(junit_file_name("", 1), "junit_01.xml");
        assert_eq!(junit_file_name("cos-stable_", 3), "junit_cos-stable_03.xml");
        assert_eq!(junit_file_name("x", 12), "junit_x12.xml");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&apos;");
        assert_eq!(escape("line\nnext\u{1b}[0m"), "line\nnext[0m");
    }

    #[test]
    fn test_render() {
        let xml = render(&report());

        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(
            r#"<testsuite name="E2eNode Suite" tests="3" failures="1" errors="0" skipped="1" time="2.500" timestamp="2024-05-01T12:00:00">"#
        ));
        assert!(xml.contains(r#"<testcase name="kubelet" classname="E2eNode Suite" time="1.500"></testcase>"#));
        assert!(xml.contains(r#"name="summary &lt;api&gt;""#));
        assert!(xml.contains(r#"<failure type="Failure" message="exit status 1">exit status 1</failure>"#));
        assert!(xml.contains("<system-out>expected &quot;a&quot; &amp; got &apos;b&apos;\n</system-out>"));
        assert!(xml.contains(r#"<skipped message="setup failed"></skipped>"#));
        assert!(xml.trim_end().ends_with("</testsuite>"));
    }

    #[test]
    fn test_for_report_dir_creates_directory() {
        let dir = TempDir::new().unwrap();
        let report_dir = dir.path().join("artifacts").join("node");

        let reporter = JUnitReporter::for_report_dir(&report_dir, "pre_", 2).unwrap();
        assert!(report_dir.is_dir());
        assert_eq!(reporter.path(), report_dir.join("junit_pre_02.xml"));

        reporter.write(&report()).unwrap();
        let written = std::fs::read_to_string(reporter.path()).unwrap();
        assert!(written.contains("tests=\"3\""));
    }

    #[test]
    fn test_report_dir_creation_failure_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();

        assert!(JUnitReporter::for_report_dir(&file.join("reports"), "", 1).is_none());
    }
}
