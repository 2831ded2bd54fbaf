//! Report generation
//!
//! Renders scenario results as a plain text summary or as JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use std::fmt::Write;

use crate::scenarios::ScenarioReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Txt,
    Json,
}

/// All scenario results of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub demo_version: String,
    pub bridge_version: String,
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn new(scenarios: Vec<ScenarioReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            demo_version: env!("CARGO_PKG_VERSION").to_string(),
            bridge_version: ffi_bridge::VERSION.to_string(),
            scenarios,
        }
    }

    pub fn failed(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.passed).count()
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Txt => Ok(self.render_txt()),
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).context("Failed to serialize report")
            }
        }
    }

    fn render_txt(&self) -> String {
        let mut out = String::new();
        // Writing to a String can not fail
        let _ = writeln!(out, "═══════════════════════════════════════════════");
        let _ = writeln!(out, "  FFI Bridge Demo Report");
        let _ = writeln!(out, "═══════════════════════════════════════════════");
        let _ = writeln!(
            out,
            "Generated: {}  (demo v{}, bridge v{})\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            self.demo_version,
            self.bridge_version
        );

        for report in &self.scenarios {
            let mark = if report.passed { "✓" } else { "✗" };
            let _ = writeln!(
                out,
                "{} {:<18} {:>9.1} ms",
                mark,
                report.scenario.name(),
                report.elapsed_ms
            );
            if let Some(error) = &report.error {
                let _ = writeln!(out, "    error: {}", error);
            }
            for delivery in &report.deliveries {
                let _ = writeln!(
                    out,
                    "    {} {} [{}] {}{}",
                    delivery.at.format("%H:%M:%S%.3f"),
                    delivery.label,
                    delivery.thread,
                    if delivery.ok { "" } else { "error: " },
                    delivery.value
                );
            }
        }

        let _ = writeln!(out, "───────────────────────────────────────────────");
        let _ = writeln!(
            out,
            "{} scenarios, {} passed, {} failed",
            self.scenarios.len(),
            self.scenarios.len() - self.failed(),
            self.failed()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::Scenario;

    fn sample() -> RunReport {
        RunReport::new(vec![
            ScenarioReport {
                scenario: Scenario::AppId,
                started_at: Utc::now(),
                elapsed_ms: 1.5,
                passed: true,
                error: None,
                deliveries: Vec::new(),
            },
            ScenarioReport {
                scenario: Scenario::VerifyKeys,
                started_at: Utc::now(),
                elapsed_ms: 2.0,
                passed: false,
                error: Some("verify_keys: callback was not delivered".to_string()),
                deliveries: Vec::new(),
            },
        ])
    }

    #[test]
    fn test_txt_summary() {
        let report = sample();
        let text = report.render(OutputFormat::Txt).unwrap();
        assert_eq!(report.failed(), 1);
        assert!(text.contains("app-id"));
        assert!(text.contains("2 scenarios, 1 passed, 1 failed"));
    }

    #[test]
    fn test_json_shape() {
        let json = sample().render(OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["scenarios"][0]["scenario"], "app-id");
        assert_eq!(value["scenarios"][1]["passed"], false);
    }
}
