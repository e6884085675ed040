use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classify::OutcomeTag;
use crate::evidence::EvidenceRecord;
use crate::workflow::WorkflowKind;

/// Final status of one target within a run. Exactly one per target,
/// whatever happened.
#[derive(Debug)]
pub struct TargetReport {
    /// Masked display label. Raw account names never reach this struct.
    pub label: String,
    pub kind: WorkflowKind,
    pub outcome: OutcomeTag,
    pub detail: Vec<String>,
    pub screenshot: Option<PathBuf>,
}

impl TargetReport {
    pub fn new(label: impl Into<String>, kind: WorkflowKind, outcome: OutcomeTag) -> Self {
        Self {
            label: label.into(),
            kind,
            outcome,
            detail: Vec::new(),
            screenshot: None,
        }
    }

    pub fn with_evidence(mut self, records: &[EvidenceRecord]) -> Self {
        self.detail = records.iter().map(EvidenceRecord::snippet).collect();
        self
    }

    pub fn with_screenshot(mut self, path: Option<PathBuf>) -> Self {
        self.screenshot = path;
        self
    }

    pub fn push_detail(&mut self, line: impl Into<String>) {
        self.detail.push(line.into());
    }
}

/// Accumulates per-target outcomes and renders the one message sent at
/// the end of the run.
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: Uuid,
    title: String,
    started_at: DateTime<Utc>,
    targets: Vec<TargetReport>,
}

impl ReportBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            title: title.into(),
            started_at: Utc::now(),
            targets: Vec::new(),
        }
    }

    /// Correlates log lines with the delivered report.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn push(&mut self, target: TargetReport) {
        self.targets.push(target);
    }

    pub fn targets(&self) -> &[TargetReport] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Process exit code: 0 when every target landed in a success-class
    /// outcome, 1 when none did, 2 for a mixed run.
    pub fn exit_code(&self) -> i32 {
        if self.targets.is_empty() {
            return 1;
        }
        let succeeded = self
            .targets
            .iter()
            .filter(|t| t.outcome.is_success())
            .count();
        if succeeded == self.targets.len() {
            0
        } else if succeeded == 0 {
            1
        } else {
            2
        }
    }

    /// The newest screenshot among failed targets, else the newest
    /// overall. The message attaches at most one image.
    pub fn lead_screenshot(&self) -> Option<&PathBuf> {
        self.targets
            .iter()
            .rev()
            .filter(|t| !t.outcome.is_success())
            .find_map(|t| t.screenshot.as_ref())
            .or_else(|| self.targets.iter().rev().find_map(|t| t.screenshot.as_ref()))
    }

    /// Plain-text rendering used as the notification body.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.title);
        out.push('\n');
        out.push_str(&self.started_at.format("%Y-%m-%d %H:%M UTC").to_string());
        out.push('\n');
        for target in &self.targets {
            let glyph = if target.outcome.is_success() {
                "✅"
            } else if target.outcome.is_unknown() {
                "❓"
            } else {
                "❌"
            };
            out.push('\n');
            out.push_str(&format!(
                "{glyph} [{}] {} — {}\n",
                target.kind, target.label, target.outcome
            ));
            for line in &target.detail {
                out.push_str(&format!("    {line}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(outcomes: &[OutcomeTag]) -> ReportBuilder {
        let mut builder = ReportBuilder::new("Nightly upkeep");
        for (idx, outcome) in outcomes.iter().enumerate() {
            builder.push(TargetReport::new(
                format!("a{idx}***z"),
                WorkflowKind::Checkin,
                *outcome,
            ));
        }
        builder
    }

    #[test]
    fn exit_code_all_success() {
        let builder = report_with(&[OutcomeTag::Success, OutcomeTag::AlreadyDone]);
        assert_eq!(builder.exit_code(), 0);
    }

    #[test]
    fn exit_code_partial() {
        let builder = report_with(&[OutcomeTag::Success, OutcomeTag::Unknown]);
        assert_eq!(builder.exit_code(), 2);
    }

    #[test]
    fn exit_code_all_failed_and_empty() {
        assert_eq!(report_with(&[OutcomeTag::AuthFailed]).exit_code(), 1);
        assert_eq!(report_with(&[]).exit_code(), 1);
    }

    #[test]
    fn limit_reached_counts_as_success() {
        let builder = report_with(&[OutcomeTag::LimitReached]);
        assert_eq!(builder.exit_code(), 0);
    }

    #[test]
    fn failed_screenshot_preferred() {
        let mut builder = ReportBuilder::new("t");
        builder.push(
            TargetReport::new("ok", WorkflowKind::Renewal, OutcomeTag::Success)
                .with_screenshot(Some(PathBuf::from("/tmp/ok.png"))),
        );
        builder.push(
            TargetReport::new("bad", WorkflowKind::Renewal, OutcomeTag::Unknown)
                .with_screenshot(Some(PathBuf::from("/tmp/bad.png"))),
        );
        assert_eq!(builder.lead_screenshot(), Some(&PathBuf::from("/tmp/bad.png")));
    }

    #[test]
    fn render_includes_every_target_once() {
        let builder = report_with(&[OutcomeTag::Success, OutcomeTag::Blocked]);
        let text = builder.render();
        assert_eq!(text.matches("a0***z").count(), 1);
        assert_eq!(text.matches("a1***z").count(), 1);
        assert!(text.contains("blocked"));
    }
}
