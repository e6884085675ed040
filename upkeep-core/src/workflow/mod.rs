//! Workflow orchestration. Each target gets a fresh browser instance,
//! produces exactly one report entry whatever happens, and never stops
//! the rest of the run by failing.

pub mod checkin;
pub mod renewal;
pub mod restart;

use tokio::time::{sleep, Duration};
use tracing::{error, info};
use url::Url;

use crate::browser::{
    BrowserAutomation, BrowserLauncher, BrowserResult, ChallengeHandler, LoginState,
    SessionEstablisher,
};
use crate::classify::{classify, OutcomeTag};
use crate::config::{PhraseSection, UpkeepConfig};
use crate::credentials::{Account, CredentialSet};
use crate::evidence::{find_blocked_marker, EvidenceKind, EvidenceRecord, PageErrorKind};
use crate::mask::mask_name;
use crate::report::{ReportBuilder, TargetReport};
use crate::rotation::RotationSink;
use crate::screenshot::ScreenshotSink;

use checkin::{CheckinResult, CheckinWorkflow};
use renewal::{PanelSurface, RenewalLoop, StopReason};
use restart::RestartWorkflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    Checkin,
    Renewal,
    Restart,
}

impl WorkflowKind {
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowKind::Checkin => "check-in",
            WorkflowKind::Renewal => "renewal",
            WorkflowKind::Restart => "restart",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub struct WorkflowRunner {
    config: UpkeepConfig,
    launcher: BrowserLauncher,
    challenge: ChallengeHandler,
    screenshots: ScreenshotSink,
}

impl WorkflowRunner {
    pub fn new(config: UpkeepConfig) -> Self {
        let launcher = BrowserLauncher::new(config.browser.clone());
        let challenge = ChallengeHandler::new(config.challenge.clone());
        let screenshots = ScreenshotSink::new(config.resolve_path(&config.run.screenshot_dir));
        Self {
            config,
            launcher,
            challenge,
            screenshots,
        }
    }

    pub fn config(&self) -> &UpkeepConfig {
        &self.config
    }

    /// Daily check-in for every account. Accounts run sequentially in
    /// isolated browser instances.
    pub async fn run_checkins(&self, accounts: &[Account], report: &mut ReportBuilder) {
        for (idx, account) in accounts.iter().enumerate() {
            let label = mask_name(&account.username);
            info!(target = label.as_str(), "running check-in");

            let entry = match self.checkin_target(account, &label).await {
                Ok(entry) => entry,
                Err(err) => failed_target(&label, WorkflowKind::Checkin, &err),
            };
            report.push(entry);

            if idx + 1 < accounts.len() {
                sleep(Duration::from_secs(self.config.run.inter_target_pause_seconds)).await;
            }
        }
    }

    async fn checkin_target(&self, account: &Account, label: &str) -> BrowserResult<TargetReport> {
        let automation = self.launcher.launch().await?;
        let result = self.checkin_in_browser(&automation, account, label).await;
        if let Err(err) = automation.shutdown().await {
            error!(error = %err, "browser shutdown failed");
        }
        result
    }

    async fn checkin_in_browser(
        &self,
        automation: &BrowserAutomation,
        account: &Account,
        label: &str,
    ) -> BrowserResult<TargetReport> {
        let context = automation.new_context("").await?;
        let workflow = CheckinWorkflow {
            config: &self.config.checkin,
            challenge: &self.challenge,
        };
        let result = workflow.run(&context, account).await?;
        let outcome = checkin_outcome(&result, &self.config.phrases);
        let shot = self
            .screenshots
            .capture(&context, &format!("checkin-{label}"))
            .await;
        Ok(TargetReport::new(label, WorkflowKind::Checkin, outcome)
            .with_evidence(&result.evidence)
            .with_screenshot(shot))
    }

    /// Iterative service renewal against the billing panel.
    pub async fn run_renewal(
        &self,
        credentials: &CredentialSet,
        rotation: &dyn RotationSink,
        report: &mut ReportBuilder,
    ) {
        let label = host_label(&self.config.renewal.panel_url);
        info!(target = label.as_str(), "running renewal");
        let entry = match self.renewal_target(credentials, rotation, &label).await {
            Ok(entry) => entry,
            Err(err) => failed_target(&label, WorkflowKind::Renewal, &err),
        };
        report.push(entry);
    }

    async fn renewal_target(
        &self,
        credentials: &CredentialSet,
        rotation: &dyn RotationSink,
        label: &str,
    ) -> BrowserResult<TargetReport> {
        let automation = self.launcher.launch().await?;
        let result = self
            .renewal_in_browser(&automation, credentials, rotation, label)
            .await;
        if let Err(err) = automation.shutdown().await {
            error!(error = %err, "browser shutdown failed");
        }
        result
    }

    async fn renewal_in_browser(
        &self,
        automation: &BrowserAutomation,
        credentials: &CredentialSet,
        rotation: &dyn RotationSink,
        label: &str,
    ) -> BrowserResult<TargetReport> {
        let context = automation
            .new_context(&self.config.renewal.api_filter)
            .await?;
        let establisher = SessionEstablisher::new(self.config.session.clone());

        let session = establisher
            .establish(
                &context,
                &self.challenge,
                credentials,
                &self.config.phrases.blocked,
            )
            .await?;
        let mut evidence = session.evidence;

        if session.state == LoginState::Blocked {
            let shot = self.screenshots.capture(&context, "renewal-blocked").await;
            return Ok(
                TargetReport::new(label, WorkflowKind::Renewal, OutcomeTag::Blocked)
                    .with_evidence(&evidence)
                    .with_screenshot(shot),
            );
        }
        if session.state == LoginState::LoggedOut {
            let shot = self.screenshots.capture(&context, "renewal-logged-out").await;
            let mut entry =
                TargetReport::new(label, WorkflowKind::Renewal, OutcomeTag::AuthFailed)
                    .with_evidence(&evidence)
                    .with_screenshot(shot);
            entry.push_detail("session credential rejected, rotate it");
            return Ok(entry);
        }
        if let Some(kind) = first_page_error(&evidence) {
            let shot = self.screenshots.capture(&context, "renewal-page-error").await;
            let mut entry =
                TargetReport::new(label, WorkflowKind::Renewal, OutcomeTag::TransientError)
                    .with_evidence(&evidence)
                    .with_screenshot(shot);
            entry.push_detail(kind.remediation());
            return Ok(entry);
        }
        self.screenshots.capture(&context, "renewal-post-login").await;

        context.goto(&self.config.renewal.panel_url).await?;
        context.settle().await;

        let body = context.body_text().await?;
        if let Some(marker) = find_blocked_marker(&body, &self.config.phrases.blocked) {
            evidence.push(EvidenceRecord::dom(marker));
            let shot = self.screenshots.capture(&context, "renewal-blocked").await;
            return Ok(
                TargetReport::new(label, WorkflowKind::Renewal, OutcomeTag::Blocked)
                    .with_evidence(&evidence)
                    .with_screenshot(shot),
            );
        }

        let mut surface = PanelSurface {
            context: &context,
            automation,
            challenge: &self.challenge,
            config: &self.config.renewal,
            phrases: &self.config.phrases,
        };
        let renewal_loop = RenewalLoop::new(
            self.config.renewal.max_rounds,
            self.config.renewal.day_ceiling,
        );
        let summary = renewal_loop.run(&mut surface).await?;
        evidence.extend(summary.evidence);

        let mut outcome = classify(&evidence, &self.config.phrases);
        // The run succeeded if any round did, even when a later round
        // ended with a limit or a transient failure.
        if !outcome.is_success() && any_api_success(&evidence) {
            outcome = OutcomeTag::Success;
        }
        // A disabled trigger before the first round is the panel's way
        // of saying there is nothing to renew yet.
        if outcome.is_unknown()
            && summary.stop_reason == StopReason::TriggerUnavailable
            && summary.rounds_completed == 0
        {
            outcome = OutcomeTag::AlreadyDone;
        }

        if outcome.is_success() {
            self.rotate_refreshed(&establisher, &context, rotation).await;
        }

        let shot = self.screenshots.capture(&context, "renewal-final").await;
        let mut entry = TargetReport::new(label, WorkflowKind::Renewal, outcome)
            .with_evidence(&evidence)
            .with_screenshot(shot);
        entry.push_detail(format!(
            "rounds completed: {} (stopped: {:?})",
            summary.rounds_completed, summary.stop_reason
        ));
        if let Some(counter) = summary.status.counter {
            entry.push_detail(format!("panel counter: {counter}"));
        }
        if let Some(days) = summary.status.remaining_days {
            entry.push_detail(format!("remaining: {days} days"));
        }
        Ok(entry)
    }

    /// Game-panel restart for every server the panel lists.
    pub async fn run_restart(
        &self,
        credentials: &CredentialSet,
        terminal_command: Option<&str>,
        rotation: &dyn RotationSink,
        report: &mut ReportBuilder,
    ) {
        let label = host_label(&self.config.restart.base_url);
        info!(target = label.as_str(), "running restart");
        let entry = match self
            .restart_target(credentials, terminal_command, rotation, &label)
            .await
        {
            Ok(entry) => entry,
            Err(err) => failed_target(&label, WorkflowKind::Restart, &err),
        };
        report.push(entry);
    }

    async fn restart_target(
        &self,
        credentials: &CredentialSet,
        terminal_command: Option<&str>,
        rotation: &dyn RotationSink,
        label: &str,
    ) -> BrowserResult<TargetReport> {
        let automation = self.launcher.launch().await?;
        let result = self
            .restart_in_browser(&automation, credentials, terminal_command, rotation, label)
            .await;
        if let Err(err) = automation.shutdown().await {
            error!(error = %err, "browser shutdown failed");
        }
        result
    }

    async fn restart_in_browser(
        &self,
        automation: &BrowserAutomation,
        credentials: &CredentialSet,
        terminal_command: Option<&str>,
        rotation: &dyn RotationSink,
        label: &str,
    ) -> BrowserResult<TargetReport> {
        let context = automation
            .new_context(&self.config.restart.api_filter)
            .await?;
        let establisher = SessionEstablisher::new(self.config.session.clone());

        let session = establisher
            .establish(
                &context,
                &self.challenge,
                credentials,
                &self.config.phrases.blocked,
            )
            .await?;
        if session.state == LoginState::Blocked {
            let shot = self.screenshots.capture(&context, "restart-blocked").await;
            return Ok(
                TargetReport::new(label, WorkflowKind::Restart, OutcomeTag::Blocked)
                    .with_evidence(&session.evidence)
                    .with_screenshot(shot),
            );
        }
        if session.state == LoginState::LoggedOut {
            let shot = self.screenshots.capture(&context, "restart-logged-out").await;
            let mut entry =
                TargetReport::new(label, WorkflowKind::Restart, OutcomeTag::AuthFailed)
                    .with_evidence(&session.evidence)
                    .with_screenshot(shot);
            entry.push_detail("session credential rejected, rotate it");
            return Ok(entry);
        }
        if let Some(kind) = first_page_error(&session.evidence) {
            let shot = self.screenshots.capture(&context, "restart-page-error").await;
            let mut entry =
                TargetReport::new(label, WorkflowKind::Restart, OutcomeTag::TransientError)
                    .with_evidence(&session.evidence)
                    .with_screenshot(shot);
            entry.push_detail(kind.remediation());
            return Ok(entry);
        }
        self.screenshots.capture(&context, "restart-post-login").await;

        let workflow = RestartWorkflow {
            config: &self.config.restart,
            challenge: &self.challenge,
        };
        let result = workflow.run(&context, terminal_command).await?;

        let outcome = if result.results.is_empty() {
            OutcomeTag::Unknown
        } else if result.any_succeeded() {
            OutcomeTag::Success
        } else {
            OutcomeTag::TransientError
        };

        if outcome.is_success() {
            self.rotate_refreshed(&establisher, &context, rotation).await;
        }

        let shot = self.screenshots.capture(&context, "restart-final").await;
        Ok(TargetReport::new(label, WorkflowKind::Restart, outcome)
            .with_evidence(&result.evidence)
            .with_screenshot(shot))
    }

    /// Hands the freshly captured session cookies to the rotation sink.
    /// Failures are logged only; rotation never changes the outcome.
    async fn rotate_refreshed(
        &self,
        establisher: &SessionEstablisher,
        context: &crate::browser::BrowserContext,
        rotation: &dyn RotationSink,
    ) {
        let refreshed = match establisher.refreshed_credentials(context).await {
            Ok(set) if !set.is_empty() => set,
            Ok(_) => return,
            Err(err) => {
                error!(error = %err, "failed to capture refreshed credentials");
                return;
            }
        };
        let serialized = refreshed.serialize();
        if let Err(err) = rotation
            .rotate(&self.config.session.secret_name, &serialized)
            .await
        {
            error!(error = %err, "secret rotation failed");
        }
    }
}

/// A login that never produced a session is a credential problem, not
/// an inconclusive page read.
fn checkin_outcome(result: &CheckinResult, phrases: &PhraseSection) -> OutcomeTag {
    if result.login_failed {
        return OutcomeTag::AuthFailed;
    }
    classify(&result.evidence, phrases)
}

fn first_page_error(evidence: &[EvidenceRecord]) -> Option<PageErrorKind> {
    evidence.iter().find_map(|record| match &record.kind {
        EvidenceKind::PageError(kind) => Some(*kind),
        _ => None,
    })
}

/// True when any captured API record reports a completed action.
fn any_api_success(evidence: &[EvidenceRecord]) -> bool {
    evidence.iter().any(|record| match &record.kind {
        EvidenceKind::Api(api) => api.ok && (200..300).contains(&api.status),
        _ => false,
    })
}

fn host_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "target".to_string())
}

fn failed_target(label: &str, kind: WorkflowKind, err: &crate::browser::BrowserError) -> TargetReport {
    error!(target = label, error = %err, "workflow failed");
    let mut entry = TargetReport::new(label, kind, OutcomeTag::TransientError);
    entry.push_detail(format!("browser failure: {err}"));
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_label_extracts_host() {
        assert_eq!(host_label("https://panel.example.com/free_panel"), "panel.example.com");
        assert_eq!(host_label("not a url"), "target");
    }

    #[test]
    fn any_api_success_spots_a_completed_round() {
        let evidence = vec![
            EvidenceRecord::api(200, true, "renewed"),
            EvidenceRecord::api(400, false, "Cannot exceed 7 days"),
        ];
        assert!(any_api_success(&evidence));
        assert!(!any_api_success(&[EvidenceRecord::api(500, false, "boom")]));
        assert!(!any_api_success(&[]));
    }

    #[test]
    fn first_page_error_finds_the_kind() {
        let evidence = vec![
            EvidenceRecord::dom("noise"),
            EvidenceRecord::page_error(PageErrorKind::TooManyRedirects),
        ];
        assert_eq!(
            first_page_error(&evidence),
            Some(PageErrorKind::TooManyRedirects)
        );
        assert_eq!(first_page_error(&[]), None);
    }

    #[test]
    fn failed_login_is_auth_failed_not_unknown() {
        let phrases = PhraseSection {
            success: vec!["签到成功".into()],
            already: vec!["已签到".into()],
            limit: Vec::new(),
            disabled: vec!["account disabled".into()],
            blocked: Vec::new(),
        };
        let result = CheckinResult {
            evidence: vec![EvidenceRecord::dom("login did not complete")],
            login_failed: true,
        };
        assert_eq!(checkin_outcome(&result, &phrases), OutcomeTag::AuthFailed);

        let completed = CheckinResult {
            evidence: vec![EvidenceRecord::dom("签到成功")],
            login_failed: false,
        };
        assert_eq!(checkin_outcome(&completed, &phrases), OutcomeTag::Success);
    }

    #[test]
    fn failed_target_is_transient_with_detail() {
        let err = crate::browser::BrowserError::Launch("no chrome".into());
        let entry = failed_target("t***t", WorkflowKind::Renewal, &err);
        assert_eq!(entry.outcome, OutcomeTag::TransientError);
        assert!(entry.detail[0].contains("no chrome"));
    }
}
