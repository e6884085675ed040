//! Iterative renewal. One renewal extends the service by a single
//! step, so the workflow repeats rounds until the panel says stop.
//! Every stop condition is explicit; the round budget caps the loop
//! even when the panel misbehaves.

use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::browser::{
    BrowserAutomation, BrowserContext, BrowserResult, ChallengeHandler, ChallengeStatus,
};
use crate::classify::parse_remaining_days;
use crate::config::{PhraseSection, RenewalSection};
use crate::evidence::{classify_page_error, EvidenceRecord};

use crate::browser::lookup::{disabled_script, inner_text_script, visibility_script};

/// Panel state read back at the end of a round.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundStatus {
    pub counter: Option<u32>,
    pub remaining_days: Option<u32>,
}

/// Why the loop stopped. Exactly one per run; there is no "still
/// going" state that escapes the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The trigger was disabled or missing, before or between rounds.
    TriggerUnavailable,
    /// The panel said the validity ceiling was hit.
    LimitReached,
    /// The remaining-days read-back reached the configured ceiling.
    CeilingReached,
    /// Round budget exhausted with the trigger still enabled.
    RoundBudget,
    /// The anti-automation challenge would not clear.
    ChallengeUnresolved,
}

#[derive(Debug)]
pub struct RenewalSummary {
    pub rounds_completed: u32,
    pub stop_reason: StopReason,
    pub status: RoundStatus,
    pub evidence: Vec<EvidenceRecord>,
}

/// The panel operations one renewal round needs. The loop only talks
/// to this trait, so its stop conditions are testable without a
/// browser.
#[async_trait]
pub trait RenewalSurface: Send {
    async fn trigger_enabled(&mut self) -> BrowserResult<bool>;
    /// Opens the confirmation modal; false when it did not appear.
    async fn open_modal(&mut self) -> BrowserResult<bool>;
    async fn clear_challenge(&mut self) -> BrowserResult<ChallengeStatus>;
    /// The sponsor interaction the panel requires before confirming.
    async fn visit_sponsor(&mut self) -> BrowserResult<()>;
    async fn confirm(&mut self) -> BrowserResult<()>;
    /// A limit phrase currently visible on the page, if any.
    async fn limit_marker(&mut self) -> BrowserResult<Option<String>>;
    /// Resets the modal, reloads, and reads the panel counters.
    async fn finish_round(&mut self) -> BrowserResult<RoundStatus>;
    /// Evidence accumulated so far (captured API responses, page
    /// errors). Called once, after the loop stops.
    async fn collect_evidence(&mut self) -> BrowserResult<Vec<EvidenceRecord>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RenewalLoop {
    pub max_rounds: usize,
    pub day_ceiling: u32,
}

impl RenewalLoop {
    pub fn new(max_rounds: usize, day_ceiling: u32) -> Self {
        Self {
            max_rounds,
            day_ceiling,
        }
    }

    pub async fn run<S: RenewalSurface>(&self, surface: &mut S) -> BrowserResult<RenewalSummary> {
        let mut rounds_completed = 0u32;
        let mut status = RoundStatus::default();
        let mut evidence = Vec::new();

        let stop_reason = 'outer: {
            for round in 1..=self.max_rounds {
                if !surface.trigger_enabled().await? {
                    info!(round, "renewal trigger unavailable");
                    break 'outer StopReason::TriggerUnavailable;
                }

                info!(round, max = self.max_rounds, "starting renewal round");
                if !surface.open_modal().await? {
                    warn!(round, "confirmation modal did not open");
                    evidence.push(EvidenceRecord::dom("confirmation modal did not open"));
                    continue;
                }

                if surface.clear_challenge().await? == ChallengeStatus::Unresolved {
                    evidence.push(EvidenceRecord::dom("anti-automation challenge unresolved"));
                    break 'outer StopReason::ChallengeUnresolved;
                }

                surface.visit_sponsor().await?;
                surface.confirm().await?;

                if let Some(marker) = surface.limit_marker().await? {
                    info!(round, marker = marker.as_str(), "limit marker visible");
                    evidence.push(EvidenceRecord::dom(marker));
                    break 'outer StopReason::LimitReached;
                }

                rounds_completed += 1;
                status = surface.finish_round().await?;
                info!(
                    round,
                    counter = ?status.counter,
                    remaining_days = ?status.remaining_days,
                    "renewal round finished"
                );

                if let Some(days) = status.remaining_days {
                    if days >= self.day_ceiling {
                        info!(days, ceiling = self.day_ceiling, "validity ceiling reached");
                        break 'outer StopReason::CeilingReached;
                    }
                }
            }
            StopReason::RoundBudget
        };

        evidence.extend(surface.collect_evidence().await?);
        Ok(RenewalSummary {
            rounds_completed,
            stop_reason,
            status,
            evidence,
        })
    }
}

/// Browser-backed surface over the renewal panel.
pub struct PanelSurface<'a> {
    pub context: &'a BrowserContext,
    pub automation: &'a BrowserAutomation,
    pub challenge: &'a ChallengeHandler,
    pub config: &'a RenewalSection,
    pub phrases: &'a PhraseSection,
}

impl PanelSurface<'_> {
    async fn click_by_id(&self, id: &str) -> BrowserResult<bool> {
        let script = format!(
            "(() => {{ const el = document.getElementById('{id}'); \
             if (!el || el.disabled) return false; el.click(); return true; }})()"
        );
        self.context.eval_bool(&script).await
    }
}

#[async_trait]
impl RenewalSurface for PanelSurface<'_> {
    async fn trigger_enabled(&mut self) -> BrowserResult<bool> {
        let disabled = self
            .context
            .eval_bool(&disabled_script(&self.config.trigger_id))
            .await?;
        Ok(!disabled)
    }

    async fn open_modal(&mut self) -> BrowserResult<bool> {
        if !self.click_by_id(&self.config.trigger_id).await? {
            return Ok(false);
        }
        sleep(Duration::from_secs(2)).await;
        self.context
            .eval_bool(&visibility_script(&self.config.modal_id))
            .await
    }

    async fn clear_challenge(&mut self) -> BrowserResult<ChallengeStatus> {
        self.challenge.clear(self.context).await
    }

    async fn visit_sponsor(&mut self) -> BrowserResult<()> {
        let script = format!(
            "(() => {{ const banner = document.getElementById('{id}'); \
             if (!banner) return false; \
             const clickable = banner.closest('[onclick]') || banner.parentElement || banner; \
             clickable.click(); return true; }})()",
            id = self.config.ad_banner_id
        );
        let clicked: bool = self.context.eval_bool(&script).await?;
        if clicked {
            sleep(Duration::from_secs(3)).await;
            self.automation.close_secondary_tabs(self.context).await?;
        }
        Ok(())
    }

    async fn confirm(&mut self) -> BrowserResult<()> {
        if !self.click_by_id(&self.config.confirm_id).await? {
            // Confirm button unusable; the modal's form is the fallback.
            let script = format!(
                "(() => {{ const form = document.querySelector('#{} form'); \
                 if (form) {{ form.submit(); return true; }} return false; }})()",
                self.config.modal_id
            );
            self.context.eval_bool(&script).await?;
        }
        sleep(Duration::from_secs(3)).await;
        Ok(())
    }

    async fn limit_marker(&mut self) -> BrowserResult<Option<String>> {
        let body = self.context.body_text().await?;
        let lowered = body.to_lowercase();
        Ok(self
            .phrases
            .limit
            .iter()
            .find(|phrase| lowered.contains(&phrase.to_lowercase()))
            .cloned())
    }

    async fn finish_round(&mut self) -> BrowserResult<RoundStatus> {
        let reset = format!(
            "(() => {{ \
             const modal = document.getElementById('{modal}'); \
             if (modal) modal.style.display = 'none'; \
             const backdrop = document.querySelector('.modal-backdrop'); \
             if (backdrop) backdrop.remove(); \
             document.body.classList.remove('modal-open'); \
             return true; }})()",
            modal = self.config.modal_id
        );
        self.context.eval_bool(&reset).await?;

        self.context.reload().await?;
        sleep(Duration::from_secs(self.config.round_settle_seconds)).await;

        let counter_text: String = self
            .context
            .eval_value(&inner_text_script(&self.config.counter_id))
            .await?;
        let body = self.context.body_text().await?;
        Ok(RoundStatus {
            counter: counter_text.trim().parse().ok(),
            remaining_days: parse_remaining_days(&body),
        })
    }

    async fn collect_evidence(&mut self) -> BrowserResult<Vec<EvidenceRecord>> {
        let mut evidence = Vec::new();

        let status_text: String = self
            .context
            .eval_value(&inner_text_script(&self.config.status_id))
            .await
            .unwrap_or_default();
        if !status_text.is_empty() {
            evidence.push(EvidenceRecord::dom(status_text));
        }

        let body = self.context.body_text().await?;
        let url = self.context.current_url().await?;
        let is_error_page = url.starts_with("chrome-error://") || body.contains("ERR_");
        if let Some(kind) = classify_page_error(is_error_page, &body) {
            evidence.push(EvidenceRecord::page_error(kind));
        }

        evidence.extend(self.context.api_evidence().await?);
        Ok(evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserError;

    /// Scripted surface: each field is a queue of responses, popped
    /// front-first.
    #[derive(Default)]
    struct ScriptedSurface {
        trigger: Vec<bool>,
        modal: Vec<bool>,
        challenge: Vec<ChallengeStatus>,
        limit: Vec<Option<String>>,
        rounds: Vec<RoundStatus>,
        api: Vec<EvidenceRecord>,
        confirms: u32,
    }

    fn pop<T: Clone>(queue: &mut Vec<T>, default: T) -> T {
        if queue.is_empty() {
            default
        } else {
            queue.remove(0)
        }
    }

    #[async_trait]
    impl RenewalSurface for ScriptedSurface {
        async fn trigger_enabled(&mut self) -> BrowserResult<bool> {
            Ok(pop(&mut self.trigger, true))
        }
        async fn open_modal(&mut self) -> BrowserResult<bool> {
            Ok(pop(&mut self.modal, true))
        }
        async fn clear_challenge(&mut self) -> BrowserResult<ChallengeStatus> {
            Ok(pop(&mut self.challenge, ChallengeStatus::NotPresent))
        }
        async fn visit_sponsor(&mut self) -> BrowserResult<()> {
            Ok(())
        }
        async fn confirm(&mut self) -> BrowserResult<()> {
            self.confirms += 1;
            Ok(())
        }
        async fn limit_marker(&mut self) -> BrowserResult<Option<String>> {
            Ok(pop(&mut self.limit, None))
        }
        async fn finish_round(&mut self) -> BrowserResult<RoundStatus> {
            if self.rounds.is_empty() {
                return Err(BrowserError::Unexpected("no scripted round".into()));
            }
            Ok(self.rounds.remove(0))
        }
        async fn collect_evidence(&mut self) -> BrowserResult<Vec<EvidenceRecord>> {
            Ok(std::mem::take(&mut self.api))
        }
    }

    fn status(counter: u32, days: u32) -> RoundStatus {
        RoundStatus {
            counter: Some(counter),
            remaining_days: Some(days),
        }
    }

    #[tokio::test]
    async fn stops_at_round_budget() {
        let mut surface = ScriptedSurface {
            rounds: (1..=10).map(|i| status(i, 3)).collect(),
            ..Default::default()
        };
        let summary = RenewalLoop::new(3, 7).run(&mut surface).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::RoundBudget);
        assert_eq!(summary.rounds_completed, 3);
        assert_eq!(surface.confirms, 3);
    }

    #[tokio::test]
    async fn stops_when_trigger_disables_mid_run() {
        let mut surface = ScriptedSurface {
            trigger: vec![true, true, false],
            rounds: vec![status(1, 2), status(2, 3)],
            ..Default::default()
        };
        let summary = RenewalLoop::new(7, 7).run(&mut surface).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::TriggerUnavailable);
        assert_eq!(summary.rounds_completed, 2);
    }

    #[tokio::test]
    async fn limit_marker_stops_before_counting_the_round() {
        let mut surface = ScriptedSurface {
            limit: vec![None, Some("Cannot exceed 7 days".into())],
            rounds: vec![status(6, 6)],
            ..Default::default()
        };
        let summary = RenewalLoop::new(7, 7).run(&mut surface).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::LimitReached);
        assert_eq!(summary.rounds_completed, 1);
        assert!(summary
            .evidence
            .iter()
            .any(|r| r.snippet().contains("Cannot exceed")));
    }

    #[tokio::test]
    async fn day_ceiling_stops_the_loop() {
        let mut surface = ScriptedSurface {
            rounds: vec![status(5, 5), status(6, 7)],
            ..Default::default()
        };
        let summary = RenewalLoop::new(7, 7).run(&mut surface).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::CeilingReached);
        assert_eq!(summary.rounds_completed, 2);
    }

    #[tokio::test]
    async fn unresolved_challenge_stops_without_confirming() {
        let mut surface = ScriptedSurface {
            challenge: vec![ChallengeStatus::Unresolved],
            ..Default::default()
        };
        let summary = RenewalLoop::new(7, 7).run(&mut surface).await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::ChallengeUnresolved);
        assert_eq!(summary.rounds_completed, 0);
        assert_eq!(surface.confirms, 0);
    }

    #[tokio::test]
    async fn modal_miss_skips_the_round_within_budget() {
        let mut surface = ScriptedSurface {
            modal: vec![false, true],
            rounds: vec![status(1, 2)],
            ..Default::default()
        };
        let summary = RenewalLoop::new(2, 7).run(&mut surface).await.unwrap();
        assert_eq!(summary.rounds_completed, 1);
        assert_eq!(summary.stop_reason, StopReason::RoundBudget);
    }
}
