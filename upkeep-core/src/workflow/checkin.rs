//! Forum daily check-in. Single-shot shape: log in with the account
//! password, press the check-in trigger once, then read the popup to
//! learn what actually happened. The trigger is never pressed twice
//! for the same account.

use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::browser::lookup;
use crate::browser::{BrowserContext, BrowserError, BrowserResult, ChallengeHandler};
use crate::config::CheckinSection;
use crate::credentials::Account;
use crate::evidence::EvidenceRecord;

/// What one check-in attempt produced. A credential that never got a
/// session is reported separately from the evidence so it cannot be
/// mistaken for an inconclusive page read.
#[derive(Debug, Default)]
pub struct CheckinResult {
    pub evidence: Vec<EvidenceRecord>,
    pub login_failed: bool,
}

pub struct CheckinWorkflow<'a> {
    pub config: &'a CheckinSection,
    pub challenge: &'a ChallengeHandler,
}

impl CheckinWorkflow<'_> {
    /// Runs the whole check-in for one account and returns the
    /// evidence the classifier needs. The browser context must be
    /// fresh; nothing from a previous account may be in the jar.
    pub async fn run(
        &self,
        context: &BrowserContext,
        account: &Account,
    ) -> BrowserResult<CheckinResult> {
        let mut evidence = Vec::new();

        context.goto(&self.config.base_url).await?;
        context.settle().await;
        self.challenge.clear(context).await?;

        if !self.logged_in(context).await? {
            self.login(context, account).await?;
            if !self.logged_in(context).await? {
                warn!("login did not produce a session");
                evidence.push(EvidenceRecord::dom("login did not complete"));
                return Ok(CheckinResult {
                    evidence,
                    login_failed: true,
                });
            }
        }
        info!("forum session established");

        let Some(found) =
            lookup::find_first(context.page(), &self.config.trigger_buttons).await?
        else {
            warn!("check-in trigger not found");
            evidence.push(EvidenceRecord::dom("check-in control not found"));
            return Ok(CheckinResult {
                evidence,
                login_failed: false,
            });
        };

        // The trigger's own label carries state on some themes
        // ("已签到" when today is done).
        if let Ok(Some(label)) = found.element.inner_text().await {
            let label = label.trim().to_string();
            if !label.is_empty() {
                evidence.push(EvidenceRecord::dom(label));
            }
        }

        found
            .element
            .click()
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to click trigger: {err}")))?;
        info!(selector = found.selector.as_str(), "check-in trigger pressed");
        sleep(Duration::from_secs(3)).await;

        match self.popup_text(context).await? {
            Some(text) => evidence.push(EvidenceRecord::dom(text)),
            None => {
                // No popup rendered; fall back to the page text.
                evidence.push(EvidenceRecord::dom(context.body_text().await?));
            }
        }

        Ok(CheckinResult {
            evidence,
            login_failed: false,
        })
    }

    async fn logged_in(&self, context: &BrowserContext) -> BrowserResult<bool> {
        Ok(lookup::find_first(context.page(), &self.config.user_markers)
            .await?
            .is_some())
    }

    async fn login(&self, context: &BrowserContext, account: &Account) -> BrowserResult<()> {
        info!("logging in to forum");
        context.goto(&self.config.login_url).await?;
        context.settle().await;
        self.challenge.clear(context).await?;

        if lookup::type_into_first(context.page(), &self.config.username_fields, &account.username)
            .await?
            .is_none()
        {
            return Err(BrowserError::Unexpected(
                "no username field matched".to_string(),
            ));
        }
        if lookup::type_into_first(context.page(), &self.config.password_fields, &account.password)
            .await?
            .is_none()
        {
            return Err(BrowserError::Unexpected(
                "no password field matched".to_string(),
            ));
        }
        if lookup::click_first(context.page(), &self.config.submit_buttons)
            .await?
            .is_none()
        {
            return Err(BrowserError::Unexpected(
                "no submit button matched".to_string(),
            ));
        }

        sleep(Duration::from_secs(self.config.login_wait_seconds)).await;
        self.challenge.clear(context).await?;
        Ok(())
    }

    /// First non-empty popup/toast body among the configured selectors.
    async fn popup_text(&self, context: &BrowserContext) -> BrowserResult<Option<String>> {
        for selector in &self.config.popup_selectors {
            if let Ok(element) = context.page().find_element(selector.as_str()).await {
                if let Ok(Some(text)) = element.inner_text().await {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        return Ok(Some(text));
                    }
                }
            }
        }
        Ok(None)
    }
}
