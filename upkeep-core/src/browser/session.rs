//! Session establishment by cookie injection. The run never performs
//! interactive password login against the renewal panel: the session
//! secret is injected into the cookie jar before the first navigation,
//! and the resulting state is verified, never assumed.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::SessionSection;
use crate::credentials::CredentialSet;
use crate::evidence::{classify_page_error, find_blocked_marker, EvidenceRecord};

use super::automation::BrowserContext;
use super::challenge::{ChallengeHandler, ChallengeStatus};
use super::error::{BrowserError, BrowserResult};

/// What the verification page told us about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    LoggedIn,
    LoggedOut,
    /// The defense layer refused the visit outright; retrying from the
    /// same address will not help.
    Blocked,
    Indeterminate,
}

/// Pure decision over the post-verification URL and page text. Kept
/// separate from the driver so it can be tested without a browser.
pub fn classify_login_state(url: &str, body: &str) -> LoginState {
    let url_lower = url.to_lowercase();
    if url_lower.contains("/login") || url_lower.contains("/auth") || url_lower.contains("signin") {
        return LoginState::LoggedOut;
    }
    let body_lower = body.to_lowercase();
    if body_lower.contains("log in") && body_lower.contains("password") {
        return LoginState::LoggedOut;
    }
    if body_lower.contains("logout")
        || body_lower.contains("sign out")
        || body_lower.contains("dashboard")
        || body_lower.contains("time remaining")
    {
        return LoginState::LoggedIn;
    }
    LoginState::Indeterminate
}

/// Full pure decision for one verification page. A blocked marker wins
/// over the login-state read because a block page can masquerade as a
/// login form.
pub fn classify_verification(url: &str, body: &str, blocked_markers: &[String]) -> LoginState {
    if find_blocked_marker(body, blocked_markers).is_some() {
        return LoginState::Blocked;
    }
    classify_login_state(url, body)
}

#[derive(Debug)]
pub struct EstablishedSession {
    pub state: LoginState,
    /// Evidence collected along the way (page errors, blocked markers)
    /// for the outcome classifier when establishment fails.
    pub evidence: Vec<EvidenceRecord>,
}

#[derive(Debug, Clone)]
pub struct SessionEstablisher {
    config: SessionSection,
}

impl SessionEstablisher {
    pub fn new(config: SessionSection) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionSection {
        &self.config
    }

    /// Injects the allow-listed secrets, navigates to the entry URL,
    /// clears any challenge, then polls the verification URL until the
    /// login state resolves or the attempt budget runs out. A blocked
    /// marker on the verification page ends the poll immediately.
    pub async fn establish(
        &self,
        context: &BrowserContext,
        challenge: &ChallengeHandler,
        credentials: &CredentialSet,
        blocked_markers: &[String],
    ) -> BrowserResult<EstablishedSession> {
        let mut evidence = Vec::new();
        let allowed = credentials.restrict(&self.config.allowed_cookies);
        if allowed.is_empty() {
            return Err(BrowserError::Configuration(format!(
                "no allowed session cookies present (expected one of {:?})",
                self.config.allowed_cookies
            )));
        }

        // Cookies must exist before the first authenticated navigation,
        // and the jar needs a same-origin document to accept them.
        context.goto(&self.config.entry_url).await?;
        for (name, value) in allowed.iter() {
            context
                .inject_cookie(name, value, &self.config.cookie_domain)
                .await?;
        }

        context.goto(&self.config.entry_url).await?;
        context.settle().await;

        // An unresolved challenge does not block the run: verification
        // below decides whether the session is usable anyway.
        match challenge.clear(context).await? {
            ChallengeStatus::Unresolved => {
                warn!("challenge unresolved, proceeding to verification anyway");
                evidence.push(EvidenceRecord::dom("anti-automation challenge unresolved"));
            }
            status => info!(?status, "challenge stage passed"),
        }

        for attempt in 1..=self.config.poll_attempts {
            context.goto(&self.config.verify_url).await?;
            context.settle().await;

            let url = context.current_url().await?;
            let body = context.body_text().await?;

            let is_error_page = url.starts_with("chrome-error://")
                || body.contains("ERR_")
                || body.contains("can't be reached");
            if let Some(kind) = classify_page_error(is_error_page, &body) {
                warn!(attempt, error = ?kind, "verification hit a browser error page");
                evidence.push(EvidenceRecord::page_error(kind));
                sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
                continue;
            }

            match classify_verification(&url, &body, blocked_markers) {
                LoginState::Blocked => {
                    let marker = find_blocked_marker(&body, blocked_markers)
                        .unwrap_or_else(|| "blocked".to_string());
                    warn!(attempt, marker = marker.as_str(), "verification page is blocked");
                    evidence.push(EvidenceRecord::dom(marker));
                    return Ok(EstablishedSession {
                        state: LoginState::Blocked,
                        evidence,
                    });
                }
                LoginState::LoggedIn => {
                    info!(attempt, "session verified");
                    return Ok(EstablishedSession {
                        state: LoginState::LoggedIn,
                        evidence,
                    });
                }
                LoginState::LoggedOut => {
                    warn!(attempt, "session rejected, credential is stale");
                    evidence.push(EvidenceRecord::dom("login page shown after cookie injection"));
                    return Ok(EstablishedSession {
                        state: LoginState::LoggedOut,
                        evidence,
                    });
                }
                LoginState::Indeterminate => {
                    sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
                }
            }
        }

        warn!("session verification attempts exhausted");
        Ok(EstablishedSession {
            state: LoginState::Indeterminate,
            evidence,
        })
    }

    /// Re-captures the allow-listed cookies after a successful run so a
    /// refreshed secret can be rotated back into storage.
    pub async fn refreshed_credentials(
        &self,
        context: &BrowserContext,
    ) -> BrowserResult<CredentialSet> {
        let captured = context.capture_cookies().await?;
        Ok(captured.restrict(&self.config.allowed_cookies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_url_means_logged_out() {
        assert_eq!(
            classify_login_state("https://panel.example.com/login?next=/", "anything"),
            LoginState::LoggedOut
        );
    }

    #[test]
    fn logout_link_means_logged_in() {
        assert_eq!(
            classify_login_state(
                "https://panel.example.com/dashboard",
                "Welcome back\nLogout\nTIME REMAINING: 6 Days"
            ),
            LoginState::LoggedIn
        );
    }

    #[test]
    fn password_form_body_means_logged_out() {
        assert_eq!(
            classify_login_state(
                "https://panel.example.com/",
                "Please log in\nEmail\nPassword\nRemember me"
            ),
            LoginState::LoggedOut
        );
    }

    #[test]
    fn unrelated_content_is_indeterminate() {
        assert_eq!(
            classify_login_state("https://panel.example.com/", "Loading…"),
            LoginState::Indeterminate
        );
    }

    #[test]
    fn blocked_marker_wins_over_login_state() {
        let markers = vec!["access denied".to_string(), "verify you are human".to_string()];
        assert_eq!(
            classify_verification(
                "https://panel.example.com/login",
                "Access Denied\nPlease log in\nPassword",
                &markers
            ),
            LoginState::Blocked
        );
        assert_eq!(
            classify_verification(
                "https://panel.example.com/dashboard",
                "Welcome back\nLogout",
                &markers
            ),
            LoginState::LoggedIn
        );
    }
}
