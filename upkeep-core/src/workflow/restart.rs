//! Game-panel server restart. The server inventory comes from the
//! panel's own listing API, captured as the dashboard loads; scraping
//! the rendered list would miss servers on slow renders.

use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::browser::lookup;
use crate::browser::{BrowserContext, BrowserResult, ChallengeHandler};
use crate::config::RestartSection;
use crate::evidence::EvidenceRecord;
use crate::mask::mask_id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub id: String,
    pub name: String,
}

/// Per-server outcome, folded into the target report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Restarted,
    Started,
    ButtonMissing,
    ButtonDisabled,
    ClickFailed,
}

impl ServerAction {
    pub fn is_success(&self) -> bool {
        matches!(self, ServerAction::Restarted | ServerAction::Started)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServerAction::Restarted => "restarted",
            ServerAction::Started => "started",
            ServerAction::ButtonMissing => "restart button not found",
            ServerAction::ButtonDisabled => "restart and start both disabled",
            ServerAction::ClickFailed => "power button click failed",
        }
    }
}

#[derive(Debug)]
pub struct RestartOutcome {
    pub results: Vec<(ServerEntry, ServerAction)>,
    pub evidence: Vec<EvidenceRecord>,
}

impl RestartOutcome {
    pub fn all_succeeded(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|(_, a)| a.is_success())
    }

    pub fn any_succeeded(&self) -> bool {
        self.results.iter().any(|(_, a)| a.is_success())
    }
}

/// Pulls server entries out of a captured listing response body.
/// Tolerant of extra fields; entries without an identifier are
/// skipped.
pub fn parse_server_list(body: &str) -> Vec<ServerEntry> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };
    let Some(items) = value.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter(|item| {
            item.get("object").and_then(Value::as_str).unwrap_or("server") == "server"
        })
        .filter_map(|item| {
            let attrs = item.get("attributes")?;
            let id = attrs.get("identifier")?.as_str()?.to_string();
            let name = attrs
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            Some(ServerEntry { id, name })
        })
        .collect()
}

pub struct RestartWorkflow<'a> {
    pub config: &'a RestartSection,
    pub challenge: &'a ChallengeHandler,
}

impl RestartWorkflow<'_> {
    /// Restarts every server the listing API reported. Assumes the
    /// session is already established on `context`. `terminal_command`
    /// is typed into the panel's web terminal afterwards when both it
    /// and a terminal URL are configured.
    pub async fn run(
        &self,
        context: &BrowserContext,
        terminal_command: Option<&str>,
    ) -> BrowserResult<RestartOutcome> {
        let mut evidence = Vec::new();

        context.goto(&self.config.base_url).await?;
        context.settle().await;
        self.challenge.clear(context).await?;
        self.dismiss_banners(context).await?;

        let servers = self.discover_servers(context).await?;
        if servers.is_empty() {
            warn!("no servers found in captured listing responses");
            evidence.push(EvidenceRecord::dom("no servers found"));
            return Ok(RestartOutcome {
                results: Vec::new(),
                evidence,
            });
        }
        info!(count = servers.len(), "servers discovered");

        let mut results = Vec::new();
        for (idx, server) in servers.iter().enumerate() {
            info!(
                position = idx + 1,
                total = servers.len(),
                server = %mask_id(&server.id),
                "handling server"
            );
            let action = self.handle_server(context, server).await?;
            evidence.push(EvidenceRecord::dom(format!(
                "{}: {}",
                server.name,
                action.label()
            )));
            results.push((server.clone(), action));
            sleep(Duration::from_secs(2)).await;
        }

        if let (Some(url), Some(command)) = (&self.config.terminal_url, terminal_command) {
            self.run_terminal(context, url, command).await?;
        }

        Ok(RestartOutcome { results, evidence })
    }

    async fn discover_servers(&self, context: &BrowserContext) -> BrowserResult<Vec<ServerEntry>> {
        let mut servers = Vec::new();
        for response in context.captured_responses().await? {
            if !response.ok {
                continue;
            }
            for entry in parse_server_list(&response.body) {
                if !servers.contains(&entry) {
                    servers.push(entry);
                }
            }
        }
        Ok(servers)
    }

    async fn handle_server(
        &self,
        context: &BrowserContext,
        server: &ServerEntry,
    ) -> BrowserResult<ServerAction> {
        let url = format!(
            "{}/server/{}",
            self.config.base_url.trim_end_matches('/'),
            server.id
        );
        context.goto(&url).await?;
        context.settle().await;

        let restart =
            match lookup::wait_for_first(
                context.page(),
                &self.config.restart_buttons,
                Duration::from_secs(10),
            )
            .await
            {
                Ok(found) => found,
                Err(_) => return Ok(ServerAction::ButtonMissing),
            };

        if element_disabled(context, &restart.selector).await? {
            // A stopped server disables Restart; Start is the fallback.
            if let Some(start) =
                lookup::find_first(context.page(), &self.config.start_buttons).await?
            {
                if !element_disabled(context, &start.selector).await? {
                    if let Err(err) = start.element.click().await {
                        warn!(server = %mask_id(&server.id), %err, "start click failed");
                        return Ok(ServerAction::ClickFailed);
                    }
                    sleep(Duration::from_secs(3)).await;
                    return Ok(ServerAction::Started);
                }
            }
            return Ok(ServerAction::ButtonDisabled);
        }

        if let Err(err) = restart.element.click().await {
            warn!(server = %mask_id(&server.id), %err, "restart click failed");
            return Ok(ServerAction::ClickFailed);
        }
        sleep(Duration::from_secs(5)).await;
        Ok(ServerAction::Restarted)
    }

    async fn dismiss_banners(&self, context: &BrowserContext) -> BrowserResult<()> {
        for text in &self.config.dismiss_texts {
            let script = format!(
                "(() => {{ \
                 const nodes = Array.from(document.querySelectorAll('button, a')); \
                 const target = nodes.find(n => (n.innerText || '').trim() === '{text}'); \
                 if (target) {{ target.click(); return true; }} return false; }})()",
                text = text.replace('\'', "\\'")
            );
            if context.eval_bool(&script).await.unwrap_or(false) {
                info!(text = text.as_str(), "dismissed banner");
                sleep(Duration::from_secs(1)).await;
            }
        }
        Ok(())
    }

    /// Types a maintenance command into the panel's web terminal. The
    /// terminal's hidden helper textarea receives the keystrokes.
    async fn run_terminal(
        &self,
        context: &BrowserContext,
        url: &str,
        command: &str,
    ) -> BrowserResult<()> {
        info!("opening web terminal");
        context.goto(url).await?;
        context.settle().await;

        let terminal = match lookup::wait_for_first(
            context.page(),
            &self.config.terminal_selectors,
            Duration::from_secs(15),
        )
        .await
        {
            Ok(found) => found,
            Err(_) => {
                warn!("terminal did not render, skipping command");
                return Ok(());
            }
        };

        terminal.element.click().await.ok();
        let input = match context
            .page()
            .find_element("textarea.xterm-helper-textarea, textarea")
            .await
        {
            Ok(element) => element,
            Err(_) => terminal.element,
        };
        for ch in command.chars() {
            input
                .type_str(ch.to_string())
                .await
                .map_err(|err| {
                    crate::browser::BrowserError::Unexpected(format!(
                        "failed to type terminal command: {err}"
                    ))
                })?;
            sleep(Duration::from_millis(30)).await;
        }
        input.press_key("Enter").await.map_err(|err| {
            crate::browser::BrowserError::Unexpected(format!("failed to submit command: {err}"))
        })?;
        sleep(Duration::from_secs(3)).await;
        info!("terminal command sent");
        Ok(())
    }
}

async fn element_disabled(context: &BrowserContext, selector: &str) -> BrowserResult<bool> {
    let script = format!(
        "(() => {{ const el = document.querySelector('{sel}'); \
         return el ? !!el.disabled : true; }})()",
        sel = selector.replace('\'', "\\'")
    );
    context.eval_bool(&script).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_panel_listing() {
        let body = r#"{
            "object": "list",
            "data": [
                {"object": "server", "attributes": {"identifier": "abc123", "name": "lobby"}},
                {"object": "server", "attributes": {"identifier": "def456", "name": "survival"}},
                {"object": "allocation", "attributes": {"identifier": "ignored"}}
            ]
        }"#;
        let servers = parse_server_list(body);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].id, "abc123");
        assert_eq!(servers[1].name, "survival");
    }

    #[test]
    fn missing_identifier_is_skipped() {
        let body = r#"{"data": [{"object": "server", "attributes": {"name": "nameless"}}]}"#;
        assert!(parse_server_list(body).is_empty());
    }

    #[test]
    fn non_json_body_yields_nothing() {
        assert!(parse_server_list("<html>login</html>").is_empty());
        assert!(parse_server_list("").is_empty());
    }

    #[test]
    fn outcome_aggregation() {
        let server = ServerEntry {
            id: "x".into(),
            name: "x".into(),
        };
        let outcome = RestartOutcome {
            results: vec![
                (server.clone(), ServerAction::Restarted),
                (server, ServerAction::ButtonMissing),
            ],
            evidence: Vec::new(),
        };
        assert!(!outcome.all_succeeded());
        assert!(outcome.any_succeeded());

        let empty = RestartOutcome {
            results: Vec::new(),
            evidence: Vec::new(),
        };
        assert!(!empty.all_succeeded());
    }

    #[test]
    fn failed_click_is_never_a_success() {
        let server = ServerEntry {
            id: "x".into(),
            name: "x".into(),
        };
        assert!(!ServerAction::ClickFailed.is_success());
        let outcome = RestartOutcome {
            results: vec![(server, ServerAction::ClickFailed)],
            evidence: Vec::new(),
        };
        assert!(!outcome.any_succeeded());
        assert!(!outcome.all_succeeded());
    }
}
