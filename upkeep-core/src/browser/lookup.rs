//! Ordered selector fallback. Target sites redesign their markup
//! without notice, so every interactive element is described by a
//! chain of candidate selectors tried in order.

use std::time::Duration;

use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use tokio::time::sleep;
use tracing::debug;

use super::error::{BrowserError, BrowserResult};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A selector chain that matched, with the selector that won.
#[derive(Debug)]
pub struct Match {
    pub element: Element,
    pub selector: String,
}

/// Tries each selector once, in order. Returns the first match, or
/// `None` when the whole chain misses.
pub async fn find_first(page: &Page, selectors: &[String]) -> BrowserResult<Option<Match>> {
    for selector in selectors {
        match page.find_element(selector.as_str()).await {
            Ok(element) => {
                debug!(selector = selector.as_str(), "selector matched");
                return Ok(Some(Match {
                    element,
                    selector: selector.clone(),
                }));
            }
            Err(_) => continue,
        }
    }
    Ok(None)
}

/// Polls the chain until one selector matches or the deadline passes.
pub async fn wait_for_first(
    page: &Page,
    selectors: &[String],
    timeout: Duration,
) -> BrowserResult<Match> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(found) = find_first(page, selectors).await? {
            return Ok(found);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BrowserError::Timeout(format!(
                "none of {} selectors matched within {timeout:?}",
                selectors.len()
            )));
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Clicks the first matching element in the chain. Returns the winning
/// selector, or `None` when nothing matched.
pub async fn click_first(page: &Page, selectors: &[String]) -> BrowserResult<Option<String>> {
    let Some(found) = find_first(page, selectors).await? else {
        return Ok(None);
    };
    found
        .element
        .click()
        .await
        .map_err(|err| BrowserError::Unexpected(format!("failed to click element: {err}")))?;
    Ok(Some(found.selector))
}

/// Fills the first matching input in the chain, character by character
/// with a short pause, the way a person types.
pub async fn type_into_first(
    page: &Page,
    selectors: &[String],
    text: &str,
) -> BrowserResult<Option<String>> {
    let Some(found) = find_first(page, selectors).await? else {
        return Ok(None);
    };
    found.element.click().await.map_err(|err| {
        BrowserError::Unexpected(format!("failed to focus element before typing: {err}"))
    })?;
    for ch in text.chars() {
        found
            .element
            .type_str(ch.to_string())
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to type character: {err}")))?;
        sleep(Duration::from_millis(40)).await;
    }
    Ok(Some(found.selector))
}

/// JS-side visibility probe for elements that exist in the DOM but are
/// hidden until a modal opens.
pub fn visibility_script(element_id: &str) -> String {
    format!(
        "(() => {{ const el = document.getElementById('{id}'); \
         if (!el) return false; \
         const style = window.getComputedStyle(el); \
         return style.display !== 'none' && style.visibility !== 'hidden' && el.offsetParent !== null; }})()",
        id = escape_single_quotes(element_id)
    )
}

/// JS-side disabled probe for buttons that grey out when the action is
/// exhausted.
pub fn disabled_script(element_id: &str) -> String {
    format!(
        "(() => {{ const el = document.getElementById('{id}'); \
         return el ? !!el.disabled : true; }})()",
        id = escape_single_quotes(element_id)
    )
}

/// Reads an element's trimmed innerText by id, empty string when absent.
pub fn inner_text_script(element_id: &str) -> String {
    format!(
        "(() => {{ const el = document.getElementById('{id}'); \
         return el ? (el.innerText || '').trim() : ''; }})()",
        id = escape_single_quotes(element_id)
    )
}

fn escape_single_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_script_embeds_escaped_id() {
        let script = visibility_script("renew'btn");
        assert!(script.contains("renew\\'btn"));
        assert!(script.contains("offsetParent"));
    }

    #[test]
    fn disabled_script_defaults_to_true_for_missing_element() {
        let script = disabled_script("trigger");
        assert!(script.contains("el ? !!el.disabled : true"));
    }
}
