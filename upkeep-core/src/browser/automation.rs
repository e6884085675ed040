use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetUserAgentOverrideParams};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserSection;
use crate::credentials::CredentialSet;
use crate::evidence::EvidenceRecord;

use super::error::{BrowserError, BrowserResult};

/// Launches freshly-profiled Chromium instances. One instance per
/// target: no cookies or tabs survive from one target to the next.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserSection>,
}

impl BrowserLauncher {
    pub fn new(config: BrowserSection) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        let chromium_config = self.build_chromium_config()?;
        info!(
            headless = self.config.headless,
            width = self.config.window[0],
            height = self.config.window[1],
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
        })
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let [width, height] = self.config.window;
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: width >= height,
            has_touch: false,
        });

        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        builder = builder.request_timeout(Duration::from_secs(self.config.nav_timeout_seconds));

        let mut args = vec![
            format!("--user-agent={}", self.config.user_agent),
            format!("--window-size={width},{height}"),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(proxy) = &self.config.proxy {
            args.push(format!("--proxy-server={proxy}"));
        }
        if let Some(accept) = &self.config.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

/// One live Chromium instance plus its event-handler task.
#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<BrowserSection>,
}

impl BrowserAutomation {
    /// Opens the primary page for this target, with anti-automation
    /// masking and the response-observation hook installed before any
    /// navigation. `api_filter` restricts which response URLs the hook
    /// records; an empty filter records nothing.
    pub async fn new_context(&self, api_filter: &str) -> BrowserResult<BrowserContext> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page, api_filter).await?;
        Ok(BrowserContext {
            page,
            settle: Duration::from_secs(self.config.settle_seconds),
        })
    }

    /// Closes every tab except the primary one and returns how many
    /// were closed. Interactions can spawn advertisement tabs; an
    /// orphaned tab silently redirects subsequent element lookups to
    /// the wrong document.
    pub async fn close_secondary_tabs(&self, primary: &BrowserContext) -> BrowserResult<usize> {
        let primary_id = primary.page.target_id().clone();
        let pages = self.browser.pages().await?;
        let mut closed = 0usize;
        for page in pages {
            if page.target_id() == &primary_id {
                continue;
            }
            if let Err(err) = page.close().await {
                warn!(error = %err, "failed to close secondary tab");
            } else {
                closed += 1;
            }
        }
        if closed > 0 {
            info!(closed, "closed secondary tabs");
            primary.page.bring_to_front().await?;
        }
        Ok(closed)
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("shutting down chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }

    async fn configure_page(&self, page: &Page, api_filter: &str) -> BrowserResult<()> {
        page.enable_stealth_mode_with_agent(&self.config.user_agent)
            .await?;

        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(self.config.user_agent.clone());
        if let Some(accept) = &self.config.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        let hook = RESPONSE_HOOK.replace("__FILTER__", &escape_js(api_filter));
        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(hook)
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

/// The primary page of one target's session.
#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
    settle: Duration,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    /// Post-navigation pause for client-side rendering to settle.
    pub async fn settle(&self) {
        tokio::time::sleep(self.settle).await;
    }

    pub async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub async fn body_text(&self) -> BrowserResult<String> {
        self.eval_value("(() => document.body ? (document.body.innerText || '') : '')()")
            .await
    }

    pub async fn eval_bool(&self, script: &str) -> BrowserResult<bool> {
        self.eval_value(script).await
    }

    pub async fn eval_value<T: DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?
            .into_value()
            .map_err(|err| BrowserError::Script(err.to_string()))
    }

    /// Injects one session secret into the browser's cookie jar. Must
    /// happen before any authenticated navigation.
    pub async fn inject_cookie(&self, name: &str, value: &str, domain: &str) -> BrowserResult<()> {
        let cookie = CookieParam::builder()
            .name(name)
            .value(value)
            .domain(domain)
            .path("/")
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.set_cookies(vec![cookie]).await?;
        info!(cookie = name, "injected session cookie");
        Ok(())
    }

    /// Captures the cookies visible to this page as a credential set.
    /// Callers restrict the result to the allow-list before it goes
    /// anywhere.
    pub async fn capture_cookies(&self) -> BrowserResult<CredentialSet> {
        let cookies = self.page.get_cookies().await?;
        let mut set = CredentialSet::default();
        for cookie in cookies {
            set.insert(cookie.name, cookie.value);
        }
        Ok(set)
    }

    /// Drains the response-observation bucket into evidence records,
    /// oldest first.
    pub async fn captured_responses(&self) -> BrowserResult<Vec<CapturedResponse>> {
        let captured: Vec<CapturedResponse> = self
            .eval_value("(() => Array.from(window.__upkeepCaptured || []))()")
            .await
            .unwrap_or_default();
        Ok(captured)
    }

    pub async fn api_evidence(&self) -> BrowserResult<Vec<EvidenceRecord>> {
        let captured = self.captured_responses().await?;
        Ok(captured
            .into_iter()
            .map(|resp| EvidenceRecord::api(resp.status, resp.ok, resp.message))
            .collect())
    }

    pub async fn screenshot_bytes(&self) -> BrowserResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        Ok(self.page.screenshot(params).await?)
    }

    pub async fn reload(&self) -> BrowserResult<()> {
        self.page.reload().await?;
        Ok(())
    }
}

/// One entry recorded by the page-side fetch/XHR hook.
#[derive(Debug, Clone, Deserialize)]
pub struct CapturedResponse {
    #[serde(default)]
    pub url: String,
    pub status: u16,
    pub ok: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub body: String,
}

fn escape_js(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

const RESPONSE_HOOK: &str = r#"
(() => {
    const bucket = [];
    Object.defineProperty(window, '__upkeepCaptured', {
        value: bucket,
        writable: false,
        configurable: false,
    });
    const FILTER = '__FILTER__';
    const matches = (url) => FILTER !== '' && String(url || '').includes(FILTER);
    const push = (entry) => {
        try {
            bucket.push(entry);
        } catch (_) {
            // ignore
        }
    };
    const record = (url, status, ok, text) => {
        let message = '';
        let body = String(text || '');
        try {
            const data = JSON.parse(body);
            if (data && typeof data === 'object' && data.message) {
                message = String(data.message);
            }
        } catch (_) {}
        push({ url: String(url || ''), status: status | 0, ok: !!ok, message, body });
    };

    const originalFetch = window.fetch;
    window.fetch = async (...args) => {
        const response = await originalFetch(...args);
        try {
            const request = args[0];
            const url = typeof request === 'string' ? request : request.url;
            if (matches(url)) {
                const clone = response.clone();
                clone.text().then((text) => {
                    record(url, response.status, response.ok, text);
                }).catch(() => {
                    record(url, response.status, response.ok, '');
                });
            }
        } catch (_) {}
        return response;
    };

    const OriginalXHR = window.XMLHttpRequest;
    window.XMLHttpRequest = function() {
        const xhr = new OriginalXHR();
        let url = '';
        const open = xhr.open;
        xhr.open = function(m, u) {
            url = u || '';
            return open.apply(xhr, arguments);
        };
        xhr.addEventListener('loadend', function() {
            if (matches(url)) {
                record(url, xhr.status, xhr.status >= 200 && xhr.status < 300, xhr.responseText);
            }
        });
        return xhr;
    };
})();
"#;
