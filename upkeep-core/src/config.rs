use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Run-wide configuration, constructed once at process start and passed
/// by reference into every component. No component reads ambient
/// environment state directly; secrets arrive through the CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UpkeepConfig {
    pub run: RunSection,
    pub browser: BrowserSection,
    pub challenge: ChallengeSection,
    pub session: SessionSection,
    pub phrases: PhraseSection,
    pub checkin: CheckinSection,
    pub renewal: RenewalSection,
    pub restart: RestartSection,
    pub notify: NotifySection,
    pub rotation: RotationSection,
}

impl UpkeepConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.run.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    pub base_dir: String,
    pub screenshot_dir: String,
    pub inter_target_pause_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window: [u32; 2],
    pub user_agent: String,
    pub accept_language: Option<String>,
    pub proxy: Option<String>,
    pub nav_timeout_seconds: u64,
    pub settle_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeSection {
    pub max_attempts: usize,
    pub settle_seconds: u64,
    pub jitter_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    pub entry_url: String,
    pub verify_url: String,
    pub cookie_domain: String,
    /// Secret names carried across runs; everything else captured from
    /// the browser is discarded before it can leak into logs or reports.
    pub allowed_cookies: Vec<String>,
    pub secret_name: String,
    pub poll_attempts: usize,
    pub poll_interval_seconds: u64,
}

/// Curated text markers for the DOM fallback tier of the classifier.
/// These are brittle by nature and always rank below a captured API
/// response.
#[derive(Debug, Clone, Deserialize)]
pub struct PhraseSection {
    pub success: Vec<String>,
    pub already: Vec<String>,
    pub limit: Vec<String>,
    pub disabled: Vec<String>,
    pub blocked: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckinSection {
    pub base_url: String,
    pub login_url: String,
    pub username_fields: Vec<String>,
    pub password_fields: Vec<String>,
    pub submit_buttons: Vec<String>,
    pub user_markers: Vec<String>,
    pub trigger_buttons: Vec<String>,
    pub popup_selectors: Vec<String>,
    pub login_wait_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenewalSection {
    pub panel_url: String,
    pub max_rounds: usize,
    pub day_ceiling: u32,
    pub api_filter: String,
    pub trigger_id: String,
    pub modal_id: String,
    pub confirm_id: String,
    pub counter_id: String,
    pub status_id: String,
    pub ad_banner_id: String,
    pub round_settle_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestartSection {
    pub base_url: String,
    pub api_filter: String,
    pub restart_buttons: Vec<String>,
    pub start_buttons: Vec<String>,
    pub dismiss_texts: Vec<String>,
    pub terminal_url: Option<String>,
    pub terminal_selectors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifySection {
    pub enabled: bool,
    pub caption_limit: usize,
    pub report_title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotationSection {
    pub enabled: bool,
    pub output_file: String,
}

pub fn load_upkeep_config<P: AsRef<Path>>(path: P) -> Result<UpkeepConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/upkeep.toml");
        let config = load_upkeep_config(path).expect("fixture should parse");
        assert_eq!(config.renewal.max_rounds, 7);
        assert_eq!(config.renewal.day_ceiling, 7);
        assert!(config.session.allowed_cookies.contains(&"session_id".to_string()));
        assert!(!config.phrases.success.is_empty());
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/upkeep.toml");
        let config = load_upkeep_config(path).unwrap();
        assert_eq!(
            config.resolve_path("/tmp/shots"),
            PathBuf::from("/tmp/shots")
        );
        assert!(config.resolve_path("shots").is_relative() || config.run.base_dir.starts_with('/'));
    }
}
