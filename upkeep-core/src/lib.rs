pub mod browser;
pub mod classify;
pub mod config;
pub mod credentials;
pub mod error;
pub mod evidence;
pub mod mask;
pub mod notify;
pub mod report;
pub mod rotation;
pub mod screenshot;
pub mod workflow;

pub use browser::{
    BrowserAutomation, BrowserContext, BrowserError, BrowserLauncher, BrowserResult,
    ChallengeHandler, ChallengeStatus, LoginState, SessionEstablisher,
};
pub use classify::{classify, parse_remaining_days, OutcomeTag};
pub use config::{load_upkeep_config, UpkeepConfig};
pub use credentials::{parse_accounts, Account, CredentialSet};
pub use error::{ConfigError, Result};
pub use evidence::{
    classify_page_error, find_blocked_marker, EvidenceKind, EvidenceRecord, PageErrorKind,
};
pub use notify::{NoopNotifier, NotificationSink, NotifyError, TelegramNotifier};
pub use report::{ReportBuilder, TargetReport};
pub use rotation::{FileRotation, NoopRotation, RotationError, RotationSink};
pub use screenshot::ScreenshotSink;
pub use workflow::{WorkflowKind, WorkflowRunner};
