pub mod automation;
pub mod challenge;
pub mod error;
pub mod lookup;
pub mod session;

pub use automation::{BrowserAutomation, BrowserContext, BrowserLauncher, CapturedResponse};
pub use challenge::{ChallengeHandler, ChallengeStatus};
pub use error::{BrowserError, BrowserResult};
pub use session::{classify_login_state, classify_verification, LoginState, SessionEstablisher};
