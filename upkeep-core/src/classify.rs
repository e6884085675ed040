use regex::Regex;

use crate::config::PhraseSection;
use crate::evidence::{ApiEvidence, EvidenceKind, EvidenceRecord};

/// Canonical result of one logical action attempt. Closed taxonomy:
/// exactly one tag per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeTag {
    Success,
    AlreadyDone,
    LimitReached,
    AuthFailed,
    Blocked,
    TransientError,
    Unknown,
}

impl OutcomeTag {
    /// "Nothing left to do" counts as success for exit-code purposes:
    /// an already-done check-in or an exhausted renewal quota is the
    /// expected steady state, not a failure.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            OutcomeTag::Success | OutcomeTag::AlreadyDone | OutcomeTag::LimitReached
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, OutcomeTag::Unknown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutcomeTag::Success => "success",
            OutcomeTag::AlreadyDone => "already done",
            OutcomeTag::LimitReached => "limit reached",
            OutcomeTag::AuthFailed => "auth failed",
            OutcomeTag::Blocked => "blocked",
            OutcomeTag::TransientError => "transient error",
            OutcomeTag::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for OutcomeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Reduces the evidence collected for one attempt to a single tag.
///
/// Precedence, most authoritative first:
/// 1. captured API responses (newest first),
/// 2. curated DOM phrases,
/// 3. browser error-page classification,
/// 4. `Unknown`.
///
/// The classifier defaults to `Unknown` rather than guessing: reporting
/// unknown for an action that actually succeeded is acceptable,
/// reporting success for one that did not happen is not.
pub fn classify(records: &[EvidenceRecord], phrases: &PhraseSection) -> OutcomeTag {
    for record in records.iter().rev() {
        if let EvidenceKind::Api(api) = &record.kind {
            return classify_api(api, phrases);
        }
    }

    for record in records {
        if let EvidenceKind::Dom(text) = &record.kind {
            if let Some(tag) = classify_dom(text, phrases) {
                return tag;
            }
        }
    }

    for record in records {
        if let EvidenceKind::PageError(_) = &record.kind {
            return OutcomeTag::TransientError;
        }
    }

    OutcomeTag::Unknown
}

fn classify_api(api: &ApiEvidence, phrases: &PhraseSection) -> OutcomeTag {
    if api.ok && (200..300).contains(&api.status) {
        return OutcomeTag::Success;
    }
    let message = api.message.to_lowercase();
    if api.status == 400 && phrases.limit.iter().any(|p| message.contains(&p.to_lowercase())) {
        return OutcomeTag::LimitReached;
    }
    if api.status == 401 || api.status == 403 {
        return OutcomeTag::AuthFailed;
    }
    if api.status >= 400 {
        return OutcomeTag::TransientError;
    }
    OutcomeTag::Unknown
}

fn classify_dom(text: &str, phrases: &PhraseSection) -> Option<OutcomeTag> {
    let text = text.to_lowercase();
    let matches = |set: &[String]| set.iter().any(|p| text.contains(&p.to_lowercase()));
    if matches(&phrases.success) {
        Some(OutcomeTag::Success)
    } else if matches(&phrases.limit) {
        Some(OutcomeTag::LimitReached)
    } else if matches(&phrases.already) {
        Some(OutcomeTag::AlreadyDone)
    } else if matches(&phrases.disabled) {
        Some(OutcomeTag::AuthFailed)
    } else if matches(&phrases.blocked) {
        Some(OutcomeTag::Blocked)
    } else {
        None
    }
}

/// Best-effort numeric heuristic: pulls "N Days" out of free page text.
/// Used only as a stop-condition read-back, never to claim success.
pub fn parse_remaining_days(text: &str) -> Option<u32> {
    let re = Regex::new(r"(?i)(\d+)\s*Days?").ok()?;
    let caps = re.captures(text)?;
    caps.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::PageErrorKind;

    fn phrases() -> PhraseSection {
        PhraseSection {
            success: vec!["renewed successfully".into(), "签到成功".into()],
            already: vec!["已签到".into()],
            limit: vec!["cannot exceed 7 days".into(), "limit reached".into()],
            disabled: vec!["account disabled".into()],
            blocked: vec!["rate limit".into()],
        }
    }

    #[test]
    fn empty_evidence_is_unknown() {
        assert_eq!(classify(&[], &phrases()), OutcomeTag::Unknown);
    }

    #[test]
    fn api_limit_message_maps_to_limit_reached() {
        let records = vec![EvidenceRecord::api(400, false, "Cannot exceed 7 days validity")];
        assert_eq!(classify(&records, &phrases()), OutcomeTag::LimitReached);
    }

    #[test]
    fn api_evidence_dominates_contradictory_dom_text() {
        let records = vec![
            EvidenceRecord::dom("Server renewed successfully!"),
            EvidenceRecord::api(500, false, "internal error"),
        ];
        assert_eq!(classify(&records, &phrases()), OutcomeTag::TransientError);
    }

    #[test]
    fn newest_api_record_wins() {
        let records = vec![
            EvidenceRecord::api(500, false, "flaky"),
            EvidenceRecord::api(200, true, "done"),
        ];
        assert_eq!(classify(&records, &phrases()), OutcomeTag::Success);
    }

    #[test]
    fn dom_success_phrase_without_api() {
        let records = vec![EvidenceRecord::dom("你好，签到成功，获得5枚能量")];
        assert_eq!(classify(&records, &phrases()), OutcomeTag::Success);
    }

    #[test]
    fn dom_limit_outranks_already_within_tier() {
        let records = vec![EvidenceRecord::dom("limit reached: 已签到")];
        assert_eq!(classify(&records, &phrases()), OutcomeTag::LimitReached);
    }

    #[test]
    fn page_error_alone_is_transient() {
        let records = vec![EvidenceRecord::page_error(PageErrorKind::Timeout)];
        assert_eq!(classify(&records, &phrases()), OutcomeTag::TransientError);
    }

    #[test]
    fn never_success_without_a_success_signal() {
        let records = vec![
            EvidenceRecord::dom("some unrelated banner text"),
            EvidenceRecord::dom("another line"),
        ];
        assert_ne!(classify(&records, &phrases()), OutcomeTag::Success);
    }

    #[test]
    fn auth_status_codes_map_to_auth_failed() {
        let records = vec![EvidenceRecord::api(403, false, "forbidden")];
        assert_eq!(classify(&records, &phrases()), OutcomeTag::AuthFailed);
    }

    #[test]
    fn remaining_days_heuristic() {
        assert_eq!(parse_remaining_days("TIME REMAINING: 6 Days"), Some(6));
        assert_eq!(parse_remaining_days("1 day left"), Some(1));
        assert_eq!(parse_remaining_days("no numbers here"), None);
    }
}
