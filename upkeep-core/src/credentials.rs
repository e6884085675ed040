use std::fmt;

/// A normalized set of named secrets parsed from a delimited credential
/// blob (`name=value; name=value`). Parsing is soft: malformed segments
/// are skipped, duplicate names resolve last-write-wins, and an empty
/// or unusable blob yields an empty set rather than an error — missing
/// credentials are a reportable condition upstream, not a crash.
/// Insertion order is preserved; a duplicate overwrites the value at
/// the name's original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    entries: Vec<(String, String)>,
}

impl CredentialSet {
    pub fn parse(raw: &str) -> Self {
        let mut set = Self::default();
        for segment in raw.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let Some(eq) = segment.find('=') else {
                continue;
            };
            let name = segment[..eq].trim();
            let value = segment[eq + 1..].trim();
            if name.is_empty() || value.is_empty() {
                continue;
            }
            set.insert(name, percent_decode(value));
        }
        set
    }

    /// Exact textual inverse of `parse` for sets built from the
    /// allow-list: `parse(serialize(s)) == s`.
    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(name, value)| format!("{name}={}", percent_encode(value)))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Keeps only the allow-listed secret names. Everything else is
    /// discarded so it can never reach logs or the notification sink.
    pub fn restrict(&self, allowed: &[String]) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|(name, _)| allowed.iter().any(|a| *a == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl fmt::Display for CredentialSet {
    /// Never prints secret values.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}

/// One `username----password` account line per the check-in input
/// format. Blank lines and `#` comments are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
}

pub fn parse_accounts(raw: &str) -> Vec<Account> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (username, password) = line.split_once("----")?;
            let username = username.trim();
            let password = password.trim();
            if username.is_empty() || password.is_empty() {
                return None;
            }
            Some(Account {
                username: username.to_string(),
                password: password.to_string(),
            })
        })
        .collect()
}

/// Escapes the characters that would corrupt the delimited format plus
/// every non-ASCII byte, so encode/decode is an exact involution for
/// any value.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b';' | b'=' | b'%' | b' ' | b'\t' | b'\n' | b'\r' | 0x80..=0xFF => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
            _ => out.push(byte as char),
        }
    }
    out
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(byte) = u8::from_str_radix(&value[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_pair() {
        let set = CredentialSet::parse("session_id=abc;cf_clearance=xyz");
        assert_eq!(set.get("session_id"), Some("abc"));
        assert_eq!(set.get("cf_clearance"), Some("xyz"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn serialize_is_inverse_of_parse() {
        let set = CredentialSet::parse("session_id=abc;cf_clearance=xyz");
        assert_eq!(set.serialize(), "session_id=abc; cf_clearance=xyz");
        assert_eq!(CredentialSet::parse(&set.serialize()), set);
    }

    #[test]
    fn serialize_preserves_insertion_order() {
        let mut set = CredentialSet::default();
        set.insert("zzz", "1");
        set.insert("aaa", "2");
        assert_eq!(set.names(), vec!["zzz", "aaa"]);
        assert_eq!(set.serialize(), "zzz=1; aaa=2");
    }

    #[test]
    fn round_trip_survives_reserved_characters() {
        let mut set = CredentialSet::default();
        set.insert("session_id", "a=b;c d%e");
        set.insert("cf_clearance", "tok+en_-.~");
        assert_eq!(CredentialSet::parse(&set.serialize()), set);
    }

    #[test]
    fn round_trip_survives_non_ascii_values() {
        let mut set = CredentialSet::default();
        set.insert("session_id", "日abc");
        set.insert("cf_clearance", "café☃");
        let blob = set.serialize();
        assert!(blob.is_ascii());
        assert_eq!(CredentialSet::parse(&blob), set);
    }

    #[test]
    fn malformed_segments_are_skipped_not_fatal() {
        let set = CredentialSet::parse("no-equals; =novalue; name=; ;; good=1");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("good"), Some("1"));
        assert!(CredentialSet::parse("").is_empty());
        assert!(CredentialSet::parse(";;;").is_empty());
    }

    #[test]
    fn duplicates_resolve_last_write_wins() {
        let set = CredentialSet::parse("a=1; b=2; a=3");
        assert_eq!(set.get("a"), Some("3"));
        assert_eq!(set.len(), 2);
        // Overwrite keeps the name at its first-seen position.
        assert_eq!(set.names(), vec!["a", "b"]);
    }

    #[test]
    fn restrict_drops_unlisted_names() {
        let set = CredentialSet::parse("session_id=abc; tracking=junk; cf_clearance=xyz");
        let allowed = vec!["session_id".to_string(), "cf_clearance".to_string()];
        let kept = set.restrict(&allowed);
        assert_eq!(kept.len(), 2);
        assert!(kept.get("tracking").is_none());
    }

    #[test]
    fn display_never_shows_values() {
        let set = CredentialSet::parse("session_id=supersecret");
        let shown = set.to_string();
        assert!(shown.contains("session_id"));
        assert!(!shown.contains("supersecret"));
    }

    #[test]
    fn accounts_parse_with_comments_and_blanks() {
        let raw = "# fleet\nalice----pw1\n\nbob----pw2\nbroken-line\n";
        let accounts = parse_accounts(raw);
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].username, "alice");
        assert_eq!(accounts[1].password, "pw2");
    }
}
