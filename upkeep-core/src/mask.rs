//! Display-name masking applied before anything reaches a log line or
//! the notification sink.

/// Keeps the first and last two characters of a secret-ish string.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

/// Username-style masking: keeps a short prefix and suffix scaled to
/// the name length.
pub fn mask_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= 2 {
        return "***".to_string();
    }
    if chars.len() <= 4 {
        let mut out = String::new();
        out.push(chars[0]);
        out.extend(std::iter::repeat('*').take(chars.len() - 1));
        return out;
    }
    let show = (chars.len() / 3).min(2).max(1);
    let mut out = String::new();
    out.extend(chars[..show].iter());
    out.extend(std::iter::repeat('*').take(chars.len() - show * 2));
    out.extend(chars[chars.len() - show..].iter());
    out
}

/// Opaque-identifier masking: first and last character only.
pub fn mask_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 2 {
        return id.to_string();
    }
    let mut out = String::new();
    out.push(chars[0]);
    out.extend(std::iter::repeat('*').take(chars.len() - 2));
    out.push(chars[chars.len() - 1]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_masking() {
        assert_eq!(mask_secret("ab"), "****");
        assert_eq!(mask_secret("abcdefgh"), "ab***gh");
    }

    #[test]
    fn name_masking() {
        assert_eq!(mask_name("al"), "***");
        assert_eq!(mask_name("bob"), "b**");
        assert_eq!(mask_name("alexander"), "al*****er");
        assert!(!mask_name("alexander").contains("exand"));
    }

    #[test]
    fn id_masking() {
        assert_eq!(mask_id("ab"), "ab");
        assert_eq!(mask_id("srv42x"), "s****x");
    }
}
