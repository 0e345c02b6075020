//! Input shape checks for proof links.

/// Longest proof text accepted.
pub const MAX_LINK_LEN: usize = 2048;

const DOMAIN_HINTS: &[&str] = &[".com", ".in", ".org", ".net", ".co", ".io", ".me", ".app"];

fn is_alnum(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn has_scheme(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.") {
        return true;
    }
    match s.split_once("://") {
        Some((scheme, _)) => is_alnum(scheme),
        None => false,
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".-".contains(c));
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());
    local_ok && host_ok && tld_ok
}

fn is_referral_code(s: &str) -> bool {
    // bare short code
    if s.len() >= 8 && is_alnum(s) {
        return true;
    }
    if let Some((key, value)) = s.split_once('=') {
        if is_alnum(key) && is_alnum(value) {
            return true;
        }
    }
    if let Some((head, tail)) = s.split_once('/') {
        let head_lower = head.to_ascii_lowercase();
        if (head_lower == "ref" || head_lower == "invite") && is_alnum(tail) {
            return true;
        }
        if head.len() >= 5 && tail.len() >= 5 && is_alnum(head) && is_alnum(tail) {
            return true;
        }
    }
    false
}

/// Whether `text` looks like a referral link or referral token.
///
/// Accepts URLs (any `scheme://`, or `www.`), bare codes of 8+ alphanumerics,
/// e-mail shaped tokens, `key=value`, `ref/CODE`, `invite/CODE`,
/// `CODE1/CODE2`, and anything mentioning a common domain suffix.
pub fn is_valid_link(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.len() > MAX_LINK_LEN {
        return false;
    }
    if has_scheme(text) || is_email(text) || is_referral_code(text) {
        return true;
    }
    let lower = text.to_ascii_lowercase();
    DOMAIN_HINTS.iter().any(|hint| lower.contains(hint))
}
