//! NATS-style subject utilities
//!
//! Subjects are dot-separated tokens. In a pattern:
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens and must be the last token

/// Join a subject prefix and a suffix with a `.` separator
pub fn join_subject(prefix: &str, suffix: &str) -> String {
    format!("{}.{}", prefix, suffix)
}

/// Check whether `subject` matches `pattern`
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(token)) => return !token.is_empty(),
            (Some("*"), Some(token)) if !token.is_empty() => continue,
            (Some(p), Some(s)) if p == s && !s.is_empty() => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Check whether a subject is a valid literal subject to publish on
pub fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split('.')
            .all(|token| !token.is_empty() && token != "*" && token != ">" && !token.contains(' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(subject_matches("health.api", "health.api"));
        assert!(!subject_matches("health.api", "health.other"));
        assert!(!subject_matches("health.api", "health.api.extra"));
        assert!(!subject_matches("health.api.extra", "health.api"));
    }

    #[test]
    fn test_single_token_wildcard() {
        assert!(subject_matches("health.*", "health.api"));
        assert!(!subject_matches("health.*", "health.status.api"));
        assert!(subject_matches("*.status.*", "health.status.api"));
    }

    #[test]
    fn test_tail_wildcard() {
        assert!(subject_matches("get.api.>", "get.api.user"));
        assert!(subject_matches("get.api.>", "get.api.user.42"));
        assert!(!subject_matches("get.api.>", "get.api"));
        assert!(!subject_matches("get.api.>", "call.api.user"));
    }

    #[test]
    fn test_join_subject() {
        assert_eq!(join_subject("health", "api"), "health.api");
        assert_eq!(join_subject("health.status", "api"), "health.status.api");
    }

    #[test]
    fn test_valid_subject() {
        assert!(is_valid_subject("health.status.api"));
        assert!(!is_valid_subject(""));
        assert!(!is_valid_subject("health..api"));
        assert!(!is_valid_subject("health.*"));
    }
}
