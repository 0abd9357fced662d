//! Admission and caller classification rules.

use regex::{Regex, RegexBuilder};

/// Identity prefix that marks a privileged caller.
pub const PRIVILEGED_PREFIX: &str = "special";

/// Optional authorization rule over caller identities.
///
/// The rule must match the whole identity, case-insensitively. Without a rule
/// every caller is admitted.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationPolicy {
    rule: Option<Regex>,
}

impl AuthorizationPolicy {
    /// Admit everyone.
    #[must_use]
    pub fn allow_all() -> Self {
        Self { rule: None }
    }

    /// Compile a rule. The pattern is trimmed; an empty pattern means no rule.
    ///
    /// # Errors
    ///
    /// Returns the regex error if the pattern does not compile.
    pub fn from_pattern(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Ok(Self::allow_all());
        }

        let rule = RegexBuilder::new(&format!("^(?:{pattern})$"))
            .case_insensitive(true)
            .build()?;

        Ok(Self { rule: Some(rule) })
    }

    /// Whether a rule is configured.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        self.rule.is_some()
    }

    /// Whether `identity` is admitted.
    #[must_use]
    pub fn admits(&self, identity: &str) -> bool {
        self.rule.as_ref().map_or(true, |rule| rule.is_match(identity))
    }
}

/// Scheduling class of a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerClass {
    /// Always placed on the least-loaded node.
    Privileged,
    /// Placed round-robin, overflowing to the least-loaded node.
    Standard,
}

impl CallerClass {
    /// Classify by the case-insensitive [`PRIVILEGED_PREFIX`].
    #[must_use]
    pub fn classify(identity: &str) -> Self {
        let privileged = identity
            .get(..PRIVILEGED_PREFIX.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(PRIVILEGED_PREFIX));

        if privileged {
            CallerClass::Privileged
        } else {
            CallerClass::Standard
        }
    }

    /// Metric label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerClass::Privileged => "privileged",
            CallerClass::Standard => "standard",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rule_admits_everyone() {
        let policy = AuthorizationPolicy::allow_all();
        assert!(!policy.is_restricted());
        assert!(policy.admits("bob"));
        assert!(policy.admits(""));
    }

    #[test]
    fn test_blank_pattern_is_no_rule() {
        let policy = AuthorizationPolicy::from_pattern("   ").unwrap();
        assert!(!policy.is_restricted());
        assert!(policy.admits("anyone"));
    }

    #[test]
    fn test_rule_requires_full_match() {
        let policy = AuthorizationPolicy::from_pattern("^special.*").unwrap();
        assert!(policy.admits("specialAlice"));
        assert!(!policy.admits("bob"));

        let policy = AuthorizationPolicy::from_pattern("alice").unwrap();
        assert!(policy.admits("alice"));
        assert!(!policy.admits("alice2"));
        assert!(!policy.admits("malice"));
    }

    #[test]
    fn test_rule_is_case_insensitive() {
        let policy = AuthorizationPolicy::from_pattern(" special.* ").unwrap();
        assert!(policy.admits("SPECIALbob"));
        assert!(policy.admits("Special-Ünïcode"));
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let policy = AuthorizationPolicy::from_pattern("alice|bob").unwrap();
        assert!(policy.admits("bob"));
        assert!(!policy.admits("bobby"));
        assert!(!policy.admits("xalice"));
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(AuthorizationPolicy::from_pattern("special(").is_err());
    }

    #[test]
    fn test_classify() {
        assert_eq!(CallerClass::classify("specialAlice"), CallerClass::Privileged);
        assert_eq!(CallerClass::classify("SPECIAL"), CallerClass::Privileged);
        assert_eq!(CallerClass::classify("SpEcIaL-1"), CallerClass::Privileged);
        assert_eq!(CallerClass::classify("bob"), CallerClass::Standard);
        assert_eq!(CallerClass::classify("spec"), CallerClass::Standard);
        assert_eq!(CallerClass::classify("notspecial"), CallerClass::Standard);
        assert_eq!(CallerClass::classify(""), CallerClass::Standard);
    }

    #[test]
    fn test_classify_multibyte_identity_does_not_panic() {
        assert_eq!(CallerClass::classify("ñññññññ"), CallerClass::Standard);
    }
}
