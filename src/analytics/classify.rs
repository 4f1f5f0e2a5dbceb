/// Category for connectivity failures and timeouts.
pub const NETWORK_TIMEOUT: &str = "Network/Timeout";
/// Category for authentication and permission failures.
pub const AUTH: &str = "Auth";
/// Category for rejected input.
pub const VALIDATION: &str = "Validation";
/// Category for content storage failures.
pub const STORAGE: &str = "Storage";
/// Category for contract and chain interaction failures.
pub const CHAIN: &str = "Chain";
/// Category for database failures.
pub const DATABASE: &str = "Database";
/// Fallback category.
pub const OTHER: &str = "Other";

/// Maps a failure message to an error category.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &str) -> String;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn classify(&self, error: &str) -> String {
        self(error)
    }
}

/// A category assigned when the message contains any of the keywords.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    keywords: Vec<String>,
    category: String,
}

impl KeywordRule {
    pub fn new(keywords: &[&str], category: impl Into<String>) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            category: category.into(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

/// Case-insensitive substring classifier. Rules are tried in order and the
/// first match wins; unmatched messages fall back to [`OTHER`].
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(&["network", "timeout"], NETWORK_TIMEOUT),
            KeywordRule::new(&["auth", "permission"], AUTH),
            KeywordRule::new(&["validation", "invalid"], VALIDATION),
            KeywordRule::new(&["storage", "ipfs"], STORAGE),
            KeywordRule::new(&["contract", "blockchain"], CHAIN),
            KeywordRule::new(&["database", "sql"], DATABASE),
        ])
    }
}

impl ErrorClassifier for KeywordClassifier {
    fn classify(&self, error: &str) -> String {
        let lowered = error.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map_or_else(|| OTHER.to_string(), |rule| rule.category.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let c = KeywordClassifier::default();
        let cases = [
            ("Network timeout", NETWORK_TIMEOUT),
            ("request TIMEOUT after 30s", NETWORK_TIMEOUT),
            ("Unauthorized: missing token", AUTH),
            ("permission denied", AUTH),
            ("Invalid payload", VALIDATION),
            ("schema validation failed", VALIDATION),
            ("IPFS pin failed", STORAGE),
            ("storage quota exceeded", STORAGE),
            ("contract reverted", CHAIN),
            ("blockchain unavailable", CHAIN),
            ("SQL syntax error", DATABASE),
            ("database locked", DATABASE),
            ("something odd", OTHER),
        ];

        for (msg, want) in cases {
            assert_eq!(c.classify(msg), want, "message {msg:?}");
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let c = KeywordClassifier::default();
        assert_eq!(c.classify("network auth failure"), NETWORK_TIMEOUT);
        assert_eq!(c.classify("invalid contract call"), VALIDATION);
        assert_eq!(c.classify("ipfs database"), STORAGE);
    }

    #[test]
    fn test_custom_rules_fall_back_to_other() {
        let c = KeywordClassifier::new(vec![KeywordRule::new(&["RATE limit"], "Throttled")]);
        assert_eq!(c.classify("rate LIMIT exceeded"), "Throttled");
        assert_eq!(c.classify("network down"), OTHER);
    }

    #[test]
    fn test_closure_classifier() {
        let c = |e: &str| {
            if e.starts_with("E42") {
                "Known".to_string()
            } else {
                OTHER.to_string()
            }
        };
        assert_eq!(ErrorClassifier::classify(&c, "E42: boom"), "Known");
        assert_eq!(ErrorClassifier::classify(&c, "boom"), OTHER);
    }
}
