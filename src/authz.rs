//! Static authorization table: (identity, upstream address) -> allow/deny.

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct AuthzRule {
    pub is_allowed: bool,
    pub common_name: String,
    pub upstream_addr: String,
}

/// Rule set parsed once at startup; immutable thereafter. Rule order is
/// preserved from configuration — `allows` is first-match-wins.
#[derive(Debug, Clone, Default)]
pub struct AuthzScheme {
    rules: Vec<AuthzRule>,
}

impl AuthzScheme {
    /// Parse rule strings of shape `<name>-allow|deny-<host:port>`, each part
    /// trimmed of surrounding whitespace. Any other shape is a fatal
    /// configuration error.
    pub fn new(rule_strings: &[String]) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(rule_strings.len());

        for rule in rule_strings {
            let parts: Vec<&str> = rule.split('-').collect();
            if parts.len() != 3 {
                return Err(ConfigError::BadAuthzRule(rule.clone()));
            }

            let common_name = parts[0].trim().to_string();
            let verb = parts[1].trim();
            let upstream_addr = parts[2].trim().to_string();

            let is_allowed = match verb {
                "allow" => true,
                "deny" => false,
                _ => return Err(ConfigError::BadAuthzVerb(verb.to_string())),
            };

            rules.push(AuthzRule {
                is_allowed,
                common_name,
                upstream_addr,
            });
        }

        Ok(AuthzScheme { rules })
    }

    /// Default allow on no match — matches the source's explicit behavior.
    pub fn allows(&self, identity: &str, upstream_addr: &str) -> bool {
        for rule in &self.rules {
            if rule.common_name == identity && rule.upstream_addr == upstream_addr {
                return rule.is_allowed;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_allow_and_deny() {
        let rules = vec![
            "client.a-allow-127.0.0.1:8000".to_string(),
            "client.b-deny-127.0.0.1:8000".to_string(),
        ];
        let scheme = AuthzScheme::new(&rules).unwrap();
        assert!(scheme.allows("client.a", "127.0.0.1:8000"));
        assert!(!scheme.allows("client.b", "127.0.0.1:8000"));
    }

    #[test]
    fn empty_ruleset_allows_everyone() {
        let scheme = AuthzScheme::new(&[]).unwrap();
        assert!(scheme.allows("client.a", "127.0.0.1:8000"));
        assert!(scheme.allows("client.b", "127.0.0.1:8000"));
    }

    #[test]
    fn no_match_defaults_to_allow() {
        let rules = vec![
            "client.a-allow-127.0.0.1:8000".to_string(),
            "client.b-deny-127.0.0.1:8000".to_string(),
        ];
        let scheme = AuthzScheme::new(&rules).unwrap();
        assert!(scheme.allows("client.c", "127.0.0.1:8000"));
    }

    #[test]
    fn first_match_wins_on_conflicting_rules() {
        let rules = vec![
            "client.a-allow-127.0.0.1:8000".to_string(),
            "client.a-deny-127.0.0.1:8000".to_string(),
        ];
        let scheme = AuthzScheme::new(&rules).unwrap();
        assert!(scheme.allows("client.a", "127.0.0.1:8000"));
    }

    #[test]
    fn bad_shape_is_a_fatal_config_error() {
        let rules = vec!["not-enough-parts-here".to_string()];
        assert!(AuthzScheme::new(&rules).is_err());
    }

    #[test]
    fn bad_verb_is_a_fatal_config_error() {
        let rules = vec!["client.a-maybe-127.0.0.1:8000".to_string()];
        assert!(AuthzScheme::new(&rules).is_err());
    }
}
