use crate::config::types::{GroupKind, MoonConfig, ProxyGroup, ProxyNode, Rule};
use crate::error::{MoonError, MoonResult};
use crate::utils::validation::{require_non_blank, validate_port_range};
use std::collections::HashSet;

impl ProxyNode {
    pub fn validate(&self) -> MoonResult<()> {
        require_non_blank("Proxy host", &self.host).map_err(MoonError::Validation)?;
        require_non_blank("Proxy scheme", &self.scheme).map_err(MoonError::Validation)?;
        validate_port_range(self.port).map_err(MoonError::Validation)?;
        Ok(())
    }
}

impl Rule {
    pub fn validate(&self) -> MoonResult<()> {
        require_non_blank("Rule process", &self.process).map_err(MoonError::Validation)?;
        require_non_blank("Rule action", &self.action).map_err(MoonError::Validation)?;
        // Commas would split the rendered rule line
        if self.process.contains(',') || self.action.contains(',') {
            return Err(MoonError::Validation(format!("Rule must not contain ',': {},{}", self.process, self.action)));
        }
        Ok(())
    }
}

impl ProxyGroup {
    pub fn validate(&self) -> MoonResult<()> {
        require_non_blank("Group uid", &self.uid).map_err(MoonError::Validation)?;
        if let GroupKind::Subscription { url } = &self.kind {
            require_non_blank("Subscription url", url).map_err(MoonError::Validation)?;
        }
        let mut seen = HashSet::new();
        for node in &self.proxy_list {
            node.validate()?;
            if !seen.insert(node.uid.as_str()) {
                return Err(MoonError::Validation(format!("Duplicate proxy uid in group {}: {}", self.uid, node.uid)));
            }
        }
        Ok(())
    }
}

impl MoonConfig {
    /// Check the uniqueness invariants of a whole snapshot.
    pub fn validate(&self) -> MoonResult<()> {
        let mut groups = HashSet::new();
        for group in &self.proxy_group_list {
            group.validate()?;
            if !groups.insert(group.uid.as_str()) {
                return Err(MoonError::Validation(format!("Duplicate group uid: {}", group.uid)));
            }
        }
        let mut rules = HashSet::new();
        for rule in &self.rule_list {
            if !rules.insert(rule.uid.as_str()) {
                return Err(MoonError::Validation(format!("Duplicate rule uid: {}", rule.uid)));
            }
        }
        Ok(())
    }

    /// Validate a rule about to be saved. At most one catch-all rule may exist.
    pub fn validate_rule_insert(&self, rule: &Rule) -> MoonResult<()> {
        rule.validate()?;
        if rule.is_catch_all() {
            if let Some(existing) = self.catch_all_rule().filter(|existing| existing.uid != rule.uid) {
                return Err(MoonError::Validation(format!("A catch-all rule already exists: {}", existing.uid)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::types::{MoonConfig, ProxyGroup, ProxyNode, Rule};
    use crate::error::MoonError;

    fn node(uid: &str) -> ProxyNode {
        ProxyNode { uid: uid.to_string(), group_uid: "0".to_string(), scheme: "http".to_string(), host: "proxy.local".to_string(), port: 3128, username: None, password: None }
    }

    #[test]
    fn test_node_validation() {
        assert!(node("a").validate().is_ok());

        let mut bad = node("a");
        bad.port = 0;
        assert!(matches!(bad.validate(), Err(MoonError::Validation(_))));

        let mut bad = node("a");
        bad.host = "  ".to_string();
        assert!(bad.validate().unwrap_err().to_string().contains("host"));

        let mut bad = node("a");
        bad.scheme = String::new();
        assert!(bad.validate().unwrap_err().to_string().contains("scheme"));
    }

    #[test]
    fn test_rule_validation() {
        assert!(Rule::new("curl", "proxy-a").validate().is_ok());
        assert!(Rule::new("", "proxy-a").validate().is_err());
        assert!(Rule::new("curl", " ").validate().is_err());
        assert!(Rule::new("a,b", "proxy-a").validate().is_err());
    }

    #[test]
    fn test_group_validation() {
        let group = ProxyGroup::local("0", "Local", vec![node("a"), node("b")]);
        assert!(group.validate().is_ok());

        let dup = ProxyGroup::local("0", "Local", vec![node("a"), node("a")]);
        assert!(dup.validate().unwrap_err().to_string().contains("Duplicate proxy uid"));

        let no_url = ProxyGroup::subscription("s1", "Sub", " ");
        assert!(no_url.validate().is_err());

        let no_uid = ProxyGroup::local("", "Local", vec![]);
        assert!(no_uid.validate().is_err());
    }

    #[test]
    fn test_config_validation_duplicate_groups() {
        let config = MoonConfig {
            proxy_group_list: vec![ProxyGroup::local("0", "A", vec![]), ProxyGroup::local("0", "B", vec![])],
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("Duplicate group uid"));
    }

    #[test]
    fn test_second_catch_all_rejected() {
        let mut config = MoonConfig::default();
        let first = Rule::new("MATCH", "DIRECT");
        config.upsert_rule(first.clone());

        // Updating the same catch-all is fine
        let mut updated = first.clone();
        updated.action = "proxy-a".to_string();
        assert!(config.validate_rule_insert(&updated).is_ok());

        let second = Rule::new("MATCH", "REJECT");
        assert!(matches!(config.validate_rule_insert(&second), Err(MoonError::Validation(_))));

        assert!(config.validate_rule_insert(&Rule::new("curl", "DIRECT")).is_ok());
    }
}
