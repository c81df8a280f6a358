use noderoute_common::{ConfigError, RoutingRule, ServiceNode};
use regex::Regex;

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Regex,
    targets: Vec<String>,
}

/// Operation-name routing rules, evaluated in declaration order.
///
/// Rules restrict *where* an operation may go; they say nothing about whether
/// those nodes are currently usable. Availability filtering happens later.
#[derive(Debug, Clone, Default)]
pub struct RoutingRuleEngine {
    rules: Vec<CompiledRule>,
}

impl RoutingRuleEngine {
    /// Compiles every pattern up front.
    pub fn new(rules: &[RoutingRule]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern =
                    Regex::new(&rule.pattern).map_err(|source| ConfigError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })?;
                Ok(CompiledRule {
                    pattern,
                    targets: rule.targets.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Targets of the first rule matching `operation`, if any.
    pub fn matching_rule(&self, operation: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(operation))
            .map(|rule| rule.targets.as_slice())
    }

    /// Narrows `nodes` to the first matching rule's targets, keeping their
    /// order. Without a match every node is a candidate.
    pub fn resolve_candidates(&self, operation: &str, nodes: Vec<ServiceNode>) -> Vec<ServiceNode> {
        match self.matching_rule(operation) {
            Some(targets) => nodes
                .into_iter()
                .filter(|node| targets.iter().any(|t| *t == node.id))
                .collect(),
            None => nodes,
        }
    }
}
