//! Client-side suppression of change events.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Error, Result};

/// Which kind of change a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreKind {
    /// Deleted documents.
    Delete,
    /// Documents that still exist after the change.
    Update,
    /// Any change.
    All,
}

impl IgnoreKind {
    fn as_str(&self) -> &'static str {
        match self {
            IgnoreKind::Delete => "delete",
            IgnoreKind::Update => "update",
            IgnoreKind::All => "all",
        }
    }

    fn matches(&self, deleted: bool) -> bool {
        match self {
            IgnoreKind::Delete => deleted,
            IgnoreKind::Update => !deleted,
            IgnoreKind::All => true,
        }
    }
}

/// A rule such as `delete`, `update:doc-1` or `all:doc-2`.
///
/// Rules with an id target one document and are consumed by the first change
/// they suppress (unless consumption is disabled). Blanket rules stay until
/// reverted or cleared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IgnoreRule {
    pub kind: IgnoreKind,
    pub id: Option<String>,
}

impl IgnoreRule {
    pub fn deletes() -> Self {
        Self { kind: IgnoreKind::Delete, id: None }
    }

    pub fn updates() -> Self {
        Self { kind: IgnoreKind::Update, id: None }
    }

    pub fn all() -> Self {
        Self { kind: IgnoreKind::All, id: None }
    }

    pub fn delete_of(id: impl Into<String>) -> Self {
        Self { kind: IgnoreKind::Delete, id: Some(id.into()) }
    }

    pub fn update_of(id: impl Into<String>) -> Self {
        Self { kind: IgnoreKind::Update, id: Some(id.into()) }
    }

    pub fn all_of(id: impl Into<String>) -> Self {
        Self { kind: IgnoreKind::All, id: Some(id.into()) }
    }
}

impl fmt::Display for IgnoreRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind.as_str(), id),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

impl FromStr for IgnoreRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (kind, Some(id)),
            None => (s, None),
        };

        let kind = match kind {
            "delete" => IgnoreKind::Delete,
            "update" => IgnoreKind::Update,
            "all" => IgnoreKind::All,
            other => {
                return Err(Error::invalid_argument(format!(
                    "unknown ignore rule '{}', expected delete, update or all",
                    other
                )));
            }
        };

        match id {
            Some("") => Err(Error::invalid_argument(format!("ignore rule '{}' has an empty id", s))),
            id => Ok(Self { kind, id: id.map(str::to_string) }),
        }
    }
}

/// Counters and rules deciding which changes reach the handler.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    skip_next: u64,
    rules: Vec<IgnoreRule>,
    consume: bool,
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self {
            skip_next: 0,
            rules: Vec::new(),
            consume: true,
        }
    }
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the next `n` non-empty lines, whatever they contain.
    pub fn ignore_next(&mut self, n: u64) {
        self.skip_next = self.skip_next.saturating_add(n.max(1));
    }

    pub fn revert_ignore_next(&mut self, n: u64) {
        self.skip_next = self.skip_next.saturating_sub(n.max(1));
    }

    pub fn pending_skips(&self) -> u64 {
        self.skip_next
    }

    pub fn ignore(&mut self, rule: IgnoreRule) {
        self.rules.push(rule);
    }

    /// Remove one occurrence of `rule`. Returns whether it was present.
    pub fn revert_ignore(&mut self, rule: &IgnoreRule) -> bool {
        match self.rules.iter().position(|r| r == rule) {
            Some(index) => {
                self.rules.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// Whether id-specific rules are removed once they suppress a change.
    pub fn consume_rules(&mut self, consume: bool) {
        self.consume = consume;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Take one pending skip, if any.
    pub(crate) fn take_skip(&mut self) -> bool {
        if self.skip_next == 0 {
            return false;
        }
        self.skip_next -= 1;
        true
    }

    /// Decide whether `change` is suppressed, consuming matched id rules.
    pub fn suppresses(&mut self, change: &Value) -> bool {
        let (id, deleted) = document_identity(change);

        let mut suppressed = false;
        if let Some(id) = id {
            for kind in [IgnoreKind::Delete, IgnoreKind::Update, IgnoreKind::All] {
                if !kind.matches(deleted) {
                    continue;
                }
                let found = self
                    .rules
                    .iter()
                    .position(|r| r.kind == kind && r.id.as_deref() == Some(id));
                if let Some(index) = found {
                    suppressed = true;
                    if self.consume {
                        self.rules.remove(index);
                    }
                }
            }
        }

        suppressed
            || self
                .rules
                .iter()
                .any(|r| r.id.is_none() && r.kind.matches(deleted))
    }

    pub fn is_empty(&self) -> bool {
        self.skip_next == 0 && self.rules.is_empty()
    }
}

/// Document id and deletion flag of a change row. Prefers the embedded
/// document (`include_docs=true`) and falls back to the row itself.
fn document_identity(change: &Value) -> (Option<&str>, bool) {
    let doc = change.get("doc");

    let id = doc
        .and_then(|d| d.get("_id"))
        .and_then(Value::as_str)
        .or_else(|| change.get("id").and_then(Value::as_str));

    let deleted = doc
        .and_then(|d| d.get("_deleted"))
        .and_then(Value::as_bool)
        .or_else(|| change.get("deleted").and_then(Value::as_bool))
        .unwrap_or(false);

    (id, deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_parsing() {
        assert_eq!("delete".parse::<IgnoreRule>().unwrap(), IgnoreRule::deletes());
        assert_eq!("update:a".parse::<IgnoreRule>().unwrap(), IgnoreRule::update_of("a"));
        assert_eq!(
            "all:ns:doc".parse::<IgnoreRule>().unwrap(),
            IgnoreRule::all_of("ns:doc")
        );
        assert!("remove:a".parse::<IgnoreRule>().is_err());
        assert!("all:".parse::<IgnoreRule>().is_err());
        assert_eq!(IgnoreRule::delete_of("x").to_string(), "delete:x");
    }

    #[test]
    fn test_ignore_next_counters() {
        let mut filter = ChangeFilter::new();
        filter.ignore_next(0);
        assert_eq!(filter.pending_skips(), 1);
        filter.ignore_next(3);
        filter.revert_ignore_next(10);
        assert_eq!(filter.pending_skips(), 0);

        filter.ignore_next(2);
        assert!(filter.take_skip());
        assert!(filter.take_skip());
        assert!(!filter.take_skip());
    }

    #[test]
    fn test_id_rules_are_consumed() {
        let mut filter = ChangeFilter::new();
        filter.ignore(IgnoreRule::update_of("a"));

        let change = json!({"seq": "1", "id": "a", "changes": []});
        assert!(filter.suppresses(&change));
        assert!(!filter.suppresses(&change));
        assert!(filter.rules().is_empty());
    }

    #[test]
    fn test_consumption_can_be_disabled() {
        let mut filter = ChangeFilter::new();
        filter.consume_rules(false);
        filter.ignore(IgnoreRule::all_of("a"));

        let change = json!({"id": "a"});
        assert!(filter.suppresses(&change));
        assert!(filter.suppresses(&change));
    }

    #[test]
    fn test_blanket_rules_persist() {
        let mut filter = ChangeFilter::new();
        filter.ignore(IgnoreRule::deletes());

        let deleted = json!({"id": "a", "deleted": true});
        let updated = json!({"id": "a"});
        assert!(filter.suppresses(&deleted));
        assert!(filter.suppresses(&deleted));
        assert!(!filter.suppresses(&updated));
        assert_eq!(filter.rules().len(), 1);
    }

    #[test]
    fn test_delete_rule_ignores_updates_of_same_doc() {
        let mut filter = ChangeFilter::new();
        filter.ignore(IgnoreRule::delete_of("a"));

        assert!(!filter.suppresses(&json!({"id": "a"})));
        assert_eq!(filter.rules().len(), 1);
        assert!(filter.suppresses(&json!({"id": "a", "deleted": true})));
        assert!(filter.rules().is_empty());
    }

    #[test]
    fn test_embedded_doc_takes_precedence() {
        let mut filter = ChangeFilter::new();
        filter.ignore(IgnoreRule::delete_of("inner"));

        let change = json!({"id": "outer", "doc": {"_id": "inner", "_deleted": true}});
        assert!(filter.suppresses(&change));
    }

    #[test]
    fn test_revert_and_clear() {
        let mut filter = ChangeFilter::new();
        filter.ignore(IgnoreRule::all());
        filter.ignore_next(2);
        filter.consume_rules(false);

        assert!(filter.revert_ignore(&IgnoreRule::all()));
        assert!(!filter.revert_ignore(&IgnoreRule::all()));

        filter.clear();
        assert!(filter.is_empty());
        filter.ignore(IgnoreRule::update_of("a"));
        assert!(filter.suppresses(&json!({"id": "a"})));
        assert!(filter.rules().is_empty());
    }
}
