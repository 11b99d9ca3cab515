//! Rule persistence

use super::rule::VStoreRule;
use crate::error::{VStoreError, VStoreResult};
use crate::storage::Database;
use tracing::debug;

pub struct RuleManager {
    db: Database,
}

impl RuleManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert the rule or replace the rule with the same uuid
    pub fn store_rule(&self, rule: &VStoreRule) -> VStoreResult<()> {
        if rule.uuid.is_empty() {
            return Err(VStoreError::missing_parameters());
        }
        self.db.insert_rule(rule)?;
        debug!(rule_id = %rule.uuid, score = rule.detail_score(), "Rule stored");
        Ok(())
    }

    /// Replace an existing rule. Returns false when no rule has this uuid.
    pub fn update_rule(&self, rule: &VStoreRule) -> VStoreResult<bool> {
        if self.db.get_rule(&rule.uuid)?.is_none() {
            return Ok(false);
        }
        self.store_rule(rule)?;
        Ok(true)
    }

    pub fn delete_rule(&self, uuid: &str) -> VStoreResult<bool> {
        if uuid.is_empty() {
            return Err(VStoreError::missing_parameters());
        }
        self.db.delete_rule(uuid)
    }

    pub fn clear_rules(&self) -> VStoreResult<()> {
        self.db.clear_rules()
    }

    pub fn get_rule(&self, uuid: &str) -> VStoreResult<Option<VStoreRule>> {
        self.db.get_rule(uuid)
    }

    /// All rules, newest first
    pub fn rules(&self) -> VStoreResult<Vec<VStoreRule>> {
        let mut rules = self.db.rules()?;
        rules.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
        Ok(rules)
    }

    /// Rules without mime types plus those listing `mime_type`
    pub fn rules_matching_file_type(&self, mime_type: &str) -> VStoreResult<Vec<VStoreRule>> {
        Ok(self
            .rules()?
            .into_iter()
            .filter(|r| r.matches_mime_type(mime_type))
            .collect())
    }
}
