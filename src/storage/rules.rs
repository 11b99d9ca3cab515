use super::Database;
use crate::error::VStoreResult;
use crate::rules::VStoreRule;
use serde_json::Value;
use tracing::warn;

impl Database {
    /// Insert or replace a rule
    pub fn insert_rule(&self, rule: &VStoreRule) -> VStoreResult<()> {
        let bytes = serde_json::to_vec(&rule.to_value())?;
        self.rules.insert(rule.uuid.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_rule(&self, uuid: &str) -> VStoreResult<Option<VStoreRule>> {
        match self.rules.get(uuid.as_bytes())? {
            Some(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)?;
                Ok(Some(VStoreRule::from_value(&value)?))
            }
            None => Ok(None),
        }
    }

    /// All stored rules. Rows that no longer parse are skipped.
    pub fn rules(&self) -> VStoreResult<Vec<VStoreRule>> {
        let mut rules = Vec::with_capacity(self.rules.len());
        for entry in self.rules.iter() {
            let (_, bytes) = entry?;
            let parsed = serde_json::from_slice::<Value>(&bytes)
                .map_err(crate::error::VStoreError::from)
                .and_then(|v| VStoreRule::from_value(&v));
            match parsed {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(error = %e, "Skipping unreadable stored rule"),
            }
        }
        Ok(rules)
    }

    pub fn delete_rule(&self, uuid: &str) -> VStoreResult<bool> {
        Ok(self.rules.remove(uuid.as_bytes())?.is_some())
    }

    pub fn clear_rules(&self) -> VStoreResult<()> {
        self.rules.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_crud() {
        let db = Database::temporary().unwrap();
        let mut rule = VStoreRule::new("pictures");
        rule.mime_types = vec!["image/jpeg".to_string()];
        db.insert_rule(&rule).unwrap();

        let loaded = db.get_rule(&rule.uuid).unwrap().unwrap();
        assert_eq!(loaded.name, "pictures");
        assert_eq!(loaded.mime_types, rule.mime_types);
        assert_eq!(db.rules().unwrap().len(), 1);

        assert!(db.delete_rule(&rule.uuid).unwrap());
        assert!(db.get_rule(&rule.uuid).unwrap().is_none());

        db.insert_rule(&rule).unwrap();
        db.clear_rules().unwrap();
        assert!(db.rules().unwrap().is_empty());
    }
}
