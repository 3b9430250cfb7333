use crate::rules::model::{Rule, RuleSet};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Load every `.yaml`/`.yml` rule file under `path`.
///
/// A file holds either a rule set or a single rule. Files that parse as
/// neither are skipped with a warning.
pub fn load_rules_from_dir<P: AsRef<Path>>(path: P) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file: {:?}", path))?;

        // 先尝试规则集，再尝试单条规则
        if let Ok(rule_set) = serde_yaml::from_str::<RuleSet>(&content) {
            debug!(
                file = ?path,
                set = %rule_set.name,
                rules = rule_set.rules.len(),
                "loaded rule set"
            );
            rules.extend(rule_set.rules);
        } else {
            match serde_yaml::from_str::<Rule>(&content) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(file = ?path, error = %e, "Failed to parse rule file"),
            }
        }
    }

    Ok(rules)
}
