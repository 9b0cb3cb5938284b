//! Business rules and workflow plan templates.
//!
//! Rules are grouped by category and cached with a refresh stamp; a category whose
//! stamp is older than the requested max age is passed through the configured
//! [`RuleSource`] before being returned. Workflow patterns are read-mostly templates
//! seeded at startup.

pub mod seed;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::is_stale;
use crate::domain::decision::Objective;
use crate::domain::rule::{BusinessRule, WorkflowPattern};
use crate::store::{InMemoryStore, KeyValueStore};

pub const DEFAULT_RULE_MAX_AGE_SECS: i64 = 3600;

/// Rules of one category plus the time they were last refreshed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleCategory {
    pub rules: Vec<BusinessRule>,
    pub refreshed_at: DateTime<Utc>,
}

/// Extension point for pulling fresher rules from an external system.
pub trait RuleSource: Send + Sync {
    fn refresh(
        &self,
        category: &str,
        current: Vec<BusinessRule>,
        now: DateTime<Utc>,
    ) -> Vec<BusinessRule>;
}

/// Keeps the current rules and only re-stamps `last_updated`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RestampRuleSource;

impl RuleSource for RestampRuleSource {
    fn refresh(
        &self,
        _category: &str,
        current: Vec<BusinessRule>,
        now: DateTime<Utc>,
    ) -> Vec<BusinessRule> {
        current.into_iter().map(|rule| BusinessRule { last_updated: now, ..rule }).collect()
    }
}

/// What the caller is trying to do; used to pick medium/low rules worth surfacing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleQuery {
    pub objective: Objective,
    pub message: String,
}

impl RuleQuery {
    pub fn new(objective: Objective, message: impl Into<String>) -> Self {
        Self { objective, message: message.into() }
    }
}

pub struct RuleStore {
    rules: Arc<dyn KeyValueStore<String, RuleCategory>>,
    patterns: Arc<dyn KeyValueStore<String, WorkflowPattern>>,
    source: Arc<dyn RuleSource>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(RestampRuleSource),
        )
    }
}

impl RuleStore {
    pub fn new(
        rules: Arc<dyn KeyValueStore<String, RuleCategory>>,
        patterns: Arc<dyn KeyValueStore<String, WorkflowPattern>>,
        source: Arc<dyn RuleSource>,
    ) -> Self {
        Self { rules, patterns, source }
    }

    /// In-memory store pre-loaded with the default rule catalogue and patterns.
    pub fn seeded() -> Self {
        let store = Self::default();
        for rule in seed::default_rules() {
            store.add_rule(rule);
        }
        for pattern in seed::default_workflow_patterns() {
            store.upsert_workflow_pattern(pattern);
        }
        store
    }

    pub fn get_rules(&self, category: &str, max_age: Duration) -> Vec<BusinessRule> {
        self.get_rules_at(category, max_age, Utc::now())
    }

    /// Returns the cached rules of `category`, refreshing them first when the cached
    /// copy is older than `max_age` at `now`.
    pub fn get_rules_at(
        &self,
        category: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Vec<BusinessRule> {
        let mut rules = Vec::new();
        self.rules.modify(category.to_string(), &mut |current| {
            let entry = current?;
            let entry = if is_stale(entry.refreshed_at, max_age, now) {
                tracing::debug!(
                    event_name = "rules.category.refreshed",
                    category,
                    rule_count = entry.rules.len(),
                    "refreshing stale rule category"
                );
                RuleCategory { rules: self.source.refresh(category, entry.rules, now), refreshed_at: now }
            } else {
                entry
            };
            rules = entry.rules.clone();
            Some(entry)
        });
        sort_rules(&mut rules);
        rules
    }

    pub fn get_relevant_rules(&self, query: &RuleQuery, max_age: Duration) -> Vec<BusinessRule> {
        self.get_relevant_rules_at(query, max_age, Utc::now())
    }

    /// Every critical and high rule from every category, plus medium and low rules
    /// that look relevant to `query`. Ordered by priority, then category, then id.
    /// Categories older than `max_age` are refreshed on the way, as in
    /// [`RuleStore::get_rules_at`].
    pub fn get_relevant_rules_at(
        &self,
        query: &RuleQuery,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Vec<BusinessRule> {
        let categories = relevant_categories(query.objective);
        let message_terms = terms(&query.message);

        let mut selected = self
            .rules
            .keys()
            .into_iter()
            .flat_map(|category| self.get_rules_at(&category, max_age, now))
            .filter(|rule| {
                rule.priority.is_mandatory()
                    || categories.contains(rule.category.as_str())
                    || shares_term(&rule.rule, &message_terms)
            })
            .collect::<Vec<_>>();
        sort_rules(&mut selected);
        selected
    }

    /// Inserts `rule`, replacing any rule with the same id in the same category.
    pub fn add_rule(&self, rule: BusinessRule) {
        self.upsert_rule(rule);
    }

    /// Same upsert semantics as [`RuleStore::add_rule`]; stamps `last_updated`.
    pub fn update_rule(&self, rule: BusinessRule) {
        self.upsert_rule(BusinessRule { last_updated: Utc::now(), ..rule });
    }

    fn upsert_rule(&self, rule: BusinessRule) {
        let category = rule.category.clone();
        let mut pending = Some(rule);
        self.rules.modify(category, &mut |current| {
            let mut entry = current
                .unwrap_or_else(|| RuleCategory { rules: Vec::new(), refreshed_at: Utc::now() });
            if let Some(rule) = pending.take() {
                match entry.rules.iter_mut().find(|existing| existing.id == rule.id) {
                    Some(existing) => *existing = rule,
                    None => entry.rules.push(rule),
                }
            }
            Some(entry)
        });
    }

    /// Removes the rule with `rule_id` from whichever category holds it.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut removed = false;
        for category in self.rules.keys() {
            self.rules.modify(category, &mut |current| {
                let mut entry = current?;
                let before = entry.rules.len();
                entry.rules.retain(|rule| rule.id != rule_id);
                removed |= entry.rules.len() != before;
                Some(entry)
            });
        }
        removed
    }

    pub fn list_categories(&self) -> Vec<String> {
        let mut categories = self.rules.keys();
        categories.sort();
        categories
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().iter().map(|entry| entry.rules.len()).sum()
    }

    pub fn get_workflow_pattern(&self, name: &str) -> Option<WorkflowPattern> {
        self.patterns.get(&name.to_string())
    }

    pub fn upsert_workflow_pattern(&self, pattern: WorkflowPattern) {
        self.patterns.set(pattern.name.clone(), pattern);
    }

    pub fn list_workflow_patterns(&self) -> Vec<String> {
        let mut names = self.patterns.keys();
        names.sort();
        names
    }
}

fn sort_rules(rules: &mut [BusinessRule]) {
    rules.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| left.category.cmp(&right.category))
            .then_with(|| left.id.cmp(&right.id))
    });
}

fn relevant_categories(objective: Objective) -> BTreeSet<&'static str> {
    let categories: &[&str] = match objective {
        Objective::CreateDeal => &["deal_management", "data_quality"],
        Objective::SearchEntities => &["search", "communication"],
        Objective::UpdateEntity => &["data_quality", "deal_management"],
        Objective::GeneralInquiry => &["communication"],
    };
    categories.iter().copied().collect()
}

fn terms(text: &str) -> BTreeSet<String> {
    text.to_ascii_lowercase()
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|term| term.len() > 3)
        .map(str::to_string)
        .collect()
}

fn shares_term(rule_text: &str, message_terms: &BTreeSet<String>) -> bool {
    !message_terms.is_empty() && terms(rule_text).iter().any(|term| message_terms.contains(term))
}
