//! In-process record book and the business tools that operate on it.
//!
//! The durable entity store lives outside this crate. These tools give the CLI and
//! the behaviour tests a working catalogue with the same names and parameter shapes
//! a production toolset registers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealpilot_core::domain::snapshot::{EntitySummary, PipelineHealth, SystemSnapshot};
use dealpilot_core::domain::tool::{ExecutionContext, ToolDefinition, ToolErrorCode, ToolResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{string_param, RegistryError, Tool, ToolDispatcher};

pub const READ_PERMISSION: &str = "records:read";
pub const WRITE_PERMISSION: &str = "records:write";

const SEARCH_LIMIT: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Deal,
    Organization,
    Person,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deal => "deal",
            Self::Organization => "organization",
            Self::Person => "person",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deal" | "deals" => Some(Self::Deal),
            "organization" | "organizations" | "org" | "company" => Some(Self::Organization),
            "person" | "people" | "contact" | "contacts" => Some(Self::Person),
            _ => None,
        }
    }

    fn plural(&self) -> &'static str {
        match self {
            Self::Deal => "deals",
            Self::Organization => "organizations",
            Self::Person => "people",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub kind: RecordKind,
    pub name: String,
    pub value: Option<f64>,
    pub organization: Option<String>,
    pub stage: Option<String>,
    pub stalled: bool,
    pub notes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    fn new(id: String, kind: RecordKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            value: None,
            organization: None,
            stage: None,
            stalled: false,
            notes: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    fn is_open_deal(&self) -> bool {
        self.kind == RecordKind::Deal
            && !matches!(self.stage.as_deref(), Some("won") | Some("lost"))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordFilter {
    pub kind: Option<RecordKind>,
    pub query: Option<String>,
    pub min_value: Option<f64>,
}

#[derive(Debug, Default)]
pub struct RecordBook {
    records: Mutex<Vec<Record>>,
}

impl RecordBook {
    /// A small pipeline used by the CLI and the behaviour tests.
    pub fn demo() -> Self {
        let book = Self::default();
        for name in ["Acme Corp", "Globex", "Initech"] {
            book.insert(RecordKind::Organization, name, |_| {});
        }
        book.insert(RecordKind::Person, "Jane Doe", |record| {
            record.organization = Some("Acme Corp".to_string());
        });
        for (name, value, organization, stage, stalled) in [
            ("Acme renewal", 75_000.0, "Acme Corp", "proposal", false),
            ("Globex pilot", 12_000.0, "Globex", "qualification", true),
            ("Initech expansion", 54_000.0, "Initech", "negotiation", false),
        ] {
            book.insert(RecordKind::Deal, name, |record| {
                record.value = Some(value);
                record.organization = Some(organization.to_string());
                record.stage = Some(stage.to_string());
                record.stalled = stalled;
            });
        }
        book
    }

    pub fn insert(
        &self,
        kind: RecordKind,
        name: impl Into<String>,
        configure: impl FnOnce(&mut Record),
    ) -> Record {
        let mut records = self.lock();
        let sequence = records.iter().filter(|record| record.kind == kind).count() + 1;
        let prefix = match kind {
            RecordKind::Deal => "deal",
            RecordKind::Organization => "org",
            RecordKind::Person => "person",
        };
        let mut record = Record::new(format!("{prefix}-{sequence}"), kind, name);
        configure(&mut record);
        records.push(record.clone());
        record
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.lock().iter().find(|record| record.id == id).cloned()
    }

    pub fn update(&self, id: &str, apply: impl FnOnce(&mut Record)) -> Option<Record> {
        let mut records = self.lock();
        let record = records.iter_mut().find(|record| record.id == id)?;
        apply(record);
        record.updated_at = Utc::now();
        Some(record.clone())
    }

    pub fn search(&self, filter: &RecordFilter) -> Vec<Record> {
        let terms = filter
            .query
            .as_deref()
            .map(|query| {
                query
                    .to_ascii_lowercase()
                    .split(|ch: char| !ch.is_ascii_alphanumeric())
                    .filter(|term| term.len() >= 3)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut matches = self
            .lock()
            .iter()
            .filter(|record| filter.kind.map_or(true, |kind| record.kind == kind))
            .filter(|record| {
                filter.min_value.map_or(true, |min| record.value.is_some_and(|value| value >= min))
            })
            .filter(|record| {
                let name = record.name.to_ascii_lowercase();
                terms.is_empty() || terms.iter().any(|term| name.contains(term.as_str()))
            })
            .cloned()
            .collect::<Vec<_>>();
        matches.sort_by(|left, right| left.kind.cmp(&right.kind).then(left.id.cmp(&right.id)));
        matches.truncate(SEARCH_LIMIT);
        matches
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SystemSnapshot {
        let records = self.lock();
        let mut snapshot = SystemSnapshot::empty(now);
        let mut recent: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
        for record in records.iter() {
            *snapshot.entity_counts.entry(record.kind.plural().to_string()).or_insert(0) += 1;
            recent.entry(record.kind.plural().to_string()).or_default().push(record);
        }
        for (entity, mut items) in recent {
            items.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
            snapshot.recent_entities.insert(
                entity,
                items
                    .into_iter()
                    .take(5)
                    .map(|record| EntitySummary {
                        id: record.id.clone(),
                        name: record.name.clone(),
                        detail: record.stage.clone(),
                    })
                    .collect(),
            );
        }

        let open = records.iter().filter(|record| record.is_open_deal()).count() as u64;
        let stalled = records.iter().filter(|record| record.is_open_deal() && record.stalled);
        let stalled_names = stalled.map(|record| record.name.clone()).collect::<Vec<_>>();
        snapshot.pipeline_health = PipelineHealth::classify(open, stalled_names.len() as u64);
        for name in stalled_names {
            snapshot.suggestions.push(format!("Follow up on stalled deal `{name}`"));
        }
        snapshot
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Record>> {
        match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn register_record_tools(
    dispatcher: &ToolDispatcher,
    book: Arc<RecordBook>,
) -> Result<(), RegistryError> {
    dispatcher.register(SearchEntitiesTool { book: Arc::clone(&book) })?;
    dispatcher.register(CreateDealTool { book: Arc::clone(&book) })?;
    dispatcher.register(UpdateEntityTool { book: Arc::clone(&book) })?;
    dispatcher.register(AnalyzePipelineTool { book })
}

pub struct SearchEntitiesTool {
    book: Arc<RecordBook>,
}

#[async_trait]
impl Tool for SearchEntitiesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("search_entities", "Search deals, organizations and people", "search")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "entity_type": { "type": "string", "enum": ["deal", "organization", "person"] },
                    "min_value": { "type": "number" }
                },
                "required": []
            }))
            .with_permission(READ_PERMISSION)
            .with_guidance("Search before creating or updating records to avoid duplicates")
    }

    async fn execute(
        &self,
        params: Value,
        _context: &ExecutionContext,
    ) -> anyhow::Result<ToolResult> {
        let kind = match string_param(&params, "entity_type") {
            Some(raw) => match RecordKind::parse(raw) {
                Some(kind) => Some(kind),
                None => {
                    return Ok(ToolResult::failure(
                        ToolErrorCode::InvalidParameters,
                        format!("unsupported entity_type `{raw}`"),
                    ))
                }
            },
            None => None,
        };
        let filter = RecordFilter {
            kind,
            query: string_param(&params, "query").map(str::to_string),
            min_value: params.get("min_value").and_then(Value::as_f64),
        };

        let results = self.book.search(&filter);
        let message = match results.len() {
            0 => "No matching records".to_string(),
            1 => format!("Found {}", results[0].name),
            count => format!("Found {count} records"),
        };
        let data = json!({ "count": results.len(), "results": results });
        Ok(ToolResult::success(data, message).with_sources(&["record_book"]))
    }
}

pub struct CreateDealTool {
    book: Arc<RecordBook>,
}

#[async_trait]
impl Tool for CreateDealTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("create_deal", "Create a new deal", "deals")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "value": { "type": "number" },
                    "organization": {}
                },
                "required": []
            }))
            .with_permission(WRITE_PERMISSION)
            .with_guidance("Requires a title or description; link an existing organization")
    }

    async fn execute(
        &self,
        params: Value,
        _context: &ExecutionContext,
    ) -> anyhow::Result<ToolResult> {
        let Some(title) =
            string_param(&params, "title").or_else(|| string_param(&params, "description"))
        else {
            return Ok(ToolResult::failure(
                ToolErrorCode::InvalidParameters,
                "a deal needs a title or description",
            ));
        };
        let value =
            params.get("value").and_then(Value::as_f64).or_else(|| amount_in_text(title));
        let organization = params.get("organization").and_then(organization_name);

        let deal = self.book.insert(RecordKind::Deal, title, |record| {
            record.value = value;
            record.organization = organization;
            record.stage = Some("qualification".to_string());
        });
        let message = format!("Created deal {} ({})", deal.name, deal.id);
        Ok(ToolResult::success(json!(deal), message).with_sources(&["record_book"]))
    }
}

pub struct UpdateEntityTool {
    book: Arc<RecordBook>,
}

#[async_trait]
impl Tool for UpdateEntityTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("update_entity", "Update an existing record", "records")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "target": {},
                    "fields": { "type": "object" },
                    "change": { "type": "string" }
                },
                "required": []
            }))
            .with_permission(WRITE_PERMISSION)
            .with_guidance("Confirm the target record id with a search first")
    }

    async fn execute(
        &self,
        params: Value,
        _context: &ExecutionContext,
    ) -> anyhow::Result<ToolResult> {
        let target_id = string_param(&params, "id")
            .map(str::to_string)
            .or_else(|| params.get("target").and_then(record_id));
        let Some(target_id) = target_id else {
            return Ok(ToolResult::failure(
                ToolErrorCode::InvalidParameters,
                "update needs an id or a target record",
            ));
        };
        let fields = params.get("fields").cloned().unwrap_or(Value::Null);
        let change = string_param(&params, "change").map(str::to_string);

        let updated = self.book.update(&target_id, |record| {
            if let Some(name) = fields.get("name").and_then(Value::as_str) {
                record.name = name.to_string();
            }
            if let Some(stage) = fields.get("stage").and_then(Value::as_str) {
                record.stage = Some(stage.to_string());
                record.stalled = false;
            }
            if let Some(value) = fields.get("value").and_then(Value::as_f64) {
                record.value = Some(value);
            }
            if let Some(change) = change {
                record.notes.push(change);
            }
        });
        match updated {
            Some(record) => {
                let message = format!("Updated {} ({})", record.name, record.id);
                Ok(ToolResult::success(json!(record), message).with_sources(&["record_book"]))
            }
            None => Ok(ToolResult::failure(
                ToolErrorCode::NotFound,
                format!("record `{target_id}` not found"),
            )),
        }
    }
}

pub struct AnalyzePipelineTool {
    book: Arc<RecordBook>,
}

#[async_trait]
impl Tool for AnalyzePipelineTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("analyze_pipeline", "Summarize open pipeline health", "analysis")
            .with_permission(READ_PERMISSION)
    }

    async fn execute(
        &self,
        _params: Value,
        _context: &ExecutionContext,
    ) -> anyhow::Result<ToolResult> {
        let snapshot = self.book.snapshot(Utc::now());
        let records = self.book.records();
        let open = records.iter().filter(|record| record.is_open_deal()).collect::<Vec<_>>();
        let open_value = open.iter().filter_map(|deal| deal.value).sum::<f64>();
        let stalled = open.iter().filter(|deal| deal.stalled).count();
        let summary = format!(
            "{} open deals worth {open_value:.0} in total, {stalled} stalled, pipeline {}",
            open.len(),
            snapshot.pipeline_health.as_str()
        );

        let data = json!({
            "open_deals": open.len(),
            "open_value": open_value,
            "stalled_deals": stalled,
            "health": snapshot.pipeline_health.as_str(),
            "suggestions": snapshot.suggestions,
            "summary": summary,
        });
        Ok(ToolResult::success(data, summary).with_sources(&["record_book"]))
    }
}

fn amount_in_text(text: &str) -> Option<f64> {
    static AMOUNT: OnceLock<Regex> = OnceLock::new();
    let pattern = AMOUNT.get_or_init(|| {
        Regex::new(r"\$\s?([0-9][0-9,]*(?:\.[0-9]+)?)").expect("valid amount regex")
    });
    let captures = pattern.captures(text)?;
    captures.get(1)?.as_str().replace(',', "").parse().ok()
}

/// Accepts a plain name or a search result payload from an earlier workflow step.
fn organization_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
        Value::Object(_) => first_result(value)
            .and_then(|record| record.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn record_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Object(_) => first_result(value)
            .and_then(|record| record.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn first_result(value: &Value) -> Option<&Value> {
    match value.get("results") {
        Some(Value::Array(results)) => results.first(),
        _ => Some(value),
    }
}
