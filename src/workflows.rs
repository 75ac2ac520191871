use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::RetryConfig;
use crate::errors::StudioError;
use crate::json_scanner::JsonShape;
use crate::llm_json::JsonRequestOptions;
use crate::prompt_builder::JsonPromptBuilder;

// Studio workflows. Each one is a prompt, a response contract and defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Ideation,
    Feasibility,
    PrdGeneration,
    JourneyMapping,
    CompetitiveAnalysis,
    ScopeMonitoring,
    OkrGeneration,
    ReleasePrep,
}

/// Summary returned by the workflow listing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub slug: String,
    pub name: String,
    pub shape: JsonShape,
    pub required_keys: Vec<String>,
}

impl WorkflowKind {
    pub fn all() -> Vec<WorkflowKind> {
        vec![
            WorkflowKind::Ideation,
            WorkflowKind::Feasibility,
            WorkflowKind::PrdGeneration,
            WorkflowKind::JourneyMapping,
            WorkflowKind::CompetitiveAnalysis,
            WorkflowKind::ScopeMonitoring,
            WorkflowKind::OkrGeneration,
            WorkflowKind::ReleasePrep,
        ]
    }

    pub fn slug(&self) -> &'static str {
        match self {
            WorkflowKind::Ideation => "ideation",
            WorkflowKind::Feasibility => "feasibility",
            WorkflowKind::PrdGeneration => "prd",
            WorkflowKind::JourneyMapping => "journey-mapping",
            WorkflowKind::CompetitiveAnalysis => "competitive-analysis",
            WorkflowKind::ScopeMonitoring => "scope-monitoring",
            WorkflowKind::OkrGeneration => "okr",
            WorkflowKind::ReleasePrep => "release-prep",
        }
    }

    pub fn from_slug(slug: &str) -> Option<WorkflowKind> {
        Self::all().into_iter().find(|kind| kind.slug() == slug)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WorkflowKind::Ideation => "Ideation",
            WorkflowKind::Feasibility => "Feasibility Assessment",
            WorkflowKind::PrdGeneration => "PRD Generation",
            WorkflowKind::JourneyMapping => "Journey Mapping",
            WorkflowKind::CompetitiveAnalysis => "Competitive Analysis",
            WorkflowKind::ScopeMonitoring => "Scope Monitoring",
            WorkflowKind::OkrGeneration => "OKR Generation",
            WorkflowKind::ReleasePrep => "Release Preparation",
        }
    }

    pub fn shape(&self) -> JsonShape {
        match self {
            WorkflowKind::JourneyMapping => JsonShape::Array,
            _ => JsonShape::Object,
        }
    }

    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            WorkflowKind::Ideation => &["ideas"],
            WorkflowKind::Feasibility => &["overall_score", "recommendation"],
            WorkflowKind::PrdGeneration => &["title", "problem_statement", "requirements"],
            WorkflowKind::JourneyMapping => &[],
            WorkflowKind::CompetitiveAnalysis => &["competitors"],
            WorkflowKind::ScopeMonitoring => &["alerts"],
            WorkflowKind::OkrGeneration => &["objectives"],
            WorkflowKind::ReleasePrep => &["release_notes", "checklist"],
        }
    }

    pub fn task_description(&self) -> &'static str {
        match self {
            WorkflowKind::Ideation => "You are a senior product strategist. Generate distinct product ideas for the problem space described in the input. Each idea needs a short title, a description, the target user and its value proposition.",
            WorkflowKind::Feasibility => "You are a principal engineer and product lead. Assess the feasibility of the product idea in the input. Score overall feasibility from 0 to 10, score technical, market and resource feasibility separately, list key risks and assumptions, and give a clear go / no-go recommendation.",
            WorkflowKind::PrdGeneration => "You are an experienced product manager. Write a product requirements document for the feature described in the input: title, problem statement, goals, user stories, functional requirements with priorities, and explicit non-goals.",
            WorkflowKind::JourneyMapping => "You are a UX researcher. Map the end-to-end customer journey for the product and persona in the input as an ordered list of stages. For each stage give the user actions, the dominant emotion, pain points and improvement opportunities.",
            WorkflowKind::CompetitiveAnalysis => "You are a market analyst. Analyse the competitive landscape for the product in the input. List the main competitors with strengths, weaknesses and positioning, then the differentiators and market gaps our product can exploit.",
            WorkflowKind::ScopeMonitoring => "You are a delivery lead monitoring scope. Compare the original scope and the current change requests in the input. Raise an alert for every sign of scope creep with its severity (low, medium or high), a description and a recommendation, and summarise overall scope health.",
            WorkflowKind::OkrGeneration => "You are an OKR coach. Turn the strategy notes in the input into two to four objectives, each with measurable key results that have a concrete target.",
            WorkflowKind::ReleasePrep => "You are a release manager. Prepare the release described in the input: customer-facing release notes, a go-live checklist with owners, and the main release risks.",
        }
    }

    /// Example structure shown to the model
    pub fn schema_sketch(&self) -> Value {
        match self {
            WorkflowKind::Ideation => json!({
                "ideas": [{
                    "title": "string",
                    "description": "string",
                    "target_user": "string",
                    "value_proposition": "string"
                }],
                "summary": "string"
            }),
            WorkflowKind::Feasibility => json!({
                "overall_score": 7.5,
                "technical": { "score": 8, "notes": "string" },
                "market": { "score": 7, "notes": "string" },
                "resources": { "score": 6, "notes": "string" },
                "risks": ["string"],
                "assumptions": ["string"],
                "recommendation": "go | no-go | conditional"
            }),
            WorkflowKind::PrdGeneration => json!({
                "title": "string",
                "problem_statement": "string",
                "goals": ["string"],
                "user_stories": [{ "as_a": "string", "i_want": "string", "so_that": "string" }],
                "requirements": [{ "id": "REQ-1", "description": "string", "priority": "must | should | could" }],
                "non_goals": ["string"]
            }),
            WorkflowKind::JourneyMapping => json!([{
                "stage": "string",
                "actions": ["string"],
                "emotion": "string",
                "pain_points": ["string"],
                "opportunities": ["string"]
            }]),
            WorkflowKind::CompetitiveAnalysis => json!({
                "competitors": [{
                    "name": "string",
                    "strengths": ["string"],
                    "weaknesses": ["string"],
                    "positioning": "string"
                }],
                "differentiators": ["string"],
                "market_gaps": ["string"]
            }),
            WorkflowKind::ScopeMonitoring => json!({
                "alerts": [{
                    "severity": "low | medium | high",
                    "description": "string",
                    "recommendation": "string"
                }],
                "scope_health": "healthy | at_risk | off_track"
            }),
            WorkflowKind::OkrGeneration => json!({
                "objectives": [{
                    "objective": "string",
                    "key_results": [{ "description": "string", "target": "string" }]
                }]
            }),
            WorkflowKind::ReleasePrep => json!({
                "release_notes": "string",
                "checklist": [{ "item": "string", "owner": "string", "done": false }],
                "risks": ["string"]
            }),
        }
    }

    /// JSON Schema the filled result must satisfy
    pub fn json_schema(&self) -> Value {
        let strings = json!({ "type": "array", "items": { "type": "string" } });
        let score = json!({ "type": "number", "minimum": 0, "maximum": 10 });

        match self {
            WorkflowKind::Ideation => json!({
                "type": "object",
                "required": ["ideas"],
                "properties": {
                    "ideas": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["title", "description"],
                            "properties": {
                                "title": { "type": "string" },
                                "description": { "type": "string" }
                            }
                        }
                    },
                    "summary": { "type": "string" }
                }
            }),
            WorkflowKind::Feasibility => json!({
                "type": "object",
                "required": ["overall_score", "recommendation"],
                "properties": {
                    "overall_score": score,
                    "risks": strings,
                    "assumptions": strings,
                    "recommendation": { "type": "string" }
                }
            }),
            WorkflowKind::PrdGeneration => json!({
                "type": "object",
                "required": ["title", "problem_statement", "requirements"],
                "properties": {
                    "title": { "type": "string" },
                    "problem_statement": { "type": "string" },
                    "goals": strings,
                    "user_stories": { "type": "array", "items": { "type": "object" } },
                    "requirements": { "type": "array", "minItems": 1 },
                    "non_goals": strings
                }
            }),
            WorkflowKind::JourneyMapping => json!({
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["stage"],
                    "properties": {
                        "stage": { "type": "string" },
                        "actions": strings,
                        "pain_points": strings,
                        "opportunities": strings
                    }
                }
            }),
            WorkflowKind::CompetitiveAnalysis => json!({
                "type": "object",
                "required": ["competitors"],
                "properties": {
                    "competitors": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["name"],
                            "properties": { "name": { "type": "string" } }
                        }
                    },
                    "differentiators": strings,
                    "market_gaps": strings
                }
            }),
            WorkflowKind::ScopeMonitoring => json!({
                "type": "object",
                "required": ["alerts"],
                "properties": {
                    "alerts": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["severity", "description"],
                            "properties": {
                                "severity": { "enum": ["low", "medium", "high"] },
                                "description": { "type": "string" }
                            }
                        }
                    },
                    "scope_health": { "type": "string" }
                }
            }),
            WorkflowKind::OkrGeneration => json!({
                "type": "object",
                "required": ["objectives"],
                "properties": {
                    "objectives": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "required": ["objective", "key_results"],
                            "properties": {
                                "objective": { "type": "string" },
                                "key_results": { "type": "array", "minItems": 1 }
                            }
                        }
                    }
                }
            }),
            WorkflowKind::ReleasePrep => json!({
                "type": "object",
                "required": ["release_notes", "checklist"],
                "properties": {
                    "release_notes": { "type": "string" },
                    "checklist": { "type": "array", "items": { "type": "object" } },
                    "risks": strings
                }
            }),
        }
    }

    /// Values for optional fields the model may omit. For array workflows the
    /// defaults apply to each element.
    pub fn defaults(&self) -> Value {
        match self {
            WorkflowKind::Ideation => json!({ "summary": "" }),
            WorkflowKind::Feasibility => json!({ "risks": [], "assumptions": [] }),
            WorkflowKind::PrdGeneration => json!({ "goals": [], "user_stories": [], "non_goals": [] }),
            WorkflowKind::JourneyMapping => json!({ "actions": [], "pain_points": [], "opportunities": [] }),
            WorkflowKind::CompetitiveAnalysis => json!({ "differentiators": [], "market_gaps": [] }),
            WorkflowKind::ScopeMonitoring => json!({ "scope_health": "unknown" }),
            WorkflowKind::OkrGeneration => json!({}),
            WorkflowKind::ReleasePrep => json!({ "risks": [] }),
        }
    }

    /// Degraded result used when every attempt fails. Only scope monitoring
    /// runs unattended, so it is the only workflow that tolerates one.
    pub fn fallback(&self) -> Option<Value> {
        match self {
            WorkflowKind::ScopeMonitoring => Some(json!({ "alerts": [], "scope_health": "unknown" })),
            _ => None,
        }
    }

    pub fn prompt(&self, input: &str) -> JsonPromptBuilder {
        let builder = JsonPromptBuilder::new(self.task_description())
            .shape(self.shape())
            .schema(self.schema_sketch())
            .input(input);

        match self {
            WorkflowKind::ScopeMonitoring => builder.example(
                "Original scope: CSV export. Change requests: add PDF export, add scheduled email reports.",
                json!({
                    "alerts": [{
                        "severity": "medium",
                        "description": "Scheduled email reports add a new delivery channel outside the export scope",
                        "recommendation": "Move scheduled reports to a follow-up release"
                    }],
                    "scope_health": "at_risk"
                }),
            ),
            WorkflowKind::OkrGeneration => builder.example(
                "Grow self-serve revenue and reduce onboarding friction.",
                json!({
                    "objectives": [{
                        "objective": "Make self-serve the default path to revenue",
                        "key_results": [
                            { "description": "Self-serve share of new revenue", "target": "40%" },
                            { "description": "Median time to first value", "target": "< 10 minutes" }
                        ]
                    }]
                }),
            ),
            _ => builder,
        }
    }

    pub fn request_options(&self, retry: &RetryConfig, max_tokens: u32) -> JsonRequestOptions {
        let options = JsonRequestOptions::from_retry_config(retry)
            .shape(self.shape())
            .required_keys(self.required_keys().iter().copied())
            .max_tokens(max_tokens);

        match self.fallback() {
            Some(fallback) => options.fallback(fallback),
            None => options,
        }
    }

    pub fn info(&self) -> WorkflowInfo {
        WorkflowInfo {
            slug: self.slug().to_string(),
            name: self.display_name().to_string(),
            shape: self.shape(),
            required_keys: self.required_keys().iter().map(|k| k.to_string()).collect(),
        }
    }
}

fn fill_object_defaults(object: &mut Map<String, Value>, defaults: &Value) {
    if let Some(defaults) = defaults.as_object() {
        for (key, default) in defaults {
            let missing = object.get(key).is_none_or(Value::is_null);
            if missing {
                object.insert(key.clone(), default.clone());
            }
        }
    }
}

/// Fill absent optional fields with the workflow defaults, then validate the
/// result against the workflow schema.
pub fn validate_and_fill_defaults(kind: WorkflowKind, mut value: Value) -> Result<Value, StudioError> {
    let defaults = kind.defaults();
    match &mut value {
        Value::Object(object) => fill_object_defaults(object, &defaults),
        Value::Array(items) => {
            for item in items.iter_mut() {
                if let Value::Object(object) = item {
                    fill_object_defaults(object, &defaults);
                }
            }
        }
        _ => {}
    }

    let schema = kind.json_schema();
    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| StudioError::Internal(format!("invalid schema for {}: {}", kind.slug(), e)))?;

    if let Err(errors) = compiled.validate(&value) {
        let messages: Vec<String> = errors
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect();
        return Err(StudioError::Validation(format!(
            "{} result does not match its schema: {}",
            kind.display_name(),
            messages.join("; ")
        )));
    }

    Ok(value)
}
