use serde_json::Value;

use crate::json_scanner::JsonShape;
use crate::llm_client::ChatMessage;

pub const DEFAULT_JSON_SYSTEM_PROMPT: &str = "You are an expert product management assistant. You always answer with a single valid JSON value and never include prose, markdown or commentary.";

/// Formatting rules appended to every JSON prompt. `{shape}` is replaced with
/// the expected top-level shape.
pub const JSON_FORMAT_RULES: &[&str] = &[
    "Return ONLY the JSON {shape}, nothing else.",
    "Do not wrap the JSON in markdown code fences.",
    "Do not add explanatory text before or after the JSON.",
    "Use double quotes for every key and string value.",
    "Do not leave trailing commas after the last element of an object or array.",
];

/// A worked input/output pair shown to the model
#[derive(Debug, Clone)]
pub struct FewShotExample {
    pub input: String,
    pub output: Value,
}

/// Renders a task, schema sketch, examples and the format rules into a prompt
#[derive(Debug, Clone)]
pub struct JsonPromptBuilder {
    task: String,
    shape: JsonShape,
    schema: Option<Value>,
    examples: Vec<FewShotExample>,
    input: Option<String>,
    system_prompt: String,
}

impl JsonPromptBuilder {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            shape: JsonShape::Object,
            schema: None,
            examples: Vec::new(),
            input: None,
            system_prompt: DEFAULT_JSON_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn shape(mut self, shape: JsonShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn example(mut self, input: impl Into<String>, output: Value) -> Self {
        self.examples.push(FewShotExample { input: input.into(), output });
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Render the user prompt
    pub fn build(&self) -> String {
        let mut sections = vec![format!("TASK:\n{}", self.task.trim())];

        if let Some(schema) = &self.schema {
            sections.push(format!(
                "Respond with a JSON {} matching this structure:\n{}",
                self.shape,
                pretty(schema)
            ));
        }

        for (index, example) in self.examples.iter().enumerate() {
            sections.push(format!(
                "EXAMPLE {}\nInput:\n{}\nOutput:\n{}",
                index + 1,
                example.input.trim(),
                compact(&example.output)
            ));
        }

        if let Some(input) = &self.input {
            sections.push(format!("INPUT:\n{}", input.trim()));
        }

        let rules = JSON_FORMAT_RULES
            .iter()
            .map(|rule| format!("- {}", rule.replace("{shape}", self.shape.name())))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("RULES:\n{}", rules));

        sections.join("\n\n")
    }

    /// System and user messages ready for a completion request
    pub fn build_messages(&self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(&self.system_prompt), ChatMessage::user(self.build())]
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn compact(value: &Value) -> String {
    value.to_string()
}
