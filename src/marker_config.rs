//! The flat JSON configuration file consumed by the marker pipeline.
//!
//! The file is passed through to the pipeline untouched; this module only
//! reads it to catch mistakes before a container is started, and to show
//! which processors the pipeline will run with it.
//!
//! ```json
//! {
//!   "use_llm": true,
//!   "llm_service": "marker.services.ollama.OllamaService",
//!   "ollama_base_url": "http://ollama:11434",
//!   "ollama_model": "qwen2.5vl:7b-32k",
//!   "enable_llm_table_merge": false
//! }
//! ```

use crate::error::DeployError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

/// JSON type a recognised key must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Bool,
    Str,
}

/// Every key the deployment documents, with its expected type.
const KNOWN_KEYS: &[(&str, KeyKind)] = &[
    ("use_llm", KeyKind::Bool),
    ("force_ocr", KeyKind::Bool),
    ("paginate_output", KeyKind::Bool),
    ("disable_image_extraction", KeyKind::Bool),
    ("strip_existing_ocr", KeyKind::Bool),
    ("redo_inline_math", KeyKind::Bool),
    ("debug", KeyKind::Bool),
    ("enable_llm_table", KeyKind::Bool),
    ("enable_llm_table_merge", KeyKind::Bool),
    ("enable_llm_form", KeyKind::Bool),
    ("enable_llm_complex_region", KeyKind::Bool),
    ("enable_llm_image_description", KeyKind::Bool),
    ("enable_llm_equation", KeyKind::Bool),
    ("enable_llm_handwriting", KeyKind::Bool),
    ("enable_llm_mathblock", KeyKind::Bool),
    ("enable_llm_section_header", KeyKind::Bool),
    ("enable_llm_page_correction", KeyKind::Bool),
    ("output_format", KeyKind::Str),
    ("output_dir", KeyKind::Str),
    ("page_range", KeyKind::Str),
    ("llm_service", KeyKind::Str),
    ("ollama_base_url", KeyKind::Str),
    ("ollama_model", KeyKind::Str),
    ("openai_base_url", KeyKind::Str),
    ("openai_model", KeyKind::Str),
    ("openai_api_key", KeyKind::Str),
    ("gemini_model_name", KeyKind::Str),
    ("gemini_api_key", KeyKind::Str),
    ("claude_model_name", KeyKind::Str),
    ("claude_api_key", KeyKind::Str),
];

const OUTPUT_FORMATS: &[&str] = &["markdown", "json", "html", "chunks"];

const KNOWN_SERVICES: &[&str] = &[
    "marker.services.ollama.OllamaService",
    "marker.services.openai.OpenAIService",
    "marker.services.gemini.GoogleGeminiService",
    "marker.services.vertex.GoogleVertexService",
    "marker.services.claude.ClaudeService",
    "marker.services.azure_openai.AzureOpenAIService",
];

const MODEL_KEYS: &[&str] = &[
    "ollama_model",
    "openai_model",
    "gemini_model_name",
    "claude_model_name",
];

static PAGE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(all|\d+(-\d+)?(,\d+(-\d+)?)*)$").unwrap()
});

static BASE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/]+(/[^\s]*)?$").unwrap());

// ── Processors ───────────────────────────────────────────────────────────

/// Whether a processor runs unconditionally or needs an LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Core,
    Llm,
}

/// Default processor order of the marker PDF converter. LLM processors
/// carry the name of the toggle that disables them.
const DEFAULT_PROCESSORS: &[(&str, Option<&str>)] = &[
    ("OrderProcessor", None),
    ("BlockRelabelProcessor", None),
    ("LineMergeProcessor", None),
    ("BlockquoteProcessor", None),
    ("CodeProcessor", None),
    ("DocumentTOCProcessor", None),
    ("EquationProcessor", None),
    ("FootnoteProcessor", None),
    ("IgnoreTextProcessor", None),
    ("LineNumbersProcessor", None),
    ("ListProcessor", None),
    ("PageHeaderProcessor", None),
    ("SectionHeaderProcessor", None),
    ("TableProcessor", None),
    ("LLMTableProcessor", Some("enable_llm_table")),
    ("LLMTableMergeProcessor", Some("enable_llm_table_merge")),
    ("LLMFormProcessor", Some("enable_llm_form")),
    ("TextProcessor", None),
    ("LLMComplexRegionProcessor", Some("enable_llm_complex_region")),
    ("LLMImageDescriptionProcessor", Some("enable_llm_image_description")),
    ("LLMEquationProcessor", Some("enable_llm_equation")),
    ("LLMHandwritingProcessor", Some("enable_llm_handwriting")),
    ("LLMMathBlockProcessor", Some("enable_llm_mathblock")),
    ("LLMSectionHeaderProcessor", Some("enable_llm_section_header")),
    ("LLMPageCorrectionProcessor", Some("enable_llm_page_correction")),
    ("ReferenceProcessor", None),
    ("BlankPageProcessor", None),
    ("DebugProcessor", None),
];

/// One row of [`MarkerConfig::processor_plan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedProcessor {
    pub name: &'static str,
    pub kind: ProcessorKind,
    pub active: bool,
    /// Why an inactive processor is off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ── Validation report ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub key: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{tag}: {}: {}", self.key, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigReport {
    pub issues: Vec<ConfigIssue>,
}

impl ConfigReport {
    pub fn errors(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    fn push(&mut self, severity: Severity, key: &str, message: impl Into<String>) {
        self.issues.push(ConfigIssue {
            severity,
            key: key.to_string(),
            message: message.into(),
        });
    }
}

// ── The config ───────────────────────────────────────────────────────────

/// A parsed pipeline config: any JSON object, kept as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerConfig {
    values: Map<String, Value>,
}

impl MarkerConfig {
    /// Read and parse `path`. Fails only if the file is unreadable, not
    /// JSON, or not a JSON object; everything else is left to [`validate`].
    ///
    /// [`validate`]: MarkerConfig::validate
    pub fn from_path(path: &Path) -> Result<Self, DeployError> {
        let text = std::fs::read_to_string(path).map_err(|source| DeployError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|detail| DeployError::MalformedPipelineConfig {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Parse JSON text.
    pub fn parse(text: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(values)) => Ok(Self { values }),
            Ok(other) => Err(format!("expected a JSON object, found {}", json_type(&other))),
            Err(e) => Err(e.to_string()),
        }
    }

    /// The config written by the directories phase when none exists: the
    /// local pipeline without an LLM.
    pub fn default_document() -> Value {
        serde_json::json!({
            "use_llm": false,
            "force_ocr": true,
            "paginate_output": true,
            "output_format": "markdown",
            "llm_service": "marker.services.ollama.OllamaService",
            "ollama_base_url": "http://ollama:11434",
            "ollama_model": "qwen2.5vl:7b-32k"
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn use_llm(&self) -> bool {
        self.flag("use_llm").unwrap_or(false)
    }

    /// Check types, flatness and value formats of every key.
    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();

        for (key, value) in &self.values {
            if matches!(value, Value::Object(_) | Value::Array(_)) {
                report.push(
                    Severity::Error,
                    key,
                    format!("nested {} not allowed; the format is flat", json_type(value)),
                );
                continue;
            }

            let Some(&(_, kind)) = KNOWN_KEYS.iter().find(|(k, _)| k == key) else {
                report.push(Severity::Warning, key, "unknown key; passed through unchanged");
                continue;
            };

            let type_ok = match kind {
                KeyKind::Bool => value.is_boolean(),
                KeyKind::Str => value.is_string(),
            };
            if !type_ok {
                let expected = match kind {
                    KeyKind::Bool => "boolean",
                    KeyKind::Str => "string",
                };
                report.push(
                    Severity::Error,
                    key,
                    format!("expected {expected}, found {}", json_type(value)),
                );
            }
        }

        self.validate_values(&mut report);
        report
    }

    fn validate_values(&self, report: &mut ConfigReport) {
        if let Some(fmt) = self.string("output_format") {
            if !OUTPUT_FORMATS.contains(&fmt) {
                report.push(
                    Severity::Error,
                    "output_format",
                    format!("'{fmt}' is not one of {}", OUTPUT_FORMATS.join(", ")),
                );
            }
        }

        if let Some(range) = self.string("page_range") {
            if !PAGE_RANGE.is_match(&range.replace(' ', "")) {
                report.push(
                    Severity::Error,
                    "page_range",
                    format!("'{range}' is not 'all' or a list like '0,5-10,20'"),
                );
            }
        }

        for key in ["ollama_base_url", "openai_base_url"] {
            let Some(url) = self.string(key) else { continue };
            if !BASE_URL.is_match(url) {
                report.push(Severity::Error, key, format!("'{url}' is not an http(s) URL"));
            } else if url.ends_with('/') {
                report.push(Severity::Error, key, "base URL must not end with a slash");
            }
        }

        for key in MODEL_KEYS {
            if matches!(self.string(key), Some(m) if m.trim().is_empty()) {
                report.push(Severity::Error, key, "model identifier must not be empty");
            }
        }

        if let Some(service) = self.string("llm_service") {
            if !KNOWN_SERVICES.contains(&service) {
                report.push(
                    Severity::Warning,
                    "llm_service",
                    format!("'{service}' is not a known marker service class"),
                );
            }
        }

        if !self.use_llm() {
            let set_toggles: Vec<&str> = DEFAULT_PROCESSORS
                .iter()
                .filter_map(|(_, toggle)| *toggle)
                .filter(|t| self.values.contains_key(*t))
                .collect();
            if !set_toggles.is_empty() {
                report.push(
                    Severity::Warning,
                    "use_llm",
                    format!(
                        "LLM toggles have no effect while use_llm is off: {}",
                        set_toggles.join(", ")
                    ),
                );
            }
        }
    }

    /// The pipeline's processors in execution order and whether each runs.
    ///
    /// An LLM processor runs only when `use_llm` is true and its
    /// `enable_llm_*` toggle is not `false` (toggles default to on).
    pub fn processor_plan(&self) -> Vec<PlannedProcessor> {
        let use_llm = self.use_llm();
        DEFAULT_PROCESSORS
            .iter()
            .map(|&(name, toggle)| match toggle {
                None => PlannedProcessor {
                    name,
                    kind: ProcessorKind::Core,
                    active: true,
                    reason: None,
                },
                Some(toggle) => {
                    let enabled = self.flag(toggle).unwrap_or(true);
                    let reason = if !use_llm {
                        Some("use_llm is off".to_string())
                    } else if !enabled {
                        Some(format!("{toggle} is false"))
                    } else {
                        None
                    };
                    PlannedProcessor {
                        name,
                        kind: ProcessorKind::Llm,
                        active: reason.is_none(),
                        reason,
                    }
                }
            })
            .collect()
    }

    /// Names of the processors that will run.
    pub fn active_processors(&self) -> Vec<&'static str> {
        self.processor_plan()
            .into_iter()
            .filter(|p| p.active)
            .map(|p| p.name)
            .collect()
    }

    /// A copy with every `*_api_key` value masked, for display and logs.
    pub fn redacted(&self) -> Value {
        let values = self
            .values
            .iter()
            .map(|(k, v)| {
                let v = if k.ends_with("_api_key") && v.as_str().is_some_and(|s| !s.is_empty()) {
                    Value::String("***".into())
                } else {
                    v.clone()
                };
                (k.clone(), v)
            })
            .collect();
        Value::Object(values)
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(text: &str) -> MarkerConfig {
        MarkerConfig::parse(text).unwrap()
    }

    #[test]
    fn rejects_non_objects() {
        assert!(MarkerConfig::parse("[1, 2]").unwrap_err().contains("array"));
        assert!(MarkerConfig::parse("{ nope").is_err());
    }

    #[test]
    fn default_document_is_valid() {
        let c = cfg(&MarkerConfig::default_document().to_string());
        let report = c.validate();
        assert!(report.is_valid(), "{:?}", report.issues);
        assert_eq!(report.warnings().count(), 0);
    }

    #[test]
    fn wrong_types_and_nesting_are_errors() {
        let c = cfg(r#"{"use_llm": "yes", "ollama_model": 7, "extra": {"a": 1}}"#);
        let report = c.validate();
        let keys: Vec<_> = report.errors().map(|i| i.key.as_str()).collect();
        assert!(keys.contains(&"use_llm"));
        assert!(keys.contains(&"ollama_model"));
        assert!(keys.contains(&"extra"));
    }

    #[test]
    fn unknown_keys_warn() {
        let report = cfg(r#"{"some_future_flag": true}"#).validate();
        assert!(report.is_valid());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn value_formats() {
        let report = cfg(
            r#"{"output_format": "pdf", "page_range": "1-", "ollama_base_url": "http://ollama:11434/"}"#,
        )
        .validate();
        let keys: Vec<_> = report.errors().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["output_format", "page_range", "ollama_base_url"]);

        let ok = cfg(r#"{"page_range": "0, 5-10, 20", "openai_base_url": "https://api.openai.com/v1"}"#)
            .validate();
        assert!(ok.is_valid(), "{:?}", ok.issues);
    }

    #[test]
    fn toggles_without_llm_warn() {
        let report = cfg(r#"{"enable_llm_form": false}"#).validate();
        assert!(report.is_valid());
        assert!(report.warnings().any(|i| i.message.contains("enable_llm_form")));
    }

    #[test]
    fn llm_processors_follow_toggles() {
        let c = cfg(r#"{"use_llm": true, "enable_llm_table_merge": false}"#);
        let active = c.active_processors();
        assert!(active.contains(&"LLMTableProcessor"));
        assert!(!active.contains(&"LLMTableMergeProcessor"));
        assert!(active.contains(&"TextProcessor"));

        let plan = c.processor_plan();
        let merge = plan.iter().find(|p| p.name == "LLMTableMergeProcessor").unwrap();
        assert_eq!(merge.reason.as_deref(), Some("enable_llm_table_merge is false"));
    }

    #[test]
    fn no_llm_processors_without_use_llm() {
        let c = cfg("{}");
        assert!(c
            .processor_plan()
            .iter()
            .filter(|p| p.kind == ProcessorKind::Llm)
            .all(|p| !p.active));
        assert_eq!(c.active_processors().len(), 18);
        assert_eq!(c.active_processors().first(), Some(&"OrderProcessor"));
        assert_eq!(c.active_processors().last(), Some(&"DebugProcessor"));
    }

    #[test]
    fn api_keys_are_redacted() {
        let c = cfg(r#"{"openai_api_key": "sk-secret", "openai_model": "gpt-4o"}"#);
        let shown = c.redacted().to_string();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("gpt-4o"));
    }
}
