//! Parameter schemas declared by each tool

use crate::models::ToolParams;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Text,
    Number,
    Integer,
    Ticker,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
            default: None,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Whether `value` has the right shape for this parameter
    fn accepts(&self, value: &Value) -> bool {
        match self.kind {
            ParamKind::Text => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.as_u64().is_some(),
            ParamKind::Ticker => value.as_str().is_some_and(|s| {
                !s.is_empty()
                    && s.len() <= 10
                    && s.chars().all(|c| c.is_ascii_uppercase() || c == '.' || c == '-')
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }

    /// Fill absent optional parameters from their declared defaults.
    pub fn apply_defaults(&self, params: &mut ToolParams) {
        for spec in &self.params {
            if let Some(default) = &spec.default {
                params
                    .entry(spec.name.to_string())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    /// Names of required parameters that are absent or malformed.
    pub fn missing_required(&self, params: &ToolParams) -> Vec<String> {
        self.required()
            .filter(|spec| !params.get(spec.name).is_some_and(|v| spec.accepts(v)))
            .map(|spec| spec.name.to_string())
            .collect()
    }
}
