//! Client-side form state: field values, validation rules, per-field errors.
//!
//! Errors come from two places. Client rules produce `Validation` errors and
//! are re-evaluated on every `validate()`. The server produces `Manual`
//! errors through `map_errors`; those stick until the user edits the field,
//! even if the client rules would pass.

mod mapper;
pub mod schema;

use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::{Map, Value};

pub use mapper::{map_errors, FIELD_ERROR_SEPARATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Email,
    Password,
    Multiline,
}

/// A client-side validation rule. The first failing rule's message is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    MinLength { min: usize, message: String },
    MaxLength { max: usize, message: String },
    Email { message: String },
    /// Value must equal another field's value.
    Matches { field: String, message: String },
}

impl Rule {
    pub fn min_length(min: usize, message: impl Into<String>) -> Self {
        Rule::MinLength {
            min,
            message: message.into(),
        }
    }

    pub fn max_length(max: usize, message: impl Into<String>) -> Self {
        Rule::MaxLength {
            max,
            message: message.into(),
        }
    }

    pub fn email(message: impl Into<String>) -> Self {
        Rule::Email {
            message: message.into(),
        }
    }

    pub fn matches(field: impl Into<String>, message: impl Into<String>) -> Self {
        Rule::Matches {
            field: field.into(),
            message: message.into(),
        }
    }

    /// `None` when `value` passes, otherwise the rule's message.
    fn check(&self, value: &str, form: &FormState) -> Option<&str> {
        let passes = match self {
            Rule::MinLength { min, .. } => value.chars().count() >= *min,
            Rule::MaxLength { max, .. } => value.chars().count() <= *max,
            Rule::Email { .. } => email_pattern().is_some_and(|re| re.is_match(value)),
            Rule::Matches { field, .. } => form.value(field) == Some(value),
        };
        if passes {
            None
        } else {
            Some(self.message())
        }
    }

    fn message(&self) -> &str {
        match self {
            Rule::MinLength { message, .. }
            | Rule::MaxLength { message, .. }
            | Rule::Email { message }
            | Rule::Matches { message, .. } => message,
        }
    }
}

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
}

/// Definition of one form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub input: InputKind,
    pub default: String,
    pub rules: Vec<Rule>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>, input: InputKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            input,
            default: String::new(),
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = value.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// Set from a server response; survives re-validation.
    Manual,
    /// Produced by a client rule.
    Validation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub message: String,
    pub source: ErrorSource,
}

impl FieldError {
    pub fn manual(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: ErrorSource::Manual,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: ErrorSource::Validation,
        }
    }
}

#[derive(Debug, Clone)]
struct FieldState {
    spec: FieldSpec,
    value: String,
    error: Option<FieldError>,
}

/// Values and errors of one rendered form.
#[derive(Debug, Clone)]
pub struct FormState {
    fields: Vec<FieldState>,
}

impl FormState {
    pub fn new(specs: Vec<FieldSpec>) -> Self {
        let fields = specs
            .into_iter()
            .map(|spec| FieldState {
                value: spec.default.clone(),
                spec,
                error: None,
            })
            .collect();
        Self { fields }
    }

    pub fn specs(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().map(|field| &field.spec)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.field(name).map(|field| field.value.as_str())
    }

    /// User edit: replaces the value and clears that field's error, manual
    /// or not. Returns `false` for an unknown field.
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.field_mut(name) {
            Some(field) => {
                field.value = value.into();
                field.error = None;
                true
            }
            None => false,
        }
    }

    pub fn error(&self, name: &str) -> Option<&FieldError> {
        self.field(name).and_then(|field| field.error.as_ref())
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &FieldError)> {
        self.fields
            .iter()
            .filter_map(|field| field.error.as_ref().map(|error| (field.spec.name.as_str(), error)))
    }

    pub fn has_errors(&self) -> bool {
        self.fields.iter().any(|field| field.error.is_some())
    }

    /// Returns `false` (and changes nothing) when the form has no such field.
    pub fn set_error(&mut self, name: &str, error: FieldError) -> bool {
        match self.field_mut(name) {
            Some(field) => {
                field.error = Some(error);
                true
            }
            None => false,
        }
    }

    pub fn clear_errors(&mut self) {
        for field in &mut self.fields {
            field.error = None;
        }
    }

    /// Run the client rules. Fields holding a manual error are skipped.
    /// Returns whether every evaluated field passed.
    pub fn validate(&mut self) -> bool {
        let outcomes: Vec<Option<Option<String>>> = self
            .fields
            .iter()
            .map(|field| {
                if field.error.as_ref().is_some_and(|e| e.source == ErrorSource::Manual) {
                    return None;
                }
                let failure = field
                    .spec
                    .rules
                    .iter()
                    .find_map(|rule| rule.check(&field.value, self))
                    .map(str::to_string);
                Some(failure)
            })
            .collect();

        let mut valid = true;
        for (field, outcome) in self.fields.iter_mut().zip(outcomes) {
            if let Some(failure) = outcome {
                valid &= failure.is_none();
                field.error = failure.map(FieldError::validation);
            }
        }
        valid
    }

    /// Back to defaults with no errors.
    pub fn reset(&mut self) {
        for field in &mut self.fields {
            field.value = field.spec.default.clone();
            field.error = None;
        }
    }

    /// JSON object of field name → value, ready to submit.
    pub fn values(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| (field.spec.name.clone(), Value::String(field.value.clone())))
            .collect();
        Value::Object(map)
    }

    fn field(&self, name: &str) -> Option<&FieldState> {
        self.fields.iter().find(|field| field.spec.name == name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut FieldState> {
        self.fields.iter_mut().find(|field| field.spec.name == name)
    }
}
