//! Operation parameters
//!
//! Lifecycle operations take a FHIR `Parameters` resource: a list of named entries, each
//! carrying one `value[x]` or a nested `resource`. Accessors read the first entry with a
//! name and accept the value types FHIR allows for that kind of value.

use chrono::NaiveDate;
use crmi_common::{Error, Result};
use crmi_domain::Endpoint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const PARAMETERS_RESOURCE_TYPE: &str = "Parameters";

const STRING_KEYS: &[&str] = &[
    "valueString",
    "valueCode",
    "valueUri",
    "valueUrl",
    "valueCanonical",
    "valueId",
    "valueMarkdown",
];

const INTEGER_KEYS: &[&str] = &["valueInteger", "valueUnsignedInt", "valuePositiveInt"];

/// One named entry of a `Parameters` resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(flatten)]
    pub value: Map<String, Value>,
}

impl Parameter {
    fn with(name: &str, key: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        Self {
            name: name.to_string(),
            value: map,
        }
    }

    fn string_value(&self) -> Option<&str> {
        STRING_KEYS
            .iter()
            .find_map(|key| self.value.get(*key).and_then(Value::as_str))
    }
}

fn parameters_resource_type() -> String {
    PARAMETERS_RESOURCE_TYPE.to_string()
}

/// Named, loosely typed operation arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationParameters {
    #[serde(default = "parameters_resource_type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter: Vec<Parameter>,
}

impl Default for OperationParameters {
    fn default() -> Self {
        Self {
            resource_type: parameters_resource_type(),
            parameter: Vec::new(),
        }
    }
}

impl OperationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Parameters` resource; `null` gives an empty parameter set
    pub fn from_json(raw: Value) -> Result<Self> {
        if raw.is_null() {
            return Ok(Self::new());
        }
        let parameters: Self = serde_json::from_value(raw)
            .map_err(|e| Error::InvalidRequest(format!("Invalid Parameters resource: {}", e)))?;
        if parameters.resource_type != PARAMETERS_RESOURCE_TYPE {
            return Err(Error::InvalidRequest(format!(
                "Expected a Parameters resource, got '{}'",
                parameters.resource_type
            )));
        }
        Ok(parameters)
    }

    pub fn with_string(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameter
            .push(Parameter::with(name, "valueString", Value::String(value.into())));
        self
    }

    /// One entry per value, in order
    pub fn with_strings<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self = self.with_string(name, value);
        }
        self
    }

    pub fn with_boolean(mut self, name: &str, value: bool) -> Self {
        self.parameter
            .push(Parameter::with(name, "valueBoolean", Value::Bool(value)));
        self
    }

    pub fn with_integer(mut self, name: &str, value: i64) -> Self {
        self.parameter
            .push(Parameter::with(name, "valueInteger", Value::from(value)));
        self
    }

    pub fn with_date(mut self, name: &str, value: NaiveDate) -> Self {
        self.parameter.push(Parameter::with(
            name,
            "valueDate",
            Value::String(value.format("%Y-%m-%d").to_string()),
        ));
        self
    }

    pub fn with_resource(mut self, name: &str, resource: Value) -> Self {
        self.parameter.push(Parameter::with(name, "resource", resource));
        self
    }

    pub fn with_reference(mut self, name: &str, reference: &str) -> Self {
        let mut value = Map::new();
        value.insert("reference".to_string(), Value::String(reference.to_string()));
        self.parameter
            .push(Parameter::with(name, "valueReference", Value::Object(value)));
        self
    }

    fn first(&self, name: &str) -> Option<&Parameter> {
        self.parameter.iter().find(|p| p.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.first(name).is_some()
    }

    /// First string-like value; blank strings count as absent
    pub fn string(&self, name: &str) -> Option<&str> {
        self.first(name)
            .and_then(Parameter::string_value)
            .filter(|s| !s.trim().is_empty())
    }

    /// Every string-like value with the name, in order
    pub fn strings(&self, name: &str) -> Vec<String> {
        self.parameter
            .iter()
            .filter(|p| p.name == name)
            .filter_map(Parameter::string_value)
            .map(str::to_string)
            .collect()
    }

    pub fn boolean(&self, name: &str) -> Result<Option<bool>> {
        let Some(parameter) = self.first(name) else {
            return Ok(None);
        };
        if let Some(value) = parameter.value.get("valueBoolean").and_then(Value::as_bool) {
            return Ok(Some(value));
        }
        match parameter.string_value() {
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            _ => Err(Error::InvalidRequest(format!(
                "'{}' must be a boolean",
                name
            ))),
        }
    }

    /// Boolean flag defaulting to false
    pub fn flag(&self, name: &str) -> Result<bool> {
        Ok(self.boolean(name)?.unwrap_or(false))
    }

    pub fn integer(&self, name: &str) -> Result<Option<i64>> {
        let Some(parameter) = self.first(name) else {
            return Ok(None);
        };
        if let Some(value) = INTEGER_KEYS
            .iter()
            .find_map(|key| parameter.value.get(*key).and_then(Value::as_i64))
        {
            return Ok(Some(value));
        }
        parameter
            .string_value()
            .and_then(|s| s.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| Error::InvalidRequest(format!("'{}' must be an integer", name)))
    }

    /// `valueDate` or the date part of a `valueDateTime`
    pub fn date(&self, name: &str) -> Result<Option<NaiveDate>> {
        let Some(parameter) = self.first(name) else {
            return Ok(None);
        };
        let raw = ["valueDate", "valueDateTime", "valueString"]
            .iter()
            .find_map(|key| parameter.value.get(*key).and_then(Value::as_str))
            .ok_or_else(|| Error::InvalidRequest(format!("'{}' must be a date", name)))?;
        let day = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| Error::InvalidRequest(format!("'{}' is not a valid date: {}", name, e)))
    }

    pub fn resource(&self, name: &str) -> Option<&Value> {
        self.first(name).and_then(|p| p.value.get("resource"))
    }

    /// `valueReference.reference`
    pub fn reference(&self, name: &str) -> Option<&str> {
        self.first(name)
            .and_then(|p| p.value.get("valueReference"))
            .and_then(|r| r.get("reference"))
            .and_then(Value::as_str)
    }

    /// Endpoint given either as an `Endpoint` resource or as a url value
    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        if let Some(address) = self
            .resource(name)
            .and_then(|r| r.get("address"))
            .and_then(Value::as_str)
        {
            return Some(Endpoint::new(address));
        }
        self.string(name).map(Endpoint::new)
    }
}
