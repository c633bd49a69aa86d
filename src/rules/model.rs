//! The immutable `MappingRule` / `FieldMapping` data model (§3).

use serde::{Deserialize, Serialize};

use crate::ports::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    Rest,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleListType {
    QuoteFields,
    BasicInfoFields,
    IndexFields,
    MarketStatusFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Draft,
    Testing,
    Active,
    Inactive,
    Deprecated,
    Error,
}

/// A numeric/string transform applied to a mapped field. `custom` transforms from
/// upstream rule authors are rejected at load time (§1 non-goals: no scripting
/// engine) — see `Transform::from_wire`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    None,
    Multiply { value: f64 },
    Divide { value: f64 },
    Add { value: f64 },
    Subtract { value: f64 },
    Format { template: String },
}

/// Wire representation that additionally accepts (and rejects) a `custom` variant,
/// so the rejection is an explicit, recorded validation failure rather than a
/// silent `serde` deserialization error with no diagnostic context.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireTransform {
    None,
    Multiply { value: f64 },
    Divide { value: f64 },
    Add { value: f64 },
    Subtract { value: f64 },
    Format { template: String },
    Custom { #[serde(default)] script: Option<String> },
}

impl Transform {
    pub fn from_wire_json(value: &serde_json::Value) -> Result<Self, String> {
        let wire: WireTransform = serde_json::from_value(value.clone())
            .map_err(|e| format!("malformed transform: {e}"))?;
        match wire {
            WireTransform::None => Ok(Transform::None),
            WireTransform::Multiply { value } => Ok(Transform::Multiply { value }),
            WireTransform::Divide { value } => Ok(Transform::Divide { value }),
            WireTransform::Add { value } => Ok(Transform::Add { value }),
            WireTransform::Subtract { value } => Ok(Transform::Subtract { value }),
            WireTransform::Format { template } => Ok(Transform::Format { template }),
            WireTransform::Custom { .. } => {
                Err("custom transforms are rejected: not a general scripting engine".to_string())
            }
        }
    }
}

/// One `sourcePath -> targetPath` rewrite, with an optional transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_path: String,
    pub target_path: String,
    #[serde(default = "default_transform")]
    pub transform: Transform,
}

fn default_transform() -> Transform {
    Transform::None
}

/// Immutable snapshot of a mapping rule (§3). Updates create a new version rather
/// than mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: String,
    pub provider: Provider,
    pub api_type: ApiType,
    pub rule_list_type: RuleListType,
    pub is_default: bool,
    pub status: RuleStatus,
    pub field_mappings: Vec<FieldMapping>,
    pub version: u32,
    pub updated_at_millis: i64,
}

impl MappingRule {
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }
}
