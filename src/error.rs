//! Structured error taxonomy shared by every component.
//!
//! Every failure in the data-plane pipeline is a `GatewayError` carrying a stable
//! `<COMPONENT>_<CATEGORY>_<NNN>` code, a human message, a `retryable` flag, and a
//! free-form context map for diagnostics. Components never raise raw exceptions;
//! this is the one error currency they trade in.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The component namespace a code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    StreamCache,
    Storage,
    SmartCache,
    DataMapper,
    SymbolTransformer,
}

impl Component {
    fn as_str(self) -> &'static str {
        match self {
            Component::StreamCache => "STREAM_CACHE",
            Component::Storage => "STORAGE",
            Component::SmartCache => "SMART_CACHE",
            Component::DataMapper => "DATA_MAPPER",
            Component::SymbolTransformer => "SYMBOL_TRANSFORMER",
        }
    }
}

/// The four error categories named in §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Validation,
    Business,
    System,
    External,
}

impl Category {
    fn as_str(self) -> &'static str {
        match self {
            Category::Validation => "VALIDATION",
            Category::Business => "BUSINESS",
            Category::System => "SYSTEM",
            Category::External => "EXTERNAL",
        }
    }

    /// Default retryability for a bare category, absent any code-specific override.
    fn default_retryable(self) -> bool {
        matches!(self, Category::System | Category::External)
    }
}

/// A stable `<COMPONENT>_<CATEGORY>_<NNN>` error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode {
    pub component: Component,
    pub category: Category,
    pub number: u16,
}

impl ErrorCode {
    pub const fn new(component: Component, category: Category, number: u16) -> Self {
        Self { component, category, number }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{:03}",
            self.component.as_str(),
            self.category.as_str(),
            self.number
        )
    }
}

/// Well-known codes referenced by name elsewhere in the codebase.
pub mod codes {
    use super::{Category, Component, ErrorCode};

    pub const SYMBOL_TRANSFORMER_VALIDATION_PATH_DEPTH: ErrorCode =
        ErrorCode::new(Component::SymbolTransformer, Category::Validation, 1);
    pub const SYMBOL_TRANSFORMER_VALIDATION_DANGEROUS_PATH: ErrorCode =
        ErrorCode::new(Component::SymbolTransformer, Category::Validation, 2);
    pub const SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT: ErrorCode =
        ErrorCode::new(Component::SymbolTransformer, Category::Validation, 3);
    pub const SYMBOL_TRANSFORMER_BUSINESS_RULE_NOT_FOUND: ErrorCode =
        ErrorCode::new(Component::SymbolTransformer, Category::Business, 1);
    pub const SYMBOL_TRANSFORMER_BUSINESS_BATCH_SIZE_EXCEEDED: ErrorCode =
        ErrorCode::new(Component::SymbolTransformer, Category::Business, 2);
    pub const SYMBOL_TRANSFORMER_BUSINESS_RECURSIVE_APPLY: ErrorCode =
        ErrorCode::new(Component::SymbolTransformer, Category::Business, 3);
    pub const SYMBOL_TRANSFORMER_VALIDATION_SYMBOL_FORMAT: ErrorCode =
        ErrorCode::new(Component::SymbolTransformer, Category::Validation, 4);
    pub const SYMBOL_TRANSFORMER_BUSINESS_PROVIDER_RULES_NOT_FOUND: ErrorCode =
        ErrorCode::new(Component::SymbolTransformer, Category::Business, 4);

    pub const STORAGE_EXTERNAL_BACKEND_UNAVAILABLE: ErrorCode =
        ErrorCode::new(Component::Storage, Category::External, 1);
    pub const STORAGE_SYSTEM_TIMEOUT: ErrorCode =
        ErrorCode::new(Component::Storage, Category::System, 1);
    pub const STORAGE_SYSTEM_INTERNAL: ErrorCode =
        ErrorCode::new(Component::Storage, Category::System, 2);
    pub const STORAGE_VALIDATION_KEY_TOO_LONG: ErrorCode =
        ErrorCode::new(Component::Storage, Category::Validation, 1);

    pub const DATA_MAPPER_SYSTEM_SCAN_CIRCUIT_OPEN: ErrorCode =
        ErrorCode::new(Component::DataMapper, Category::System, 1);
    pub const DATA_MAPPER_BUSINESS_RULE_NOT_FOUND: ErrorCode =
        ErrorCode::new(Component::DataMapper, Category::Business, 1);

    pub const SMART_CACHE_SYSTEM_FETCH_TIMEOUT: ErrorCode =
        ErrorCode::new(Component::SmartCache, Category::System, 1);
    pub const SMART_CACHE_EXTERNAL_FETCH_FAILED: ErrorCode =
        ErrorCode::new(Component::SmartCache, Category::External, 1);
    pub const SMART_CACHE_BUSINESS_NO_FALLBACK: ErrorCode =
        ErrorCode::new(Component::SmartCache, Category::Business, 1);
    pub const SMART_CACHE_BUSINESS_MARKET_NOT_CONFIGURED: ErrorCode =
        ErrorCode::new(Component::SmartCache, Category::Business, 2);

    pub const STREAM_CACHE_VALIDATION_SYMBOL_FORMAT: ErrorCode =
        ErrorCode::new(Component::StreamCache, Category::Validation, 1);
    pub const STREAM_CACHE_SYSTEM_CIRCUIT_OPEN: ErrorCode =
        ErrorCode::new(Component::StreamCache, Category::System, 1);
    pub const STREAM_CACHE_BUSINESS_RECOVERY_WINDOW_EXCEEDED: ErrorCode =
        ErrorCode::new(Component::StreamCache, Category::Business, 1);
    pub const STREAM_CACHE_SYSTEM_RATE_LIMITED: ErrorCode =
        ErrorCode::new(Component::StreamCache, Category::System, 2);
}

/// The structured error every component returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub context: BTreeMap<String, Value>,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            retryable: code.category.default_retryable(),
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_formats_as_component_category_number() {
        let code = codes::STREAM_CACHE_SYSTEM_RATE_LIMITED;
        assert_eq!(code.to_string(), "STREAM_CACHE_SYSTEM_002");
    }

    #[test]
    fn category_default_retryable() {
        let external = GatewayError::new(codes::STORAGE_EXTERNAL_BACKEND_UNAVAILABLE, "down");
        assert!(external.retryable);
        let validation =
            GatewayError::new(codes::SYMBOL_TRANSFORMER_VALIDATION_PATH_DEPTH, "too deep");
        assert!(!validation.retryable);
    }

    #[test]
    fn retryable_override_sticks() {
        let err = GatewayError::new(codes::SMART_CACHE_BUSINESS_NO_FALLBACK, "no fallback")
            .retryable(false);
        assert!(!err.retryable);
    }
}
