// Helper functions for extracting values from KDL nodes

use kdl::KdlNode;

use crate::{ConfigError, ConfigResult};

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// A bare node (`prune`) counts as `true`.
pub(crate) fn get_flag(node: &KdlNode) -> ConfigResult<bool> {
    match node.entries().iter().find(|e| e.name().is_none()) {
        None => Ok(true),
        Some(entry) => entry.value().as_bool().ok_or_else(|| ConfigError::InvalidValue {
            field: node.name().value().to_string(),
            message: "expected #true or #false".to_string(),
        }),
    }
}

pub(crate) fn get_required_string(node: &KdlNode) -> ConfigResult<String> {
    get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("{} value", node.name().value())))
}

pub(crate) fn get_unsigned(node: &KdlNode) -> ConfigResult<u64> {
    let field = node.name().value().to_string();
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(format!("{field} value")))?
        .value();

    value
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            field,
            message: "expected a non-negative integer".to_string(),
        })
}

pub(crate) fn get_number(node: &KdlNode) -> ConfigResult<f64> {
    let field = node.name().value().to_string();
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(format!("{field} value")))?
        .value();

    value
        .as_integer()
        .map(|i| i as f64)
        .or_else(|| value.as_float())
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| ConfigError::InvalidValue {
            field,
            message: "expected a finite non-negative number".to_string(),
        })
}
