//! Pure value transforms applied during mapping (§3, §4.A). Transforms never fail:
//! an operand that cannot be coerced passes the original value through and records
//! a warning, rather than aborting the whole record.

use serde_json::Value;

use super::model::Transform;

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Applies `transform` to `value`, returning the transformed value and, if the
/// transform could not be applied cleanly, a warning describing why.
pub fn apply(transform: &Transform, value: &Value) -> (Value, Option<String>) {
    match transform {
        Transform::None => (value.clone(), None),

        Transform::Multiply { value: factor } => match as_f64(value) {
            Some(n) => (Value::from(n * factor), None),
            None => (value.clone(), Some(format!("cannot multiply non-numeric value {value}"))),
        },

        Transform::Divide { value: divisor } => {
            if *divisor == 0.0 {
                return (value.clone(), Some("division by zero; source value passed through".into()));
            }
            match as_f64(value) {
                Some(n) => (Value::from(n / divisor), None),
                None => (value.clone(), Some(format!("cannot divide non-numeric value {value}"))),
            }
        }

        Transform::Add { value: addend } => match as_f64(value) {
            Some(n) => (Value::from(n + addend), None),
            None => (value.clone(), Some(format!("cannot add to non-numeric value {value}"))),
        },

        Transform::Subtract { value: subtrahend } => match as_f64(value) {
            Some(n) => (Value::from(n - subtrahend), None),
            None => (value.clone(), Some(format!("cannot subtract from non-numeric value {value}"))),
        },

        Transform::Format { template } => {
            (Value::String(template.replace("{value}", &display(value))), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multiply_coerces_numeric_strings() {
        let (out, warn) = apply(&Transform::Multiply { value: 2.0 }, &json!("1.5"));
        assert_eq!(out, json!(3.0));
        assert!(warn.is_none());
    }

    #[test]
    fn divide_by_zero_passes_through_with_warning() {
        let (out, warn) = apply(&Transform::Divide { value: 0.0 }, &json!(10));
        assert_eq!(out, json!(10));
        assert!(warn.is_some());
    }

    #[test]
    fn non_numeric_multiply_passes_through_with_warning() {
        let (out, warn) = apply(&Transform::Multiply { value: 2.0 }, &json!("abc"));
        assert_eq!(out, json!("abc"));
        assert!(warn.is_some());
    }

    #[test]
    fn format_substitutes_value_placeholder() {
        let (out, warn) =
            apply(&Transform::Format { template: "${value}".into() }, &json!(1.2345));
        assert_eq!(out, json!("$1.2345"));
        assert!(warn.is_none());
    }
}
