//! Compiled path matchers (§9 "reflection-heavy path traversal → compiled
//! matchers"). A `sourcePath`/`targetPath` string compiles once into a `Vec<Segment>`
//! and is applied without re-parsing per record.

use serde_json::Value;

use crate::error::{codes, GatewayError};

pub const MAX_PATH_DEPTH: usize = 10;

const DANGEROUS_KEYS: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Case-insensitive, snake/camel-tolerant field access.
    Field(String),
    /// A literal numeric index, e.g. `price[0]`.
    Index(usize),
    /// An elementwise marker, e.g. `secu_quote[]`: apply to every element.
    Wildcard,
}

/// A compiled path: its segments plus whether it exceeded `MAX_PATH_DEPTH`.
/// Over-depth paths are not a hard error (§3: "exceeding the bound yields
/// `undefined` and a warning") — they compile, but `resolve` on them always misses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPath {
    pub segments: Vec<Segment>,
    pub raw: String,
    pub within_depth: bool,
}

/// Normalizes a field name for snake_case/camelCase-tolerant, case-insensitive
/// comparison: lowercase, strip underscores.
fn normalize(name: &str) -> String {
    name.chars().filter(|c| *c != '_').flat_map(|c| c.to_lowercase()).collect()
}

fn is_dangerous(name: &str) -> bool {
    DANGEROUS_KEYS.iter().any(|d| d.eq_ignore_ascii_case(name))
}

/// Compile a dot/bracket path. Example inputs: `"price"`, `"secu_quote[].last_done"`,
/// `"levels[0].price"`.
pub fn compile(path: &str) -> Result<CompiledPath, GatewayError> {
    let mut segments = Vec::new();

    for token in path.split('.') {
        if token.is_empty() {
            continue;
        }
        let (field_part, bracket_part) = match token.find('[') {
            Some(idx) => (&token[..idx], &token[idx..]),
            None => (token, ""),
        };

        if !field_part.is_empty() {
            if is_dangerous(field_part) {
                return Err(GatewayError::new(
                    codes::SYMBOL_TRANSFORMER_VALIDATION_DANGEROUS_PATH,
                    format!("path '{path}' touches a disallowed key '{field_part}'"),
                )
                .retryable(false)
                .with_context("path", path));
            }
            segments.push(Segment::Field(field_part.to_string()));
        }

        // A token may carry multiple bracket groups, e.g. "a[0][1]" (not expected
        // for this domain's rules, but parsed uniformly rather than rejected).
        let mut rest = bracket_part;
        while let Some(open) = rest.find('[') {
            let close = rest[open..]
                .find(']')
                .map(|c| open + c)
                .ok_or_else(|| {
                    GatewayError::new(
                        codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
                        format!("unterminated '[' in path '{path}'"),
                    )
                    .retryable(false)
                })?;
            let inner = &rest[open + 1..close];
            if inner.is_empty() {
                segments.push(Segment::Wildcard);
            } else {
                let idx: usize = inner.parse().map_err(|_| {
                    GatewayError::new(
                        codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
                        format!("non-numeric index '{inner}' in path '{path}'"),
                    )
                    .retryable(false)
                })?;
                segments.push(Segment::Index(idx));
            }
            rest = &rest[close + 1..];
        }
    }

    let within_depth = segments.len() <= MAX_PATH_DEPTH;
    Ok(CompiledPath { segments, raw: path.to_string(), within_depth })
}

fn lookup_field_ci<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    let target = normalize(name);
    value.as_object()?.iter().find(|(k, _)| normalize(k) == target).map(|(_, v)| v)
}

/// Resolve a compiled path against `root`. `wildcard_index` supplies the element
/// index to use whenever a `Segment::Wildcard` is encountered (the caller has
/// already determined the iteration length via `array_length_at`).
pub fn resolve(root: &Value, path: &CompiledPath, wildcard_index: Option<usize>) -> Option<Value> {
    if !path.within_depth {
        return None;
    }
    let mut current = root;
    for seg in &path.segments {
        current = match seg {
            Segment::Field(name) => lookup_field_ci(current, name)?,
            Segment::Index(i) => current.as_array()?.get(*i)?,
            Segment::Wildcard => current.as_array()?.get(wildcard_index?)?,
        };
    }
    Some(current.clone())
}

/// If `path` contains a `Wildcard`, resolves the array it refers to and returns its
/// length; used to determine how many output records an elementwise mapping
/// produces.
pub fn array_length_at(root: &Value, path: &CompiledPath) -> Option<usize> {
    let wildcard_pos = path.segments.iter().position(|s| *s == Segment::Wildcard)?;
    let prefix = CompiledPath {
        segments: path.segments[..wildcard_pos].to_vec(),
        raw: path.raw.clone(),
        within_depth: true,
    };
    resolve(root, &prefix, None).and_then(|v| v.as_array().map(|a| a.len()))
}

/// Write `value` into `target` at the compiled path, creating intermediate objects
/// as needed. Only `Field` segments are supported as write targets (targets are
/// always canonical object field names per §3/§4.A).
pub fn write(target: &mut Value, path: &CompiledPath, value: Value) {
    if !path.within_depth || path.segments.is_empty() {
        return;
    }
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    let mut current = target;
    let last = path.segments.len() - 1;
    for (i, seg) in path.segments.iter().enumerate() {
        let Segment::Field(name) = seg else { return };
        let obj = current.as_object_mut().expect("ensured object above");
        if i == last {
            obj.insert(name.clone(), value);
            return;
        }
        current = obj
            .entry(name.clone())
            .or_insert_with(|| Value::Object(Default::default()));
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compiles_wildcard_and_index() {
        let p = compile("secu_quote[].last_done").unwrap();
        assert_eq!(
            p.segments,
            vec![Segment::Field("secu_quote".into()), Segment::Wildcard, Segment::Field("last_done".into())]
        );
    }

    #[test]
    fn rejects_dangerous_key() {
        let err = compile("__proto__.polluted").unwrap_err();
        assert_eq!(err.code, codes::SYMBOL_TRANSFORMER_VALIDATION_DANGEROUS_PATH);
    }

    #[test]
    fn case_and_style_tolerant_lookup() {
        let root = json!({"LastDone": "1.23"});
        let p = compile("last_done").unwrap();
        assert_eq!(resolve(&root, &p, None), Some(json!("1.23")));
    }

    #[test]
    fn depth_exactly_ten_succeeds_eleven_warns() {
        let ten = (0..10).map(|i| format!("f{i}")).collect::<Vec<_>>().join(".");
        let p10 = compile(&ten).unwrap();
        assert!(p10.within_depth);

        let eleven = (0..11).map(|i| format!("f{i}")).collect::<Vec<_>>().join(".");
        let p11 = compile(&eleven).unwrap();
        assert!(!p11.within_depth);
        assert_eq!(resolve(&json!({}), &p11, None), None);
    }

    #[test]
    fn array_length_from_wildcard_prefix() {
        let root = json!({"secu_quote": [{"last_done": "1"}, {"last_done": "2"}]});
        let p = compile("secu_quote[].last_done").unwrap();
        assert_eq!(array_length_at(&root, &p), Some(2));
        assert_eq!(resolve(&root, &p, Some(1)), Some(json!("2")));
    }

    #[test]
    fn write_creates_intermediate_objects() {
        let mut target = json!({});
        let p = compile("quote.price").unwrap();
        write(&mut target, &p, json!(1.5));
        assert_eq!(target, json!({"quote": {"price": 1.5}}));
    }
}
