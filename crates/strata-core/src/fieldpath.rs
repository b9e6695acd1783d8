//! Structured paths into a resource body
//!
//! Two textual forms are accepted:
//! - JSON Pointer (RFC 6901), used by JSON Patch: `/spec/containers/0/image`
//! - Dotted paths, used by replacements: `spec.containers.[name=app].image`
//!
//! Both parse into the same [`FieldPath`] so patch and replacement code share
//! one resolver.

use serde_json::{Map, Value as JsonValue};
use std::fmt;

use crate::error::{CoreError, Result};

/// One step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Map key, or sequence index when applied to a sequence
    Key(String),

    /// Position past the end of a sequence (JSON Patch `-`)
    Append,

    /// First sequence element whose `key` field equals `value`
    Match { key: String, value: String },

    /// Every entry of a map or sequence
    Wildcard,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Append => write!(f, "-"),
            Segment::Match { key, value } => write!(f, "[{}={}]", key, value),
            Segment::Wildcard => write!(f, "*"),
        }
    }
}

/// A pointer into a resource body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The path addressing the whole document
    pub fn root() -> Self {
        Self {
            raw: String::new(),
            segments: Vec::new(),
        }
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        let raw = segments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self { raw, segments }
    }

    /// Parse an RFC 6901 JSON Pointer
    pub fn from_pointer(pointer: &str) -> Result<Self> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(CoreError::InvalidFieldPath {
                path: pointer.to_string(),
                message: "JSON pointer must start with '/'".to_string(),
            });
        };

        let mut segments = Vec::new();
        for token in rest.split('/') {
            let token = unescape_pointer_token(token).ok_or_else(|| {
                CoreError::InvalidFieldPath {
                    path: pointer.to_string(),
                    message: format!("invalid escape in '{}'", token),
                }
            })?;
            if token == "-" {
                segments.push(Segment::Append);
            } else {
                segments.push(Segment::Key(token));
            }
        }

        Ok(Self {
            raw: pointer.to_string(),
            segments,
        })
    }

    /// Parse a dotted path with optional `[key=value]` element matchers
    ///
    /// A bracketed token without `=` is a literal key, which allows keys that
    /// contain dots: `metadata.annotations.[example.com/owner]`.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidFieldPath {
            path: path.to_string(),
            message: message.to_string(),
        };

        if path.trim().is_empty() {
            return Err(invalid("empty path"));
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = path.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if current.is_empty() {
                        return Err(invalid("empty segment"));
                    }
                    segments.push(plain_segment(std::mem::take(&mut current)));
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(plain_segment(std::mem::take(&mut current)));
                    }
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(invalid("unterminated '['")),
                        }
                    }
                    segments.push(bracket_segment(&inner).ok_or_else(|| invalid("empty brackets"))?);
                    match chars.peek() {
                        Some('.') => {
                            chars.next();
                            if chars.peek().is_none() {
                                return Err(invalid("trailing '.'"));
                            }
                        }
                        Some('[') | None => {}
                        Some(_) => return Err(invalid("expected '.' after ']'")),
                    }
                }
                other => current.push(other),
            }
        }
        if !current.is_empty() {
            segments.push(plain_segment(current));
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Read the value at this path
    pub fn get<'a>(&self, root: &'a JsonValue) -> Result<&'a JsonValue> {
        let mut current = root;
        for (i, segment) in self.segments.iter().enumerate() {
            current = step(current, segment).ok_or_else(|| self.not_found(i))?;
        }
        Ok(current)
    }

    /// Mutable access to the value at this path
    pub fn get_mut<'a>(&self, root: &'a mut JsonValue) -> Result<&'a mut JsonValue> {
        let mut current = root;
        for (i, segment) in self.segments.iter().enumerate() {
            match step_mut(current, segment) {
                Some(next) => current = next,
                None => return Err(self.not_found(i)),
            }
        }
        Ok(current)
    }

    /// Resolve every segment but the last
    ///
    /// Intermediate segments must already exist. Returns the container that
    /// holds the final segment, plus that segment.
    pub fn parent_mut<'a, 's>(
        &'s self,
        root: &'a mut JsonValue,
    ) -> Result<(&'a mut JsonValue, &'s Segment)> {
        let Some((last, parents)) = self.segments.split_last() else {
            return Err(CoreError::InvalidFieldPath {
                path: self.raw.clone(),
                message: "path addresses the document root".to_string(),
            });
        };

        let mut current = root;
        for (i, segment) in parents.iter().enumerate() {
            match step_mut(current, segment) {
                Some(next) => current = next,
                None => return Err(self.not_found(i)),
            }
        }
        Ok((current, last))
    }

    /// Write `value` at this path
    ///
    /// Without `create` every segment must already resolve. With `create`,
    /// missing maps, sequences and `[key=value]` elements are created.
    pub fn set(&self, root: &mut JsonValue, value: JsonValue, create: bool) -> Result<()> {
        let Some((last, parents)) = self.segments.split_last() else {
            *root = value;
            return Ok(());
        };

        let mut current = root;
        for (i, segment) in parents.iter().enumerate() {
            let next_segment = &self.segments[i + 1];
            current = if create {
                self.step_or_create(current, segment, next_segment, i)?
            } else {
                match step_mut(current, segment) {
                    Some(next) => next,
                    None => return Err(self.not_found(i)),
                }
            };
        }

        let last_index = self.segments.len() - 1;
        if create && current.is_null() {
            *current = empty_container_for(last);
        }

        match (current, last) {
            (JsonValue::Object(map), Segment::Key(key)) => {
                if !create && !map.contains_key(key) {
                    return Err(self.not_found(last_index));
                }
                map.insert(key.clone(), value);
                Ok(())
            }
            (JsonValue::Array(items), Segment::Key(key)) => {
                let slot = parse_index(key)
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| self.not_found(last_index))?;
                *slot = value;
                Ok(())
            }
            (JsonValue::Array(items), Segment::Match { key, value: expected }) => {
                match items.iter_mut().find(|item| element_matches(item, key, expected)) {
                    Some(slot) => *slot = value,
                    None if create => items.push(value),
                    None => return Err(self.not_found(last_index)),
                }
                Ok(())
            }
            (JsonValue::Array(items), Segment::Append) => {
                items.push(value);
                Ok(())
            }
            (_, Segment::Wildcard) => Err(CoreError::InvalidFieldPath {
                path: self.raw.clone(),
                message: "cannot write through a wildcard".to_string(),
            }),
            _ => Err(self.type_mismatch(last_index, "a map or sequence")),
        }
    }

    /// Mutable access to the map at this path, creating missing maps
    pub fn ensure_map<'a>(&self, root: &'a mut JsonValue) -> Result<&'a mut Map<String, JsonValue>> {
        let mut current = root;
        for (i, segment) in self.segments.iter().enumerate() {
            let next_segment = self.segments.get(i + 1).unwrap_or(&Segment::Wildcard);
            current = self.step_or_create(current, segment, next_segment, i)?;
        }
        if current.is_null() {
            *current = JsonValue::Object(Map::new());
        }
        match current {
            JsonValue::Object(map) => Ok(map),
            _ => Err(self.type_mismatch(self.segments.len().saturating_sub(1), "a map")),
        }
    }

    /// Call `f` on every value this path reaches, expanding wildcards
    ///
    /// Branches that do not resolve are skipped. Returns how many values
    /// were visited, so callers can reject a path that reached nothing.
    pub fn visit_mut(
        &self,
        root: &mut JsonValue,
        f: &mut dyn FnMut(&mut JsonValue) -> Result<()>,
    ) -> Result<usize> {
        visit_segments(root, &self.segments, f)
    }

    /// The error reported for a path that reached no value
    pub fn unresolved(&self) -> CoreError {
        CoreError::PathNotFound {
            path: self.raw.clone(),
            segment: self.raw.clone(),
        }
    }

    fn step_or_create<'a>(
        &self,
        current: &'a mut JsonValue,
        segment: &Segment,
        next_segment: &Segment,
        index: usize,
    ) -> Result<&'a mut JsonValue> {
        if current.is_null() {
            *current = empty_container_for(segment);
        }

        match (current, segment) {
            (JsonValue::Object(map), Segment::Key(key)) => Ok(map
                .entry(key.clone())
                .or_insert_with(|| empty_container_for(next_segment))),
            (JsonValue::Array(items), Segment::Key(key)) => parse_index(key)
                .and_then(move |i| items.get_mut(i))
                .ok_or_else(|| self.not_found(index)),
            (JsonValue::Array(items), Segment::Match { key, value }) => {
                let position = items
                    .iter()
                    .position(|item| element_matches(item, key, value));
                let position = match position {
                    Some(position) => position,
                    None => {
                        let mut element = Map::new();
                        element.insert(key.clone(), JsonValue::String(value.clone()));
                        items.push(JsonValue::Object(element));
                        items.len() - 1
                    }
                };
                Ok(&mut items[position])
            }
            (JsonValue::Array(items), Segment::Append) => {
                items.push(empty_container_for(next_segment));
                let last = items.len() - 1;
                Ok(&mut items[last])
            }
            (_, Segment::Wildcard) => Err(CoreError::InvalidFieldPath {
                path: self.raw.clone(),
                message: "cannot create through a wildcard".to_string(),
            }),
            _ => Err(self.type_mismatch(index, "a map or sequence")),
        }
    }

    fn prefix(&self, index: usize) -> String {
        FieldPath::from_segments(self.segments[..=index].to_vec()).raw
    }

    fn not_found(&self, index: usize) -> CoreError {
        CoreError::PathNotFound {
            path: self.raw.clone(),
            segment: self.prefix(index),
        }
    }

    fn type_mismatch(&self, index: usize, expected: &str) -> CoreError {
        CoreError::TypeMismatch {
            path: if self.segments.is_empty() {
                self.raw.clone()
            } else {
                self.prefix(index)
            },
            expected: expected.to_string(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

impl std::str::FromStr for FieldPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with('/') {
            Self::from_pointer(s)
        } else {
            Self::parse(s)
        }
    }
}

/// Parse a sequence index: digits only, no leading zeros
pub fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    token.parse().ok()
}

/// Compare a scalar field against the textual value of a `[key=value]` matcher
pub fn scalar_matches(field: &JsonValue, expected: &str) -> bool {
    match field {
        JsonValue::String(s) => s == expected,
        JsonValue::Number(n) => n.to_string() == expected,
        JsonValue::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

fn element_matches(item: &JsonValue, key: &str, expected: &str) -> bool {
    item.get(key).is_some_and(|field| scalar_matches(field, expected))
}

fn step<'a>(value: &'a JsonValue, segment: &Segment) -> Option<&'a JsonValue> {
    match (value, segment) {
        (JsonValue::Object(map), Segment::Key(key)) => map.get(key),
        (JsonValue::Array(items), Segment::Key(key)) => parse_index(key).and_then(|i| items.get(i)),
        (JsonValue::Array(items), Segment::Match { key, value }) => {
            items.iter().find(|item| element_matches(item, key, value))
        }
        _ => None,
    }
}

fn step_mut<'a>(value: &'a mut JsonValue, segment: &Segment) -> Option<&'a mut JsonValue> {
    match (value, segment) {
        (JsonValue::Object(map), Segment::Key(key)) => map.get_mut(key),
        (JsonValue::Array(items), Segment::Key(key)) => {
            parse_index(key).and_then(move |i| items.get_mut(i))
        }
        (JsonValue::Array(items), Segment::Match { key, value }) => items
            .iter_mut()
            .find(|item| element_matches(item, key, value)),
        _ => None,
    }
}

fn visit_segments(
    value: &mut JsonValue,
    segments: &[Segment],
    f: &mut dyn FnMut(&mut JsonValue) -> Result<()>,
) -> Result<usize> {
    let Some((first, rest)) = segments.split_first() else {
        f(value)?;
        return Ok(1);
    };

    let mut visited = 0;
    match (value, first) {
        (JsonValue::Array(items), Segment::Wildcard) => {
            for item in items {
                visited += visit_segments(item, rest, f)?;
            }
        }
        (JsonValue::Object(map), Segment::Wildcard) => {
            for item in map.values_mut() {
                visited += visit_segments(item, rest, f)?;
            }
        }
        (value, segment) => {
            if let Some(next) = step_mut(value, segment) {
                visited += visit_segments(next, rest, f)?;
            }
        }
    }
    Ok(visited)
}

fn empty_container_for(segment: &Segment) -> JsonValue {
    match segment {
        Segment::Append | Segment::Match { .. } => JsonValue::Array(Vec::new()),
        Segment::Key(_) | Segment::Wildcard => JsonValue::Object(Map::new()),
    }
}

fn plain_segment(token: String) -> Segment {
    match token.as_str() {
        "*" => Segment::Wildcard,
        "-" => Segment::Append,
        _ => Segment::Key(token),
    }
}

fn bracket_segment(inner: &str) -> Option<Segment> {
    if inner.is_empty() {
        return None;
    }
    match inner.split_once('=') {
        Some((key, value)) if !key.is_empty() => Some(Segment::Match {
            key: key.to_string(),
            value: value.to_string(),
        }),
        _ => Some(Segment::Key(inner.to_string())),
    }
}

fn unescape_pointer_token(token: &str) -> Option<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> JsonValue {
        json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [
                            {"name": "app", "image": "nginx:1.0", "env": [{"name": "A", "value": "1"}]},
                            {"name": "sidecar", "image": "envoy:1.2"}
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn test_pointer_escapes() {
        let path = FieldPath::from_pointer("/metadata/annotations/a~1b~0c").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("metadata".into()),
                Segment::Key("annotations".into()),
                Segment::Key("a/b~c".into()),
            ]
        );
        assert!(FieldPath::from_pointer("/bad~2").is_err());
        assert!(FieldPath::from_pointer("no-slash").is_err());
        assert!(FieldPath::from_pointer("").unwrap().is_root());
    }

    #[test]
    fn test_pointer_append_marker() {
        let path = FieldPath::from_pointer("/items/-").unwrap();
        assert_eq!(path.segments().last(), Some(&Segment::Append));
    }

    #[test]
    fn test_dotted_with_matchers() {
        let path =
            FieldPath::parse("spec.template.spec.containers.[name=app].env.[name=A].value").unwrap();
        assert_eq!(path.segments().len(), 8);
        assert_eq!(
            path.segments()[4],
            Segment::Match {
                key: "name".into(),
                value: "app".into()
            }
        );
        assert_eq!(path.get(&deployment()).unwrap(), "1");
    }

    #[test]
    fn test_dotted_bracketed_key() {
        let path = FieldPath::parse("metadata.annotations.[example.com/owner]").unwrap();
        assert_eq!(path.segments()[2], Segment::Key("example.com/owner".into()));
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("a.[b").is_err());
        assert!(FieldPath::parse("").is_err());
    }

    #[test]
    fn test_get_by_index() {
        let value = deployment();
        let path = FieldPath::from_pointer("/spec/template/spec/containers/1/image").unwrap();
        assert_eq!(path.get(&value).unwrap(), "envoy:1.2");

        let missing = FieldPath::from_pointer("/spec/template/spec/containers/5/image").unwrap();
        match missing.get(&value).unwrap_err() {
            CoreError::PathNotFound { segment, .. } => {
                assert_eq!(segment, "spec.template.spec.containers.5");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_requires_existing_without_create() {
        let mut value = deployment();
        let path = FieldPath::parse("spec.replicas").unwrap();
        assert!(path.set(&mut value, json!(3), false).is_err());

        path.set(&mut value, json!(3), true).unwrap();
        assert_eq!(value["spec"]["replicas"], 3);
    }

    #[test]
    fn test_set_creates_matched_elements() {
        let mut value = deployment();
        let path =
            FieldPath::parse("spec.template.spec.containers.[name=app].env.[name=B].value").unwrap();
        path.set(&mut value, json!("2"), true).unwrap();

        let env = &value["spec"]["template"]["spec"]["containers"][0]["env"];
        assert_eq!(env[1], json!({"name": "B", "value": "2"}));
    }

    #[test]
    fn test_visit_wildcards() {
        let mut value = deployment();
        let path = FieldPath::parse("spec.template.spec.containers.*.image").unwrap();
        let mut seen = Vec::new();
        let visited = path
            .visit_mut(&mut value, &mut |v| {
                seen.push(v.as_str().unwrap_or_default().to_string());
                *v = json!("redacted");
                Ok(())
            })
            .unwrap();

        assert_eq!(visited, 2);
        assert_eq!(seen, vec!["nginx:1.0", "envoy:1.2"]);

        let none = FieldPath::parse("spec.template.spec.initContainers.*.image").unwrap();
        assert_eq!(none.visit_mut(&mut value, &mut |_| Ok(())).unwrap(), 0);
        assert_eq!(value["spec"]["template"]["spec"]["containers"][1]["image"], "redacted");
    }

    #[test]
    fn test_ensure_map() {
        let mut value = json!({"metadata": {"name": "x"}});
        let path = FieldPath::parse("spec.selector.matchLabels").unwrap();
        path.ensure_map(&mut value)
            .unwrap()
            .insert("app".into(), json!("web"));
        assert_eq!(value["spec"]["selector"]["matchLabels"]["app"], "web");
    }

    #[test]
    fn test_parse_index_rejects_leading_zero() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("12"), Some(12));
        assert_eq!(parse_index("01"), None);
        assert_eq!(parse_index("-1"), None);
    }
}
