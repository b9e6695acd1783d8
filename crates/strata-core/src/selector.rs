//! Target selectors for patches and replacements
//!
//! A [`TargetSelector`] is the declarative form read from a unit file. It is
//! compiled once into a [`CompiledSelector`] before being matched against a
//! [`ResourceSet`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{CoreError, Result};
use crate::resource::{ResId, Resource, ResourceSet};

/// Declarative resource predicate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Anchored regular expression over current and previous names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Anchored regular expression over current and previous namespaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_selector: Option<String>,

    /// Matching zero resources is not an error
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub allow_empty: bool,
}

impl TargetSelector {
    /// Selector for exactly one kind and name
    pub fn for_resource(kind: &str, name: &str, namespace: Option<&str>) -> Self {
        Self {
            kind: Some(kind.to_string()),
            name: Some(regex::escape(name)),
            namespace: namespace.map(regex::escape),
            ..Self::default()
        }
    }

    pub fn compile(&self) -> Result<CompiledSelector> {
        Ok(CompiledSelector {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
            name: self.name.as_deref().map(anchored).transpose()?,
            namespace: self.namespace.as_deref().map(anchored).transpose()?,
            labels: self
                .label_selector
                .as_deref()
                .map(parse_requirements)
                .transpose()?
                .unwrap_or_default(),
            annotations: self
                .annotation_selector
                .as_deref()
                .map(parse_requirements)
                .transpose()?
                .unwrap_or_default(),
            allow_empty: self.allow_empty,
        })
    }
}

impl std::fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        let fields = [
            ("group", &self.group),
            ("version", &self.version),
            ("kind", &self.kind),
            ("name", &self.name),
            ("namespace", &self.namespace),
            ("labelSelector", &self.label_selector),
            ("annotationSelector", &self.annotation_selector),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                parts.push(format!("{}={}", key, value));
            }
        }
        if parts.is_empty() {
            write!(f, "<all resources>")
        } else {
            write!(f, "{}", parts.join(","))
        }
    }
}

/// One term of a label or annotation selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    pub fn matches(&self, fields: Option<&Map<String, JsonValue>>) -> bool {
        let lookup = |key: &str| fields.and_then(|m| m.get(key)).and_then(JsonValue::as_str);
        match self {
            Requirement::Equals(key, value) => lookup(key) == Some(value.as_str()),
            Requirement::NotEquals(key, value) => lookup(key) != Some(value.as_str()),
            Requirement::In(key, values) => {
                lookup(key).is_some_and(|v| values.iter().any(|candidate| candidate == v))
            }
            Requirement::NotIn(key, values) => {
                lookup(key).is_none_or(|v| values.iter().all(|candidate| candidate != v))
            }
            Requirement::Exists(key) => lookup(key).is_some(),
            Requirement::DoesNotExist(key) => lookup(key).is_none(),
        }
    }
}

/// A selector ready for matching
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    group: Option<String>,
    version: Option<String>,
    kind: Option<String>,
    name: Option<Regex>,
    namespace: Option<Regex>,
    labels: Vec<Requirement>,
    annotations: Vec<Requirement>,
    allow_empty: bool,
}

impl CompiledSelector {
    pub fn allow_empty(&self) -> bool {
        self.allow_empty
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        let gvk = resource.gvk();
        if self.group.as_ref().is_some_and(|g| *g != gvk.group)
            || self.version.as_ref().is_some_and(|v| *v != gvk.version)
            || self.kind.as_ref().is_some_and(|k| *k != gvk.kind)
        {
            return false;
        }

        let identity_ok = resource.identities().any(|(name, namespace)| {
            let name_ok = self.name.as_ref().is_none_or(|re| re.is_match(name));
            let namespace_ok = self
                .namespace
                .as_ref()
                .is_none_or(|re| re.is_match(namespace.unwrap_or("default")));
            name_ok && namespace_ok
        });
        if !identity_ok {
            return false;
        }

        self.labels.iter().all(|r| r.matches(resource.labels()))
            && self
                .annotations
                .iter()
                .all(|r| r.matches(resource.annotations()))
    }

    /// Identities of every matching resource, in set order
    pub fn select(&self, resources: &ResourceSet) -> Vec<ResId> {
        resources
            .iter()
            .filter(|r| self.matches(r))
            .map(Resource::id)
            .collect()
    }
}

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| CoreError::InvalidSelector {
        message: format!("invalid pattern '{}': {}", pattern, e),
    })
}

/// Parse a Kubernetes-style selector: `app=web,tier!=db,env in (a,b),!legacy`
pub fn parse_requirements(selector: &str) -> Result<Vec<Requirement>> {
    let invalid = |term: &str| CoreError::InvalidSelector {
        message: format!("cannot parse '{}' in '{}'", term, selector),
    };

    let mut requirements = Vec::new();
    for term in split_terms(selector) {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }

        if let Some(key) = term.strip_prefix('!') {
            let key = key.trim();
            if key.is_empty() {
                return Err(invalid(term));
            }
            requirements.push(Requirement::DoesNotExist(key.to_string()));
        } else if let Some((key, value)) = term.split_once("!=") {
            requirements.push(Requirement::NotEquals(
                key.trim().to_string(),
                value.trim().to_string(),
            ));
        } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
            if key.trim().is_empty() {
                return Err(invalid(term));
            }
            requirements.push(Requirement::Equals(
                key.trim().to_string(),
                value.trim().to_string(),
            ));
        } else if let Some((key, values)) = split_set_term(term, " notin ") {
            requirements.push(Requirement::NotIn(key, values.ok_or_else(|| invalid(term))?));
        } else if let Some((key, values)) = split_set_term(term, " in ") {
            requirements.push(Requirement::In(key, values.ok_or_else(|| invalid(term))?));
        } else if term.chars().all(|c| c.is_alphanumeric() || "-_./".contains(c)) {
            requirements.push(Requirement::Exists(term.to_string()));
        } else {
            return Err(invalid(term));
        }
    }
    Ok(requirements)
}

/// Split on commas outside parentheses
fn split_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&selector[start..]);
    terms
}

fn split_set_term(term: &str, operator: &str) -> Option<(String, Option<Vec<String>>)> {
    let (key, rest) = term.split_once(operator)?;
    let values = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .map(|inner| {
            inner
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()
        });
    Some((key.trim().to_string(), values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(kind: &str, name: &str, labels: JsonValue) -> Resource {
        Resource::new(
            json!({
                "apiVersion": if kind == "Deployment" { "apps/v1" } else { "v1" },
                "kind": kind,
                "metadata": {"name": name, "labels": labels}
            }),
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_name_is_anchored() {
        let selector = TargetSelector {
            name: Some("web".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();

        assert!(selector.matches(&resource("Service", "web", json!({}))));
        assert!(!selector.matches(&resource("Service", "web-app", json!({}))));
    }

    #[test]
    fn test_matches_prior_name() {
        let mut web = resource("Deployment", "web", json!({}));
        web.rename("prod-web");

        let selector = TargetSelector::for_resource("Deployment", "web", None)
            .compile()
            .unwrap();
        assert!(selector.matches(&web));
    }

    #[test]
    fn test_group_version_kind() {
        let selector = TargetSelector {
            group: Some("apps".into()),
            kind: Some("Deployment".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(selector.matches(&resource("Deployment", "a", json!({}))));
        assert!(!selector.matches(&resource("Service", "a", json!({}))));
    }

    #[test]
    fn test_namespace_defaults() {
        let selector = TargetSelector {
            namespace: Some("default".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(selector.matches(&resource("Service", "a", json!({}))));
    }

    #[test]
    fn test_label_requirements() {
        let reqs = parse_requirements("app=web, tier in (front,edge),!legacy,env!=dev").unwrap();
        assert_eq!(
            reqs,
            vec![
                Requirement::Equals("app".into(), "web".into()),
                Requirement::In("tier".into(), vec!["front".into(), "edge".into()]),
                Requirement::DoesNotExist("legacy".into()),
                Requirement::NotEquals("env".into(), "dev".into()),
            ]
        );

        let selector = TargetSelector {
            label_selector: Some("app=web,tier in (front,edge)".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(selector.matches(&resource("Service", "a", json!({"app": "web", "tier": "edge"}))));
        assert!(!selector.matches(&resource("Service", "b", json!({"app": "web"}))));
    }

    #[test]
    fn test_notin_and_exists() {
        let reqs = parse_requirements("tier notin (db),app").unwrap();
        assert_eq!(
            reqs,
            vec![
                Requirement::NotIn("tier".into(), vec!["db".into()]),
                Requirement::Exists("app".into()),
            ]
        );
        assert!(parse_requirements("tier in db").is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = TargetSelector {
            name: Some("(".into()),
            ..Default::default()
        }
        .compile()
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSelector { .. }));
    }

    #[test]
    fn test_select_preserves_order() {
        let set: ResourceSet = [
            resource("Service", "b", json!({"app": "x"})),
            resource("Service", "a", json!({"app": "x"})),
            resource("Service", "c", json!({})),
        ]
        .into_iter()
        .collect();
        let selector = TargetSelector {
            label_selector: Some("app=x".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        let names: Vec<_> = selector.select(&set).into_iter().map(|id| id.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
