//! Resource model
//!
//! A [`Resource`] is one Kubernetes manifest: an ordered field tree plus the
//! identity derived from it (`group/version/kind`, namespace, name). A
//! [`ResourceSet`] is the ordered, identity-keyed collection a build produces.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

use crate::error::{CoreError, Result};

/// Kinds that never carry a namespace
pub const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "CSIDriver",
    "CSINode",
    "CertificateSigningRequest",
    "ClusterIssuer",
    "ClusterRole",
    "ClusterRoleBinding",
    "ComponentStatus",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
];

/// Group, version and kind of a resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Split an `apiVersion` such as `apps/v1` into group and version
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// Render back to the `apiVersion` field form
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        CLUSTER_SCOPED_KINDS.contains(&self.kind.as_str())
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.kind, self.version)
        } else {
            write!(f, "{}.{}.{}", self.kind, self.version, self.group)
        }
    }
}

/// Identity of a resource within a build
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResId {
    pub gvk: Gvk,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResId {
    pub fn new(gvk: Gvk, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.gvk, ns, self.name),
            None => write!(f, "{}/{}", self.gvk, self.name),
        }
    }
}

/// A name/namespace pair a resource carried before a transformer changed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorName {
    pub name: String,
    pub namespace: Option<String>,
}

/// Bookkeeping attached to resources produced by a generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMeta {
    /// Name declared by the generator, before prefix, suffix or hash
    pub generator: String,

    /// Append a content hash to the name when the build is finalized
    pub hash_suffix: bool,

    /// Generated with `immutable: true`
    pub immutable: bool,
}

/// A single manifest with its build-time bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    body: JsonValue,
    prior_names: Vec<PriorName>,
    generated: Option<GeneratedMeta>,
}

impl Resource {
    /// Wrap a parsed document, validating the identity fields
    pub fn new(body: JsonValue, source_name: &str) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidResource {
            source_name: source_name.to_string(),
            message: message.to_string(),
        };

        let map = body
            .as_object()
            .ok_or_else(|| invalid("document is not a mapping"))?;

        match map.get("apiVersion") {
            Some(JsonValue::String(v)) if !v.is_empty() => {}
            _ => return Err(invalid("missing or non-string apiVersion")),
        }
        match map.get("kind") {
            Some(JsonValue::String(k)) if !k.is_empty() => {}
            _ => return Err(invalid("missing or non-string kind")),
        }
        let metadata = map
            .get("metadata")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| invalid("missing metadata"))?;
        match metadata.get("name") {
            Some(JsonValue::String(n)) if !n.is_empty() => {}
            _ => return Err(invalid("missing or non-string metadata.name")),
        }
        if let Some(ns) = metadata.get("namespace")
            && !ns.is_string()
            && !ns.is_null()
        {
            return Err(invalid("metadata.namespace must be a string"));
        }

        Ok(Self {
            body,
            prior_names: Vec::new(),
            generated: None,
        })
    }

    /// Parse a multi-document YAML stream
    ///
    /// Empty documents are skipped and `List` kinds are flattened into
    /// their items.
    pub fn from_yaml_documents(text: &str, source_name: &str) -> Result<Vec<Self>> {
        let mut resources = Vec::new();

        for document in serde_yaml::Deserializer::from_str(text) {
            let value = JsonValue::deserialize(document)?;
            match value {
                JsonValue::Null => continue,
                JsonValue::Object(ref map) if is_list(map) => {
                    if let Some(JsonValue::Array(items)) = map.get("items") {
                        for item in items {
                            resources.push(Self::new(item.clone(), source_name)?);
                        }
                    }
                }
                other => resources.push(Self::new(other, source_name)?),
            }
        }

        Ok(resources)
    }

    pub fn api_version(&self) -> &str {
        self.body["apiVersion"].as_str().unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.body["kind"].as_str().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.body["metadata"]["name"].as_str().unwrap_or_default()
    }

    /// Namespace, treating an empty string as unset
    pub fn namespace(&self) -> Option<&str> {
        self.body["metadata"]["namespace"]
            .as_str()
            .filter(|ns| !ns.is_empty())
    }

    pub fn gvk(&self) -> Gvk {
        Gvk::from_api_version(self.api_version(), self.kind())
    }

    pub fn id(&self) -> ResId {
        ResId::new(
            self.gvk(),
            self.namespace().map(str::to_string),
            self.name(),
        )
    }

    /// Change `metadata.name`, remembering the previous name
    pub fn rename(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name == self.name() {
            return;
        }
        self.remember_identity();
        self.metadata_mut()
            .insert("name".to_string(), JsonValue::String(name));
    }

    /// Change `metadata.namespace`, remembering the previous namespace
    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        let namespace = namespace.into();
        if Some(namespace.as_str()) == self.namespace() {
            return;
        }
        self.remember_identity();
        self.metadata_mut()
            .insert("namespace".to_string(), JsonValue::String(namespace));
    }

    fn remember_identity(&mut self) {
        let prior = PriorName {
            name: self.name().to_string(),
            namespace: self.namespace().map(str::to_string),
        };
        if !self.prior_names.contains(&prior) {
            self.prior_names.push(prior);
        }
    }

    /// Names and namespaces this resource has carried, current first
    pub fn identities(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        std::iter::once((self.name(), self.namespace())).chain(
            self.prior_names
                .iter()
                .map(|p| (p.name.as_str(), p.namespace.as_deref())),
        )
    }

    pub fn prior_names(&self) -> &[PriorName] {
        &self.prior_names
    }

    /// Carry over identity history from another copy of this resource
    pub fn inherit_history(&mut self, other: &Resource) {
        for prior in &other.prior_names {
            if !self.prior_names.contains(prior) {
                self.prior_names.push(prior.clone());
            }
        }
    }

    pub fn labels(&self) -> Option<&Map<String, JsonValue>> {
        self.body["metadata"]["labels"].as_object()
    }

    pub fn annotations(&self) -> Option<&Map<String, JsonValue>> {
        self.body["metadata"]["annotations"].as_object()
    }

    /// Mutable access to `metadata`, created if a patch removed it
    pub fn metadata_mut(&mut self) -> &mut Map<String, JsonValue> {
        let body = ensure_object(&mut self.body);
        let metadata = body
            .entry("metadata".to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        ensure_object(metadata)
    }

    pub fn body(&self) -> &JsonValue {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut JsonValue {
        &mut self.body
    }

    pub fn into_body(self) -> JsonValue {
        self.body
    }

    pub fn generated(&self) -> Option<&GeneratedMeta> {
        self.generated.as_ref()
    }

    pub fn set_generated(&mut self, meta: Option<GeneratedMeta>) {
        self.generated = meta;
    }

    pub fn same_body(&self, other: &Resource) -> bool {
        self.body == other.body
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.body)?)
    }
}

fn is_list(map: &Map<String, JsonValue>) -> bool {
    map.get("kind")
        .and_then(JsonValue::as_str)
        .is_some_and(|kind| kind.ends_with("List"))
        && map.get("items").is_some_and(JsonValue::is_array)
}

/// Coerce a value into a mapping, replacing any non-mapping content
pub fn ensure_object(value: &mut JsonValue) -> &mut Map<String, JsonValue> {
    if !value.is_object() {
        *value = JsonValue::Object(Map::new());
    }
    match value {
        JsonValue::Object(map) => map,
        _ => unreachable!("value was just replaced with a mapping"),
    }
}

/// Ordered collection of resources keyed by identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet {
    resources: IndexMap<ResId, Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &ResId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn get_mut(&mut self, id: &ResId) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    pub fn contains(&self, id: &ResId) -> bool {
        self.resources.contains_key(id)
    }

    /// Insert under the resource's current identity, returning any resource
    /// it displaced
    pub fn insert(&mut self, resource: Resource) -> Option<Resource> {
        self.resources.insert(resource.id(), resource)
    }

    pub fn remove(&mut self, id: &ResId) -> Option<Resource> {
        self.resources.shift_remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        self.resources.values_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResId> {
        self.resources.keys()
    }

    /// Rebuild the identity index after names or namespaces changed
    ///
    /// Returns the first identity that is now held by two resources.
    pub fn reindex(&mut self) -> std::result::Result<(), ResId> {
        let resources = std::mem::take(&mut self.resources);
        for resource in resources.into_values() {
            let id = resource.id();
            if self.resources.contains_key(&id) {
                return Err(id);
            }
            self.resources.insert(id, resource);
        }
        Ok(())
    }

    /// Resources in insertion order
    pub fn into_resources(self) -> Vec<Resource> {
        self.resources.into_values().collect()
    }

    /// Resources sorted by kind, namespace and name
    pub fn into_sorted(self) -> Vec<Resource> {
        let mut resources = self.into_resources();
        resources.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        resources
    }
}

fn sort_key(resource: &Resource) -> (String, String, String, String) {
    (
        resource.kind().to_string(),
        resource.namespace().unwrap_or_default().to_string(),
        resource.name().to_string(),
        resource.api_version().to_string(),
    )
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut set = ResourceSet::new();
        for resource in iter {
            set.insert(resource);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web-app
  namespace: shop
spec:
  replicas: 3
"#;

    #[test]
    fn test_parse_identity() {
        let resources = Resource::from_yaml_documents(DEPLOYMENT, "deployment.yaml").unwrap();
        assert_eq!(resources.len(), 1);

        let id = resources[0].id();
        assert_eq!(id.gvk, Gvk::new("apps", "v1", "Deployment"));
        assert_eq!(id.namespace.as_deref(), Some("shop"));
        assert_eq!(id.name, "web-app");
        assert_eq!(id.to_string(), "Deployment.v1.apps/shop/web-app");
    }

    #[test]
    fn test_parse_multiple_documents_and_lists() {
        let text = r#"
apiVersion: v1
kind: Service
metadata:
  name: web
---
---
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: a
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: b
"#;
        let resources = Resource::from_yaml_documents(text, "all.yaml").unwrap();
        let names: Vec<&str> = resources.iter().map(Resource::name).collect();
        assert_eq!(names, vec!["web", "a", "b"]);
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let text = "apiVersion: v1\nkind: Service\nmetadata: {}\n";
        let err = Resource::from_yaml_documents(text, "svc.yaml").unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
        assert!(err.to_string().contains("svc.yaml"));
    }

    #[test]
    fn test_rename_keeps_history() {
        let mut resource = Resource::from_yaml_documents(DEPLOYMENT, "d.yaml")
            .unwrap()
            .remove(0);
        resource.rename("prod-web-app");
        resource.set_namespace("prod");

        assert_eq!(resource.name(), "prod-web-app");
        let identities: Vec<_> = resource.identities().collect();
        assert_eq!(
            identities,
            vec![
                ("prod-web-app", Some("prod")),
                ("web-app", Some("shop")),
                ("prod-web-app", Some("shop")),
            ]
        );
    }

    #[test]
    fn test_cluster_scoped() {
        assert!(Gvk::new("", "v1", "Namespace").is_cluster_scoped());
        assert!(Gvk::new("rbac.authorization.k8s.io", "v1", "ClusterRole").is_cluster_scoped());
        assert!(!Gvk::new("apps", "v1", "Deployment").is_cluster_scoped());
        assert_eq!(Gvk::from_api_version("v1", "Pod").api_version(), "v1");
    }

    #[test]
    fn test_reindex_detects_duplicates() {
        let text = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: a
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: b
"#;
        let mut set: ResourceSet = Resource::from_yaml_documents(text, "cm.yaml")
            .unwrap()
            .into_iter()
            .collect();

        for resource in set.iter_mut() {
            resource.rename("same");
        }

        let duplicate = set.reindex().unwrap_err();
        assert_eq!(duplicate.name, "same");
    }

    #[test]
    fn test_sorted_output() {
        let text = r#"
apiVersion: v1
kind: Service
metadata:
  name: b
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: z
---
apiVersion: v1
kind: Service
metadata:
  name: a
  namespace: x
---
apiVersion: v1
kind: Service
metadata:
  name: c
"#;
        let set: ResourceSet = Resource::from_yaml_documents(text, "all.yaml")
            .unwrap()
            .into_iter()
            .collect();
        let order: Vec<String> = set
            .into_sorted()
            .iter()
            .map(|r| format!("{}/{}", r.kind(), r.name()))
            .collect();
        assert_eq!(order, vec!["Deployment/z", "Service/b", "Service/c", "Service/a"]);
    }

    #[test]
    fn test_yaml_output_preserves_field_order() {
        let text = "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\nspec:\n  ports:\n  - port: 80\n";
        let resource = Resource::from_yaml_documents(text, "svc.yaml")
            .unwrap()
            .remove(0);

        insta::assert_snapshot!(resource.to_yaml().unwrap().trim_end(), @r"
        apiVersion: v1
        kind: Service
        metadata:
          name: web
        spec:
          ports:
          - port: 80
        ");
    }
}
