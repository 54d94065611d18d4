//! Multi-document YAML manifest handling.
//!
//! Locates the document for a workload inside a manifest file and splices a
//! replacement document back in, leaving every other byte untouched.

use serde_yaml::Value;
use std::ops::Range;

use crate::alert::{is_workload_kind, ResourceRef};

/// Kind + name (+ namespace) read from a manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIdentity {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl DocumentIdentity {
    /// Read the identity from a parsed document.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("kind")?.as_str()?.to_string();
        let metadata = value.get("metadata")?;
        let name = metadata.get("name")?.as_str()?.to_string();
        let namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .map(String::from);
        Some(Self {
            kind,
            name,
            namespace,
        })
    }

    /// Check whether this identity names the given resource.
    #[must_use]
    pub fn matches(&self, resource: &ResourceRef) -> bool {
        self.kind.eq_ignore_ascii_case(&resource.kind)
            && self.name == resource.name
            && self
                .namespace
                .as_ref()
                .is_none_or(|ns| *ns == resource.namespace)
    }
}

/// A workload document located inside a manifest file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    /// Position among the file's documents
    pub index: usize,
    /// Byte range of the document body in the file
    pub span: Range<usize>,
    /// Document text as it appears in the file
    pub text: String,
    /// The workload the document describes
    pub target: ResourceRef,
}

impl ManifestDocument {
    /// Document text without surrounding blank lines.
    #[must_use]
    pub fn excerpt(&self) -> &str {
        self.text.trim()
    }
}

/// Byte ranges of each document body, separators excluded.
fn document_spans(content: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let end = offset + line.len();
        if line.trim_end() == "---" {
            spans.push(start..offset);
            start = end;
        }
        offset = end;
    }
    spans.push(start..content.len());
    spans
}

/// Find the document describing `resource`.
///
/// Resolution order:
/// 1. A document whose kind and name match exactly
/// 2. For a Pod, the workload document whose name prefixes the pod name
///    (`web` owns `web-7d9f6-x2bq`)
/// 3. The only workload document in the file (services and config
///    documents are ignored)
#[must_use]
pub fn find_document(content: &str, resource: &ResourceRef) -> Option<ManifestDocument> {
    let documents: Vec<(usize, Range<usize>, DocumentIdentity)> = document_spans(content)
        .into_iter()
        .enumerate()
        .filter_map(|(index, span)| {
            let value: Value = serde_yaml::from_str(&content[span.clone()]).ok()?;
            DocumentIdentity::from_value(&value).map(|identity| (index, span, identity))
        })
        .collect();

    let exact = documents
        .iter()
        .find(|(_, _, identity)| identity.matches(resource));

    let owner = || {
        if resource.kind != "Pod" {
            return None;
        }
        documents
            .iter()
            .filter(|(_, _, identity)| {
                is_workload_kind(&identity.kind)
                    && resource.name.starts_with(&format!("{}-", identity.name))
                    && identity
                        .namespace
                        .as_ref()
                        .is_none_or(|ns| *ns == resource.namespace)
            })
            .max_by_key(|(_, _, identity)| identity.name.len())
    };

    let only = || {
        let mut workloads = documents
            .iter()
            .filter(|(_, _, identity)| is_workload_kind(&identity.kind));
        match (workloads.next(), workloads.next()) {
            (Some(document), None) => Some(document),
            _ => None,
        }
    };

    exact.or_else(owner).or_else(only).map(|(index, span, identity)| ManifestDocument {
        index: *index,
        span: span.clone(),
        text: content[span.clone()].to_string(),
        target: ResourceRef {
            namespace: identity
                .namespace
                .clone()
                .unwrap_or_else(|| resource.namespace.clone()),
            kind: identity.kind.clone(),
            name: identity.name.clone(),
        },
    })
}

/// Replace one document's body, keeping the rest of the file byte-identical.
#[must_use]
pub fn splice(content: &str, document: &ManifestDocument, replacement: &str) -> String {
    let mut body = replacement.trim_end().to_string();
    if document.text.ends_with('\n') || document.span.end < content.len() {
        body.push('\n');
    }

    let mut out = String::with_capacity(content.len() + body.len());
    out.push_str(&content[..document.span.start]);
    out.push_str(&body);
    out.push_str(&content[document.span.end..]);
    out
}

/// Container mappings of a workload, located per kind.
#[must_use]
pub fn containers(document: &Value) -> Vec<&Value> {
    let kind = document.get("kind").and_then(Value::as_str).unwrap_or_default();
    let pod_spec = match kind.to_ascii_lowercase().as_str() {
        "pod" => document.get("spec"),
        "cronjob" => document
            .get("spec")
            .and_then(|s| s.get("jobTemplate"))
            .and_then(|s| s.get("spec"))
            .and_then(|s| s.get("template"))
            .and_then(|s| s.get("spec")),
        _ => document
            .get("spec")
            .and_then(|s| s.get("template"))
            .and_then(|s| s.get("spec")),
    };

    let Some(pod_spec) = pod_spec else {
        return Vec::new();
    };

    ["initContainers", "containers"]
        .iter()
        .filter_map(|key| pod_spec.get(*key).and_then(Value::as_sequence))
        .flatten()
        .collect()
}
