//! Candidate extraction and validation.
//!
//! Turns raw model output into a typed [`Patch`] or a typed [`Rejection`].
//! A `Patch` can only be built here, after every check has passed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::sync::LazyLock;

use crate::classifier::FailureMode;
use crate::context::FailureContext;
use crate::manifest::{self, DocumentIdentity};

/// Placeholder tokens that are never acceptable in a patch.
///
/// Tokens with a letter or digit match anywhere in the candidate. Pure
/// punctuation tokens such as `...` only match a whole YAML scalar, so shell
/// text like `echo Starting...` is left alone.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "<image>",
    "<your-",
    "TODO",
    "CHANGE_ME",
    "CHANGEME",
    "FIXME",
    "REPLACE_ME",
    "your-image",
    "example.com/",
    "...",
];

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").unwrap());

/// `<name>` at the start of a scalar or after a separator; redirections like
/// `</dev/null >` and expressions like `a<b>` do not match.
static ANGLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|[\s:/=@"'])(<[A-Za-z][\w-]*>)"#).unwrap());

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Endpoint answered with an error status or an undecodable body
    Unreadable,
    /// Nothing usable in the response
    Empty,
    /// Contains a denylisted placeholder
    Placeholder,
    /// Not a single YAML mapping with kind and metadata.name
    Malformed,
    /// Names a different workload than the alert
    IdentityMismatch,
    /// Same as the previously rejected candidate
    Repeated,
    /// Identical to the current manifest
    NoChange,
    /// Container image without tag or digest
    UnpinnedImage,
    /// Image tag the registry does not know
    UnknownImage,
}

impl RejectionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unreadable => "unreadable",
            Self::Empty => "empty",
            Self::Placeholder => "placeholder",
            Self::Malformed => "malformed",
            Self::IdentityMismatch => "identity_mismatch",
            Self::Repeated => "repeated",
            Self::NoChange => "no_change",
            Self::UnpinnedImage => "unpinned_image",
            Self::UnknownImage => "unknown_image",
        }
    }
}

/// A rejected candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub message: String,
    /// The extracted candidate text
    pub candidate: String,
}

impl Rejection {
    #[must_use]
    pub fn new(kind: RejectionKind, message: impl Into<String>, candidate: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            candidate: candidate.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// A validated remediation patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patch {
    /// Repository path of the manifest file
    pub target_path: String,
    /// The corrected workload document
    pub document: String,
    /// Full file content with the document spliced in
    pub content: String,
    /// Checks the candidate passed
    pub verdict: Vec<&'static str>,
}

/// Validates model output against a failure context.
#[derive(Debug, Clone)]
pub struct Validator {
    denylist: Vec<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl Validator {
    /// Create a validator with the default denylist plus `extra` tokens.
    #[must_use]
    pub fn new(extra: &[String]) -> Self {
        let mut denylist: Vec<String> = DEFAULT_DENYLIST.iter().map(|s| (*s).to_string()).collect();
        denylist.extend(extra.iter().filter(|t| !t.is_empty()).cloned());
        Self { denylist }
    }

    /// Denylisted tokens, defaults first.
    #[must_use]
    pub fn denylist(&self) -> &[String] {
        &self.denylist
    }

    /// Validate raw model output.
    ///
    /// `previous` is the last rejected candidate for this attempt, if any.
    pub fn validate(
        &self,
        raw: &str,
        ctx: &FailureContext,
        previous: Option<&str>,
    ) -> Result<Patch, Rejection> {
        let candidate = extract_candidate(raw);
        let reject = |kind, message: String| Rejection::new(kind, message, candidate.clone());

        if candidate.is_empty() {
            return Err(reject(RejectionKind::Empty, "response contains no manifest".to_string()));
        }

        if let Some(token) = self.find_placeholder(&candidate) {
            return Err(reject(
                RejectionKind::Placeholder,
                format!("contains placeholder '{token}'"),
            ));
        }

        let value = parse_single_document(&candidate).map_err(|m| reject(RejectionKind::Malformed, m))?;
        if let Some(token) = self.find_scalar_placeholder(&value) {
            return Err(reject(
                RejectionKind::Placeholder,
                format!("contains placeholder '{token}'"),
            ));
        }

        let identity = DocumentIdentity::from_value(&value).ok_or_else(|| {
            reject(
                RejectionKind::Malformed,
                "document has no kind or metadata.name".to_string(),
            )
        })?;

        let target = &ctx.document.target;
        if !identity.matches(target) {
            return Err(reject(
                RejectionKind::IdentityMismatch,
                format!(
                    "document is {}/{}{}, expected {} in namespace {}",
                    identity.kind,
                    identity.name,
                    identity
                        .namespace
                        .as_ref()
                        .map(|ns| format!(" in namespace {ns}"))
                        .unwrap_or_default(),
                    target,
                    target.namespace
                ),
            ));
        }

        if previous.is_some_and(|p| p.trim() == candidate) {
            return Err(reject(
                RejectionKind::Repeated,
                "identical to the previously rejected candidate".to_string(),
            ));
        }

        let current: Option<Value> = serde_yaml::from_str(&ctx.document.text).ok();
        if current.as_ref() == Some(&value) {
            return Err(reject(
                RejectionKind::NoChange,
                "document is unchanged from the current manifest".to_string(),
            ));
        }

        let mut verdict = vec![
            "non_empty",
            "no_placeholders",
            "single_mapping",
            "identity",
            "not_repeated",
            "changed",
        ];

        if ctx.mode == FailureMode::ImagePull {
            if let Some(image) = unpinned_image(&value) {
                return Err(reject(
                    RejectionKind::UnpinnedImage,
                    format!("image '{image}' has no tag or digest"),
                ));
            }
            verdict.push("pinned_images");
        }

        let document = format!("{candidate}\n");
        Ok(Patch {
            target_path: ctx.file.path.clone(),
            content: manifest::splice(&ctx.file.content, &ctx.document, &document),
            document,
            verdict,
        })
    }

    fn find_placeholder(&self, candidate: &str) -> Option<String> {
        self.denylist
            .iter()
            .filter(|token| matches_anywhere(token))
            .find(|token| candidate.contains(token.as_str()))
            .cloned()
    }

    fn find_scalar_placeholder(&self, value: &Value) -> Option<String> {
        match value {
            Value::String(text) => {
                let trimmed = text.trim();
                self.denylist
                    .iter()
                    .filter(|token| !matches_anywhere(token))
                    .find(|token| trimmed == token.as_str())
                    .cloned()
                    .or_else(|| {
                        ANGLE_PLACEHOLDER
                            .captures(text)
                            .and_then(|c| c.get(1))
                            .map(|m| m.as_str().to_string())
                    })
            }
            Value::Sequence(items) => items.iter().find_map(|item| self.find_scalar_placeholder(item)),
            Value::Mapping(map) => map.values().find_map(|item| self.find_scalar_placeholder(item)),
            Value::Tagged(tagged) => self.find_scalar_placeholder(&tagged.value),
            _ => None,
        }
    }
}

fn matches_anywhere(token: &str) -> bool {
    token.chars().any(char::is_alphanumeric)
}

/// Pull the manifest out of a model response.
///
/// First fenced `yaml`/`yml` block, else the first fenced block of any
/// language, else the whole response. The result is trimmed.
#[must_use]
pub fn extract_candidate(raw: &str) -> String {
    let blocks: Vec<(&str, &str)> = FENCED_BLOCK
        .captures_iter(raw)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect();

    blocks
        .iter()
        .find(|(lang, _)| lang.eq_ignore_ascii_case("yaml") || lang.eq_ignore_ascii_case("yml"))
        .or_else(|| blocks.first())
        .map_or(raw, |(_, body)| *body)
        .trim()
        .to_string()
}

fn parse_single_document(candidate: &str) -> Result<Value, String> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(candidate) {
        let value = Value::deserialize(document).map_err(|e| format!("invalid YAML: {e}"))?;
        if !value.is_null() {
            documents.push(value);
        }
    }

    match documents.len() {
        0 => Err("no YAML document found".to_string()),
        1 => {
            let value = documents.remove(0);
            if value.is_mapping() {
                Ok(value)
            } else {
                Err("document is not a mapping".to_string())
            }
        }
        n => Err(format!("expected one YAML document, found {n}")),
    }
}

/// First container image lacking a tag or digest.
fn unpinned_image(document: &Value) -> Option<String> {
    manifest::containers(document).into_iter().find_map(|container| {
        let image = container.get("image").and_then(Value::as_str).unwrap_or_default();
        let last_segment = image.rsplit('/').next().unwrap_or_default();
        let pinned = image.contains('@') || last_segment.contains(':');
        (!pinned).then(|| image.to_string())
    })
}
