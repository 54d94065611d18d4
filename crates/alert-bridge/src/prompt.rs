//! Prompt construction for patch generation.
//!
//! One Handlebars template per failure mode, sharing a preamble and an output
//! contract. Rendering is strict and deterministic: the same context and
//! rejection always produce the same prompt.

use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;

use crate::classifier::FailureMode;
use crate::context::FailureContext;
use crate::validator::Rejection;

/// Builds model prompts from failure contexts.
pub struct PromptBuilder {
    handlebars: Handlebars<'static>,
    denylist: Vec<String>,
}

#[derive(Serialize)]
struct PromptData<'a> {
    failure_mode: &'static str,
    kind: &'a str,
    name: &'a str,
    namespace: &'a str,
    alert_summary: String,
    diagnostics: &'a str,
    manifest_path: &'a str,
    manifest_excerpt: &'a str,
    denylist: &'a [String],
    previous_rejection: Option<String>,
}

impl PromptBuilder {
    /// Create a builder whose prompts forbid the given placeholder tokens.
    pub fn new(denylist: &[String]) -> Result<Self, TemplateError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars.register_partial("preamble", PREAMBLE)?;
        handlebars.register_partial("contract", CONTRACT)?;
        handlebars.register_template_string(FailureMode::ImagePull.template_name(), IMAGE_PULL_TEMPLATE)?;
        handlebars.register_template_string(
            FailureMode::ReadinessProbe.template_name(),
            READINESS_TEMPLATE,
        )?;
        handlebars.register_template_string(
            FailureMode::LivenessProbe.template_name(),
            LIVENESS_TEMPLATE,
        )?;
        handlebars.register_template_string(
            FailureMode::CommandFailure.template_name(),
            COMMAND_TEMPLATE,
        )?;

        Ok(Self {
            handlebars,
            denylist: denylist.to_vec(),
        })
    }

    /// Render the prompt for a context, appending the previous rejection on retries.
    pub fn build(&self, ctx: &FailureContext, previous: Option<&Rejection>) -> Result<String, RenderError> {
        let target = &ctx.document.target;
        let data = PromptData {
            failure_mode: ctx.mode.display_name(),
            kind: &target.kind,
            name: &target.name,
            namespace: &target.namespace,
            alert_summary: ctx.alert.render_summary(),
            diagnostics: ctx.diagnostics.trim_end(),
            manifest_path: ctx.manifest_path(),
            manifest_excerpt: ctx.document.excerpt(),
            denylist: &self.denylist,
            previous_rejection: previous.map(ToString::to_string),
        };

        self.handlebars.render(ctx.mode.template_name(), &data)
    }
}

const PREAMBLE: &str = r"You are a Kubernetes site reliability engineer fixing a failing workload through GitOps.
A {{failure_mode}} was detected for {{kind}} `{{name}}` in namespace `{{namespace}}`.

## Alert
{{alert_summary}}

## Diagnostics
{{diagnostics}}

## Current manifest ({{manifest_path}})
```yaml
{{manifest_excerpt}}
```
";

const CONTRACT: &str = r"
## Output contract
- Reply with exactly one fenced ```yaml block containing the complete corrected {{kind}} document.
- Keep `kind: {{kind}}` and `metadata.name: {{name}}`; do not change the namespace.
- Return a single YAML document, not a diff and not a list.
- Use concrete values only. Never emit any of these placeholders:
{{#each denylist}}
  - `{{this}}`
{{/each}}
  - any `<angle-bracket>` token
{{#if previous_rejection}}

## Previous attempt rejected
Your previous answer was rejected ({{previous_rejection}}). Produce a different, corrected document.
{{/if}}
";

const IMAGE_PULL_TEMPLATE: &str = r"{{> preamble}}
## Task
The container image cannot be pulled. Correct the image reference so it names an image that exists
in a public registry, keeping the same application. Every container image must carry an explicit
tag or digest. Do not change anything unrelated to the image reference.
{{> contract}}";

const READINESS_TEMPLATE: &str = r"{{> preamble}}
## Task
The readiness probe keeps failing, so the workload never becomes ready. Fix the readinessProbe so it
targets an endpoint and port the container actually serves, with sensible delays and thresholds.
Do not remove the probe.
{{> contract}}";

const LIVENESS_TEMPLATE: &str = r"{{> preamble}}
## Task
The liveness probe keeps failing, so the container is restarted repeatedly. Fix the livenessProbe so
it checks an endpoint and port the container actually serves, with an initial delay long enough for
startup. Do not remove the probe.
{{> contract}}";

const COMMAND_TEMPLATE: &str = r"{{> preamble}}
## Task
The container exits because its command or arguments fail. Fix `command`/`args` so the container
starts its main process and keeps running. Do not change the image unless the command cannot work
with it.
{{> contract}}";
