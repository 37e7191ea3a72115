//! AS-004: Template synthesis.
//!
//! Renders an assembled `Stack` into a CloudFormation template, validates the
//! result, and writes it with its lock file:
//! assemble → render → validate → serialize → write → hash → lock → events

use super::resolver;
use super::state;
use super::types::*;
use super::{assembly, planner};
use crate::constructs::{
    bastion, database, hosting, network, outputs, pipeline, project, repository, secrets,
    security,
};
use crate::tripwire::{eventlog, hasher};
use std::path::Path;
use std::time::Instant;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

type Renderer = fn(&Stack, &mut Template) -> Result<(), String>;

/// Construct renderers, in the order their resources appear in the template.
const RENDERERS: [(&str, Renderer); 10] = [
    ("network", network::render),
    ("security", security::render),
    ("database", database::render),
    ("bastion", bastion::render),
    ("repository", repository::render),
    ("hosting", hosting::render),
    ("secrets", secrets::render),
    ("project", project::render),
    ("pipeline", pipeline::render),
    ("outputs", outputs::render),
];

/// Render every construct and validate the template's reference graph.
pub fn synthesize(stack: &Stack) -> Result<Template, String> {
    let mut template = Template {
        format_version: TEMPLATE_FORMAT_VERSION.to_string(),
        description: Some(
            stack
                .description
                .clone()
                .unwrap_or_else(|| format!("ampstack: {}", stack.name)),
        ),
        ..Template::default()
    };

    for (name, render) in RENDERERS {
        render(stack, &mut template).map_err(|e| format!("{} construct: {}", name, e))?;
    }

    let errors = resolver::validate_template(&template);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
        return Err(format!("invalid template: {}", messages.join("; ")));
    }
    Ok(template)
}

/// Serialize a template. JSON is pretty-printed with a trailing newline.
pub fn render_template(template: &Template, format: TemplateFormat) -> Result<String, String> {
    match format {
        TemplateFormat::Json => serde_json::to_string_pretty(template)
            .map(|s| s + "\n")
            .map_err(|e| format!("JSON serialize error: {}", e)),
        TemplateFormat::Yaml => serde_yaml_ng::to_string(template)
            .map_err(|e| format!("YAML serialize error: {}", e)),
    }
}

/// Parse a previously written template.
pub fn parse_template(content: &str, format: TemplateFormat) -> Result<Template, String> {
    match format {
        TemplateFormat::Json => {
            serde_json::from_str(content).map_err(|e| format!("JSON parse error: {}", e))
        }
        TemplateFormat::Yaml => {
            serde_yaml_ng::from_str(content).map_err(|e| format!("YAML parse error: {}", e))
        }
    }
}

/// Export names declared by a template, in output order.
pub fn export_names(template: &Template) -> Vec<String> {
    template
        .outputs
        .values()
        .filter_map(|o| o.export.as_ref().map(|e| e.name.clone()))
        .collect()
}

/// Configuration for a synth run.
pub struct SynthConfig<'a> {
    pub config: &'a StackConfig,
    pub out_dir: &'a Path,
    pub format: TemplateFormat,
}

/// Assemble, render and write the template plus its lock file, logging
/// provenance events along the way.
pub fn synth(cfg: &SynthConfig) -> Result<SynthResult, String> {
    let start = Instant::now();
    let name = &cfg.config.name;
    let run_id = eventlog::generate_run_id();

    eventlog::append_event(
        cfg.out_dir,
        name,
        ProvenanceEvent::SynthStarted {
            stack: name.clone(),
            run_id: run_id.clone(),
            ampstack_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )?;

    let built = assembly::assemble(cfg.config).and_then(|stack| {
        let template = synthesize(&stack)?;
        Ok((stack, template))
    });
    let (stack, template) = match built {
        Ok(pair) => pair,
        Err(e) => {
            // Best effort; the assembly error is what the caller sees.
            let _ = eventlog::append_event(
                cfg.out_dir,
                name,
                ProvenanceEvent::ValidationFailed {
                    stack: name.clone(),
                    run_id,
                    errors: vec![e.clone()],
                },
            );
            return Err(e);
        }
    };

    let content = render_template(&template, cfg.format)?;
    let template_path = state::write_template(cfg.out_dir, &stack.name, cfg.format, &content)?;
    let template_hash = hasher::hash_string(&content);

    let mut lock = state::new_lock(&stack.name, cfg.format);
    lock.template_hash = template_hash.clone();
    lock.exports = export_names(&template);
    for (id, resource) in &template.resources {
        lock.resources.insert(
            id.clone(),
            ResourceLock {
                resource_type: resource.resource_type.clone(),
                hash: planner::hash_resource(resource),
            },
        );
    }
    state::save_lock(cfg.out_dir, &lock)?;

    let total_duration = start.elapsed();
    let resources = template.resources.len() as u32;
    let outputs = template.outputs.len() as u32;
    eventlog::append_event(
        cfg.out_dir,
        name,
        ProvenanceEvent::SynthCompleted {
            stack: name.clone(),
            run_id,
            resources,
            outputs,
            template_hash: template_hash.clone(),
            total_seconds: total_duration.as_secs_f64(),
        },
    )?;

    Ok(SynthResult {
        stack: stack.name.clone(),
        template_path,
        template_hash,
        resources,
        outputs,
        total_duration,
    })
}
