//! AS-017: CLI subcommands (init, validate, synth, plan, drift, status, outputs, schema).

use crate::core::{assembly, parser, planner, resolver, state, synth, types};
use crate::tripwire::{drift, eventlog};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter stack.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Stack name
        #[arg(long, default_value = "AwsAmplifyCodepipelineDbMigrationsMainStack")]
        name: String,
    },

    /// Validate stack.yaml and the assembled stack without writing anything
    Validate {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Override a param (key=value), repeatable
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
    },

    /// Synthesize the CloudFormation template and lock file
    Synth {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Output directory
        #[arg(long, default_value = "stack.out")]
        out: PathBuf,

        /// Override a param (key=value), repeatable
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Template format
        #[arg(long, value_enum, default_value_t = types::TemplateFormat::Json)]
        format: types::TemplateFormat,

        /// Print the template instead of writing it
        #[arg(long)]
        stdout: bool,
    },

    /// Show what a synth would change relative to the last lock
    Plan {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Output directory
        #[arg(long, default_value = "stack.out")]
        out: PathBuf,

        /// Override a param (key=value), repeatable
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
    },

    /// Detect hand edits to synthesized templates (tripwire)
    Drift {
        /// Output directory
        #[arg(long, default_value = "stack.out")]
        out: PathBuf,

        /// Check a single stack
        #[arg(short, long)]
        stack: Option<String>,

        /// Exit non-zero on any drift
        #[arg(long)]
        tripwire: bool,
    },

    /// Show lock file contents
    Status {
        /// Output directory
        #[arg(long, default_value = "stack.out")]
        out: PathBuf,

        /// Show a single stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// List the stack outputs and their export names
    Outputs {
        /// Output directory
        #[arg(long, default_value = "stack.out")]
        out: PathBuf,

        /// Show a single stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print the JSON Schema of stack.yaml
    Schema,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path, name } => cmd_init(&path, &name),
        Commands::Validate { file, params } => cmd_validate(&file, &params),
        Commands::Synth {
            file,
            out,
            params,
            format,
            stdout,
        } => cmd_synth(&file, &out, &params, format, stdout),
        Commands::Plan { file, out, params } => cmd_plan(&file, &out, &params),
        Commands::Drift {
            out,
            stack,
            tripwire,
        } => cmd_drift(&out, stack.as_deref(), tripwire),
        Commands::Status { out, stack } => cmd_status(&out, stack.as_deref()),
        Commands::Outputs { out, stack } => cmd_outputs(&out, stack.as_deref()),
        Commands::Schema => cmd_schema(),
    }
}

fn starter_config(name: &str) -> String {
    format!(
        r#"version: "1.0"
name: {name}
description: "Amplify app deployed by CodePipeline with database migrations"
region: us-east-1

params:
  vpc_cidr: 10.0.0.0/24

network:
  cidr: "{{{{params.vpc_cidr}}}}"
  max_azs: 2
  nat_gateways: 1

database:
  min_capacity: 2
  max_capacity: 2

bastion:
  instance_type: t3.nano

build:
  env_name: dev

pipeline:
  branch: master
  trigger: events
"#
    )
}

fn cmd_init(path: &Path, name: &str) -> Result<(), String> {
    let config_path = path.join("stack.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, starter_config(name))
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized ampstack project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

/// Load, override, resolve and validate a stack.yaml.
fn load_and_validate(file: &Path, params: &[String]) -> Result<types::StackConfig, String> {
    let config = assembly::load_config(file, params)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn cmd_validate(file: &Path, params: &[String]) -> Result<(), String> {
    let config = load_and_validate(file, params)?;
    let stack = assembly::assemble(&config)?;
    let template = synth::synthesize(&stack)?;
    println!(
        "OK: {} ({} subnets, {} resources, {} outputs)",
        stack.name,
        stack.network.subnets.len(),
        template.resources.len(),
        template.outputs.len()
    );
    Ok(())
}

fn print_placeholder_reminder(stack: &types::Stack) {
    let placeholders = assembly::placeholder_secrets(stack);
    if placeholders.is_empty() {
        return;
    }
    println!();
    println!("Replace these placeholder secret values in the console before the first pipeline run:");
    for s in placeholders {
        println!("  {} ({})", s.name, s.id);
    }
}

fn cmd_synth(
    file: &Path,
    out: &Path,
    params: &[String],
    format: types::TemplateFormat,
    to_stdout: bool,
) -> Result<(), String> {
    let config = load_and_validate(file, params)?;

    if to_stdout {
        let stack = assembly::assemble(&config)?;
        let template = synth::synthesize(&stack)?;
        print!("{}", synth::render_template(&template, format)?);
        return Ok(());
    }

    let result = synth::synth(&synth::SynthConfig {
        config: &config,
        out_dir: out,
        format,
    })?;
    println!(
        "{}: {} resources, {} outputs ({:.2}s)",
        result.stack,
        result.resources,
        result.outputs,
        result.total_duration.as_secs_f64()
    );
    println!("  Template: {}", result.template_path.display());
    println!("  Hash:     {}", result.template_hash);

    // synth already validated the stack; re-assembling is pure
    let stack = assembly::assemble(&config)?;
    print_placeholder_reminder(&stack);
    Ok(())
}

/// Synthesize in memory and diff against the stack's last lock.
fn build_plan(file: &Path, out: &Path, params: &[String]) -> Result<types::ExecutionPlan, String> {
    let config = load_and_validate(file, params)?;
    let stack = assembly::assemble(&config)?;
    let template = synth::synthesize(&stack)?;
    let execution_order = resolver::build_execution_order(&template)?;
    let lock = state::load_lock(out, &stack.name)?;
    Ok(planner::plan(
        &stack.name,
        &template,
        &execution_order,
        lock.as_ref(),
    ))
}

fn cmd_plan(file: &Path, out: &Path, params: &[String]) -> Result<(), String> {
    let plan = build_plan(file, out, params)?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();
    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {:<7} {}", symbol, change.action.to_string(), change.description);
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

/// Locks for every stack directory under `out`, optionally filtered by name.
fn load_stack_locks(out: &Path, filter: Option<&str>) -> Result<Vec<types::StackLock>, String> {
    if !out.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(out)
        .map_err(|e| format!("cannot read output dir {}: {}", out.display(), e))?;

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| filter.is_none_or(|f| f == name.as_str()))
        .collect();
    names.sort();

    let mut locks = Vec::new();
    for name in names {
        if let Some(lock) = state::load_lock(out, &name)? {
            locks.push(lock);
        }
    }
    Ok(locks)
}

/// Run drift detection and log each finding. Returns the finding count.
fn check_drift(out: &Path, filter: Option<&str>) -> Result<usize, String> {
    let mut total_drift = 0;
    for lock in load_stack_locks(out, filter)? {
        println!("Checking {} ({} resources)...", lock.stack, lock.resources.len());
        let findings = drift::detect_drift(out, &lock);

        if findings.is_empty() {
            println!("  No drift detected.");
            continue;
        }
        for f in &findings {
            println!("  DRIFTED: {} ({})", f.resource_id, f.detail);
            println!("    Expected: {}", f.expected_hash);
            println!("    Actual:   {}", f.actual_hash);
            eventlog::append_event(
                out,
                &lock.stack,
                types::ProvenanceEvent::DriftDetected {
                    stack: lock.stack.clone(),
                    resource: f.resource_id.clone(),
                    expected_hash: f.expected_hash.clone(),
                    actual_hash: f.actual_hash.clone(),
                },
            )?;
        }
        total_drift += findings.len();
    }
    Ok(total_drift)
}

fn cmd_drift(out: &Path, filter: Option<&str>, tripwire_mode: bool) -> Result<(), String> {
    let total_drift = check_drift(out, filter)?;
    if total_drift > 0 {
        println!();
        println!("Drift detected: {} finding(s)", total_drift);
        if tripwire_mode {
            return Err(format!("{} drift finding(s)", total_drift));
        }
    } else {
        println!("No drift detected.");
    }
    Ok(())
}

fn cmd_status(out: &Path, filter: Option<&str>) -> Result<(), String> {
    let locks = load_stack_locks(out, filter)?;
    if locks.is_empty() {
        println!("No state found. Run `ampstack synth` first.");
        return Ok(());
    }

    for lock in &locks {
        println!("Stack: {} ({})", lock.stack, lock.format);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        println!("  Template:  {}", lock.template_hash);
        println!("  Resources: {}", lock.resources.len());
        for (id, rl) in &lock.resources {
            println!("    {}: [{}]", id, rl.resource_type);
        }
        println!();
    }
    Ok(())
}

fn cmd_outputs(out: &Path, filter: Option<&str>) -> Result<(), String> {
    let locks = load_stack_locks(out, filter)?;
    if locks.is_empty() {
        println!("No state found. Run `ampstack synth` first.");
        return Ok(());
    }

    for lock in &locks {
        let path = state::template_path(out, &lock.stack, lock.format);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let template = synth::parse_template(&content, lock.format)?;

        println!("{}:", lock.stack);
        for (id, output) in &template.outputs {
            let export = output
                .export
                .as_ref()
                .map(|e| format!(" (export: {})", e.name))
                .unwrap_or_default();
            println!("  {}{}", id, export);
            if let Some(desc) = &output.description {
                println!("    {}", desc);
            }
            let value = serde_json::to_string(&output.value)
                .map_err(|e| format!("serialize error: {}", e))?;
            println!("    = {}", value);
        }
    }
    Ok(())
}

fn config_schema() -> Result<String, String> {
    let schema = schemars::schema_for!(types::StackConfig);
    serde_json::to_string_pretty(&schema).map_err(|e| format!("serialize error: {}", e))
}

fn cmd_schema() -> Result<(), String> {
    println!("{}", config_schema()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembly::tests::DEMO_YAML;

    fn write_demo(dir: &Path) -> PathBuf {
        let file = dir.join("stack.yaml");
        std::fs::write(&file, DEMO_YAML).unwrap();
        file
    }

    fn synth_demo(dir: &Path) -> (PathBuf, PathBuf) {
        let file = write_demo(dir);
        let out = dir.join("stack.out");
        cmd_synth(&file, &out, &[], types::TemplateFormat::Json, false).unwrap();
        (file, out)
    }

    #[test]
    fn test_as017_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("new-project");
        cmd_init(&sub, "Demo").unwrap();
        let written = sub.join("stack.yaml");
        assert!(written.exists());
        let content = std::fs::read_to_string(&written).unwrap();
        assert!(content.contains("cidr: \"{{params.vpc_cidr}}\""));
    }

    #[test]
    fn test_as017_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stack.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path(), "Demo").is_err());
    }

    #[test]
    fn test_as017_init_output_validates() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path(), "Starter").unwrap();
        cmd_validate(&dir.path().join("stack.yaml"), &[]).unwrap();
    }

    #[test]
    fn test_as017_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        cmd_validate(&write_demo(dir.path()), &[]).unwrap();
    }

    #[test]
    fn test_as017_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stack.yaml");
        std::fs::write(
            &file,
            "version: \"2.0\"\nname: \"\"\nparams:\n  vpc_cidr: 10.0.0.0/24\n",
        )
        .unwrap();
        let err = cmd_validate(&file, &[]).unwrap_err();
        assert!(err.contains("validation error"));
    }

    #[test]
    fn test_as017_validate_param_override() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_demo(dir.path());
        assert!(cmd_validate(&file, &["vpc_cidr=not-a-cidr".to_string()]).is_err());
        cmd_validate(&file, &["vpc_cidr=192.168.0.0/24".to_string()]).unwrap();
    }

    #[test]
    fn test_as017_synth_writes_out_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out) = synth_demo(dir.path());
        assert!(out.join("DemoStack/template.json").exists());
        assert!(out.join("DemoStack/state.lock.yaml").exists());
        assert!(out.join("DemoStack/events.jsonl").exists());
    }

    #[test]
    fn test_as017_synth_stdout_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_demo(dir.path());
        let out = dir.path().join("stack.out");
        cmd_synth(&file, &out, &[], types::TemplateFormat::Yaml, true).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn test_as017_plan_before_and_after_synth() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_demo(dir.path());
        let out = dir.path().join("stack.out");

        let fresh = build_plan(&file, &out, &[]).unwrap();
        assert_eq!(fresh.to_create as usize, fresh.changes.len());

        cmd_synth(&file, &out, &[], types::TemplateFormat::Json, false).unwrap();
        let settled = build_plan(&file, &out, &[]).unwrap();
        assert!(!settled.has_changes());

        let resized = build_plan(&file, &out, &["vpc_cidr=10.9.0.0/24".to_string()]).unwrap();
        assert!(resized.to_update > 0);
        cmd_plan(&file, &out, &[]).unwrap();
    }

    #[test]
    fn test_as017_drift_clean_and_tripwire() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out) = synth_demo(dir.path());
        cmd_drift(&out, None, true).unwrap();

        let template = out.join("DemoStack/template.json");
        let content = std::fs::read_to_string(&template).unwrap();
        std::fs::write(&template, content.replace("t3.nano", "m5.large")).unwrap();

        cmd_drift(&out, None, false).unwrap();
        assert!(cmd_drift(&out, Some("DemoStack"), true).is_err());

        let events = eventlog::read_events(&out, "DemoStack").unwrap();
        assert!(events.iter().any(|e| matches!(
            &e.event,
            types::ProvenanceEvent::DriftDetected { resource, .. } if resource == "BastionHost"
        )));
    }

    #[test]
    fn test_as017_drift_filter_skips_other_stacks() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out) = synth_demo(dir.path());
        std::fs::remove_file(out.join("DemoStack/template.json")).unwrap();
        assert_eq!(check_drift(&out, Some("Other")).unwrap(), 0);
        assert_eq!(check_drift(&out, None).unwrap(), 1);
    }

    #[test]
    fn test_as017_status_empty_and_populated() {
        let dir = tempfile::tempdir().unwrap();
        cmd_status(&dir.path().join("missing"), None).unwrap();
        let (_, out) = synth_demo(dir.path());
        cmd_status(&out, None).unwrap();
        assert_eq!(load_stack_locks(&out, None).unwrap().len(), 1);
        assert!(load_stack_locks(&out, Some("Other")).unwrap().is_empty());
    }

    #[test]
    fn test_as017_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out) = synth_demo(dir.path());
        cmd_outputs(&out, None).unwrap();
        std::fs::remove_file(out.join("DemoStack/template.json")).unwrap();
        assert!(cmd_outputs(&out, None).is_err());
    }

    #[test]
    fn test_as017_schema() {
        let schema = config_schema().unwrap();
        let value: serde_json::Value = serde_json::from_str(&schema).unwrap();
        assert_eq!(value["title"], "StackConfig");
        assert!(value["properties"]["network"].is_object());
    }
}
