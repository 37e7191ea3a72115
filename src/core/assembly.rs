//! AS-019: Stack assembly.
//!
//! Builds every construct from a resolved config, in dependency order:
//! network → security groups → database → bastion → repository → hosting app
//! → secrets → build projects → pipeline → outputs. Each step borrows the
//! results of earlier steps; the finished `Stack` owns all of them.

use super::parser;
use super::resolver;
use super::types::*;
use crate::constructs::{
    bastion, database, hosting, network, outputs, pipeline, project, repository, secrets,
    security,
};
use std::path::Path;

/// Parse a stack.yaml, apply `key=value` param overrides and resolve templates.
pub fn load_config(path: &Path, overrides: &[String]) -> Result<StackConfig, String> {
    let mut config = parser::parse_config_file(path)?;
    resolver::apply_param_overrides(&mut config, overrides)?;
    resolver::resolve_config_templates(&config)
}

/// Assemble the stack from a resolved config. Fails if any construct cannot
/// be built or the assembled stack violates an invariant.
pub fn assemble(config: &StackConfig) -> Result<Stack, String> {
    let network = network::build(config)?;
    let security_groups = security::build(config, &network);
    let database = database::build(config, &network, &security_groups)?;
    let bastion = bastion::build(config, &network, &security_groups)?;
    let repository = repository::build(config);
    let hosting_app = hosting::build(config);
    let secrets = secrets::build(config);
    let build_projects = project::build(config, &network, &security_groups, &secrets, &database)?;
    let pipeline = pipeline::build(config, &repository, &build_projects)?;
    let outputs = outputs::build(&hosting_app, &repository);

    let stack = Stack {
        name: config.name.clone(),
        description: config.description.clone(),
        region: config.region.clone(),
        network,
        security_groups,
        database,
        bastion,
        repository,
        hosting_app,
        secrets,
        build_projects,
        pipeline,
        outputs,
    };

    let problems = check_stack(&stack);
    if !problems.is_empty() {
        return Err(format!("stack {} is inconsistent: {}", stack.name, problems.join("; ")));
    }
    Ok(stack)
}

/// Every invariant violation in an assembled stack (empty = consistent).
pub fn check_stack(stack: &Stack) -> Vec<String> {
    let mut problems = network::check_network(&stack.network);
    problems.extend(security::check_rules(&stack.security_groups));
    problems.extend(database::check_cluster(&stack.database, &stack.network));
    for group in &stack.database.security_groups {
        if stack.security_group(group).is_none() {
            problems.push(format!("cluster uses unknown security group {}", group));
        }
    }
    if stack.security_group(&stack.bastion.security_group).is_none() {
        problems.push(format!(
            "bastion uses unknown security group {}",
            stack.bastion.security_group
        ));
    }
    if !stack.network.subnets.iter().any(|s| s.id == stack.bastion.subnet) {
        problems.push(format!("bastion uses unknown subnet {}", stack.bastion.subnet));
    }
    problems.extend(secrets::check_secrets(stack.all_secrets()));
    problems.extend(project::check_projects(stack));
    problems.extend(pipeline::check_pipeline(stack));
    problems.extend(outputs::check_outputs(stack));
    problems
}

/// Secrets holding literal placeholder values that must be replaced by hand.
pub fn placeholder_secrets(stack: &Stack) -> Vec<&Secret> {
    stack.all_secrets().filter(|s| s.is_placeholder()).collect()
}
