//! AS-003: Template resolution and reference-graph ordering.
//!
//! Resolves `{{params.key}}`, `{{stack.name}}` and `{{stack.region}}` in
//! stack.yaml string fields. Builds a DAG from the rendered template's `Ref`,
//! `Fn::GetAtt`, `Fn::Sub` and `DependsOn` edges and computes topological
//! order using Kahn's algorithm with deterministic (alphabetical) tie-breaking.

use super::parser::ValidationError;
use super::types::*;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &HashMap<String, serde_yaml_ng::Value>,
    stack_name: &str,
    region: &str,
) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param_key) = key.strip_prefix("params.") {
            params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else if let Some(field) = key.strip_prefix("stack.") {
            match field {
                "name" => stack_name.to_string(),
                "region" => region.to_string(),
                _ => return Err(format!("unknown stack field: {}", field)),
            }
        } else {
            return Err(format!("unknown template variable: {}", key));
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in every templatable string field of the config.
pub fn resolve_config_templates(config: &StackConfig) -> Result<StackConfig, String> {
    let mut resolved = config.clone();
    let name = config.name.clone();
    let region = config.region.clone();
    let resolve = |field: &str, s: &str| {
        resolve_template(s, &config.params, &name, &region).map_err(|e| format!("{}: {}", field, e))
    };

    if let Some(ref description) = config.description {
        resolved.description = Some(resolve("description", description)?);
    }
    resolved.network.cidr = resolve("network.cidr", &config.network.cidr)?;
    for (i, az) in config.network.availability_zones.iter().enumerate() {
        resolved.network.availability_zones[i] = resolve("network.availability_zones", az)?;
    }
    resolved.database.master_username =
        resolve("database.master_username", &config.database.master_username)?;
    resolved.database.default_database_name = resolve(
        "database.default_database_name",
        &config.database.default_database_name,
    )?;
    resolved.bastion.instance_type = resolve("bastion.instance_type", &config.bastion.instance_type)?;
    resolved.build.env_name = resolve("build.env_name", &config.build.env_name)?;
    resolved.build.image = resolve("build.image", &config.build.image)?;
    resolved.pipeline.branch = resolve("pipeline.branch", &config.pipeline.branch)?;

    Ok(resolved)
}

/// Apply `key=value` overrides to the config's params.
pub fn apply_param_overrides(config: &mut StackConfig, overrides: &[String]) -> Result<(), String> {
    for entry in overrides {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("param override '{}' must be key=value", entry))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("param override '{}' has an empty key", entry));
        }
        config.params.insert(
            key.to_string(),
            serde_yaml_ng::Value::String(value.to_string()),
        );
    }
    Ok(())
}

fn sub_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^!}][^}.]*)(?:\.[^}]*)?\}").expect("static regex"))
}

fn is_pseudo_parameter(name: &str) -> bool {
    name.starts_with("AWS::")
}

/// Collect every logical id or parameter a JSON value refers to.
pub fn collect_references(value: &serde_json::Value, refs: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(target)) = map.get("Ref") {
                if map.len() == 1 && !is_pseudo_parameter(target) {
                    refs.insert(target.clone());
                }
            }
            if let Some(serde_json::Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(serde_json::Value::String(target)) = parts.first() {
                    refs.insert(target.clone());
                }
            }
            if let Some(sub) = map.get("Fn::Sub") {
                let text = match sub {
                    serde_json::Value::String(s) => Some(s.as_str()),
                    serde_json::Value::Array(parts) => parts.first().and_then(|p| p.as_str()),
                    _ => None,
                };
                if let Some(text) = text {
                    for cap in sub_pattern().captures_iter(text) {
                        let name = &cap[1];
                        if !is_pseudo_parameter(name) {
                            refs.insert(name.to_string());
                        }
                    }
                }
            }
            for v in map.values() {
                collect_references(v, refs);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_references(v, refs);
            }
        }
        _ => {}
    }
}

/// Direct resource dependencies of one resource: references plus DependsOn,
/// excluding template parameters.
pub fn resource_dependencies(template: &Template, resource: &CfnResource) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    for v in resource.properties.values() {
        collect_references(v, &mut refs);
    }
    refs.extend(resource.depends_on.iter().cloned());
    refs.retain(|r| !template.parameters.contains_key(r));
    refs
}

/// Build a topological order of template resources.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn build_execution_order(template: &Template) -> Result<Vec<String>, String> {
    let resource_ids: Vec<String> = template.resources.keys().cloned().collect();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for id in &resource_ids {
        in_degree.insert(id.clone(), 0);
        adjacency.insert(id.clone(), Vec::new());
    }

    for (id, resource) in &template.resources {
        for dep in resource_dependencies(template, resource) {
            if dep == *id {
                return Err(format!("resource '{}' references itself", id));
            }
            let Some(dependents) = adjacency.get_mut(&dep) else {
                return Err(format!("resource '{}' references unknown '{}'", id, dep));
            };
            dependents.push(id.clone());
            if let Some(degree) = in_degree.get_mut(id) {
                *degree += 1;
            }
        }
    }

    let mut zero_degree: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    zero_degree.sort();
    let mut queue: VecDeque<String> = zero_degree.into_iter().collect();

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.clone());

        let mut next_ready: Vec<String> = Vec::new();
        if let Some(neighbors) = adjacency.get(&current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor.clone());
                    }
                }
            }
        }
        next_ready.sort();
        queue.extend(next_ready);
    }

    if order.len() != resource_ids.len() {
        let ordered: HashSet<_> = order.iter().collect();
        let mut cycle_members: Vec<&str> = resource_ids
            .iter()
            .filter(|id| !ordered.contains(id))
            .map(String::as_str)
            .collect();
        cycle_members.sort();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

/// Validate a rendered template: known references, resolvable outputs,
/// unique export names, acyclic resource graph.
pub fn validate_template(template: &Template) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let known = |id: &str| {
        template.resources.contains_key(id) || template.parameters.contains_key(id)
    };

    if template.resources.is_empty() {
        errors.push(ValidationError {
            message: "template declares no resources".to_string(),
        });
    }

    for (id, resource) in &template.resources {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            errors.push(ValidationError {
                message: format!("logical id '{}' must be alphanumeric", id),
            });
        }
        for dep in resource_dependencies(template, resource) {
            if !known(&dep) {
                errors.push(ValidationError {
                    message: format!("resource '{}' references unknown '{}'", id, dep),
                });
            }
        }
    }

    let mut exports = HashSet::new();
    for (id, output) in &template.outputs {
        let mut refs = BTreeSet::new();
        collect_references(&output.value, &mut refs);
        for r in refs {
            if !known(&r) {
                errors.push(ValidationError {
                    message: format!("output '{}' references unknown '{}'", id, r),
                });
            }
        }
        if let Some(ref export) = output.export {
            if !exports.insert(export.name.as_str()) {
                errors.push(ValidationError {
                    message: format!("duplicate export name '{}'", export.name),
                });
            }
        }
    }

    // Cycle detection only makes sense once every edge resolves
    if errors.is_empty() {
        if let Err(e) = build_execution_order(template) {
            errors.push(ValidationError { message: e });
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, serde_yaml_ng::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_yaml_ng::Value::String(v.to_string())))
            .collect()
    }

    fn template(resources: Vec<(&str, CfnResource)>) -> Template {
        Template {
            format_version: "2010-09-09".to_string(),
            resources: resources
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            ..Template::default()
        }
    }

    #[test]
    fn test_as003_resolve_params() {
        let p = params(&[("vpc_cidr", "10.0.0.0/24")]);
        let result = resolve_template("{{params.vpc_cidr}}", &p, "S", "us-east-1").unwrap();
        assert_eq!(result, "10.0.0.0/24");
    }

    #[test]
    fn test_as003_resolve_stack_fields() {
        let p = HashMap::new();
        let result =
            resolve_template("{{stack.name}}@{{ stack.region }}", &p, "Demo", "eu-west-1").unwrap();
        assert_eq!(result, "Demo@eu-west-1");
    }

    #[test]
    fn test_as003_resolve_unknown() {
        let p = HashMap::new();
        let err = resolve_template("{{params.missing}}", &p, "S", "r").unwrap_err();
        assert!(err.contains("unknown param"));
        let err = resolve_template("{{stack.account}}", &p, "S", "r").unwrap_err();
        assert!(err.contains("unknown stack field"));
        let err = resolve_template("{{other}}", &p, "S", "r").unwrap_err();
        assert!(err.contains("unknown template variable"));
        let err = resolve_template("{{params.x", &p, "S", "r").unwrap_err();
        assert!(err.contains("unclosed"));
    }

    #[test]
    fn test_as003_resolve_numeric_param() {
        let mut p = HashMap::new();
        p.insert("azs".to_string(), serde_yaml_ng::Value::Number(3.into()));
        let result = resolve_template("n={{params.azs}}", &p, "S", "r").unwrap();
        assert_eq!(result, "n=3");
    }

    #[test]
    fn test_as003_resolve_config() {
        let yaml = r#"
version: "1.0"
name: Demo
description: "{{stack.name}} in {{stack.region}}"
params:
  vpc_cidr: 10.9.0.0/24
  branch: main
pipeline:
  branch: "{{params.branch}}"
"#;
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        let resolved = resolve_config_templates(&config).unwrap();
        assert_eq!(resolved.network.cidr, "10.9.0.0/24");
        assert_eq!(resolved.pipeline.branch, "main");
        assert_eq!(resolved.description.as_deref(), Some("Demo in us-east-1"));
    }

    #[test]
    fn test_as003_resolve_config_reports_field() {
        let yaml = r#"
version: "1.0"
name: Demo
"#;
        let config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        let err = resolve_config_templates(&config).unwrap_err();
        assert!(err.starts_with("network.cidr"));
        assert!(err.contains("vpc_cidr"));
    }

    #[test]
    fn test_as003_param_overrides() {
        let yaml = r#"
version: "1.0"
name: Demo
params:
  vpc_cidr: 10.0.0.0/24
"#;
        let mut config: StackConfig = serde_yaml_ng::from_str(yaml).unwrap();
        apply_param_overrides(&mut config, &["vpc_cidr=10.5.0.0/24".to_string()]).unwrap();
        let resolved = resolve_config_templates(&config).unwrap();
        assert_eq!(resolved.network.cidr, "10.5.0.0/24");
        assert!(apply_param_overrides(&mut config, &["novalue".to_string()]).is_err());
        assert!(apply_param_overrides(&mut config, &["=x".to_string()]).is_err());
    }

    #[test]
    fn test_as003_collect_references() {
        let value = json!({
            "VpcId": {"Ref": "VPC"},
            "Region": {"Ref": "AWS::Region"},
            "GroupId": {"Fn::GetAtt": ["DbSg", "GroupId"]},
            "Arn": {"Fn::Sub": "arn:${AWS::Partition}:s3:::${Bucket}/*"},
            "Nested": [{"Ref": "Role"}],
            "Literal": {"Fn::Sub": "${!NotARef}"},
        });
        let mut refs = BTreeSet::new();
        collect_references(&value, &mut refs);
        let refs: Vec<_> = refs.into_iter().collect();
        assert_eq!(refs, vec!["Bucket", "DbSg", "Role", "VPC"]);
    }

    #[test]
    fn test_as003_order_linear() {
        let t = template(vec![
            ("C", CfnResource::new("T", json!({"X": {"Ref": "B"}}))),
            ("B", CfnResource::new("T", json!({"X": {"Fn::GetAtt": ["A", "Arn"]}}))),
            ("A", CfnResource::new("T", json!({}))),
        ]);
        assert_eq!(build_execution_order(&t).unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_as003_order_tie_break_and_depends_on() {
        let t = template(vec![
            ("Zeta", CfnResource::new("T", json!({}))),
            ("Alpha", CfnResource::new("T", json!({})).depends_on(["Zeta"])),
            ("Beta", CfnResource::new("T", json!({}))),
        ]);
        assert_eq!(build_execution_order(&t).unwrap(), vec!["Beta", "Zeta", "Alpha"]);
    }

    #[test]
    fn test_as003_order_parameters_are_not_nodes() {
        let mut t = template(vec![(
            "Instance",
            CfnResource::new("T", json!({"ImageId": {"Ref": "ImageParam"}})),
        )]);
        t.parameters.insert(
            "ImageParam".to_string(),
            CfnParameter {
                parameter_type: "String".to_string(),
                default: None,
                description: None,
            },
        );
        assert_eq!(build_execution_order(&t).unwrap(), vec!["Instance"]);
    }

    #[test]
    fn test_as003_order_cycle() {
        let t = template(vec![
            ("A", CfnResource::new("T", json!({"X": {"Ref": "B"}}))),
            ("B", CfnResource::new("T", json!({"X": {"Ref": "A"}}))),
        ]);
        let err = build_execution_order(&t).unwrap_err();
        assert!(err.contains("cycle"));
        assert!(err.contains("A, B"));
    }

    #[test]
    fn test_as003_order_unknown() {
        let t = template(vec![("A", CfnResource::new("T", json!({"X": {"Ref": "Ghost"}})))]);
        assert!(build_execution_order(&t).unwrap_err().contains("unknown 'Ghost'"));
    }

    #[test]
    fn test_as003_validate_template() {
        let mut t = template(vec![
            ("A", CfnResource::new("T", json!({"X": {"Ref": "Ghost"}}))),
            ("Bad-Id", CfnResource::new("T", json!({}))),
        ]);
        t.outputs.insert(
            "O1".to_string(),
            CfnOutput {
                description: None,
                value: json!({"Fn::GetAtt": ["Nowhere", "Arn"]}),
                export: Some(CfnExport {
                    name: "dup".to_string(),
                }),
            },
        );
        t.outputs.insert(
            "O2".to_string(),
            CfnOutput {
                description: None,
                value: json!({"Ref": "A"}),
                export: Some(CfnExport {
                    name: "dup".to_string(),
                }),
            },
        );
        let errors: Vec<String> = validate_template(&t).into_iter().map(|e| e.message).collect();
        assert!(errors.iter().any(|e| e.contains("unknown 'Ghost'")));
        assert!(errors.iter().any(|e| e.contains("must be alphanumeric")));
        assert!(errors.iter().any(|e| e.contains("output 'O1'")));
        assert!(errors.iter().any(|e| e.contains("duplicate export")));
    }

    #[test]
    fn test_as003_validate_template_cycle() {
        let t = template(vec![
            ("A", CfnResource::new("T", json!({})).depends_on(["B"])),
            ("B", CfnResource::new("T", json!({})).depends_on(["A"])),
        ]);
        let errors = validate_template(&t);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("cycle"));
    }
}
