//! AS-016: Drift detection against the written template and its lock.
//!
//! A template edited by hand after synthesis no longer matches the lock's
//! file hash. When that happens the template is re-parsed and each resource
//! is re-hashed so the report names what changed.

use crate::core::types::StackLock;
use crate::core::{planner, state, synth};
use crate::tripwire::hasher;
use std::path::Path;

/// Pseudo resource id used for whole-template findings.
pub const TEMPLATE_ID: &str = "template";

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub resource_id: String,
    pub resource_type: String,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

fn template_finding(lock: &StackLock, actual_hash: &str, detail: String) -> DriftFinding {
    DriftFinding {
        resource_id: TEMPLATE_ID.to_string(),
        resource_type: lock.format.to_string(),
        expected_hash: lock.template_hash.clone(),
        actual_hash: actual_hash.to_string(),
        detail,
    }
}

/// Check a stack's written template against its lock.
pub fn detect_drift(out_dir: &Path, lock: &StackLock) -> Vec<DriftFinding> {
    let path = state::template_path(out_dir, &lock.stack, lock.format);
    if !path.exists() {
        return vec![template_finding(
            lock,
            "MISSING",
            format!("{} does not exist", path.display()),
        )];
    }

    let actual = hasher::hash_file(&path).unwrap_or_else(|e| format!("ERROR:{}", e));
    if actual == lock.template_hash {
        return Vec::new();
    }

    let parsed = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))
        .and_then(|content| synth::parse_template(&content, lock.format));
    let template = match parsed {
        Ok(t) => t,
        Err(e) => return vec![template_finding(lock, &actual, format!("template unreadable: {}", e))],
    };

    let mut findings = Vec::new();
    for (id, rl) in &lock.resources {
        match template.resources.get(id) {
            None => findings.push(DriftFinding {
                resource_id: id.clone(),
                resource_type: rl.resource_type.clone(),
                expected_hash: rl.hash.clone(),
                actual_hash: "MISSING".to_string(),
                detail: format!("{} removed from template", id),
            }),
            Some(resource) => {
                let hash = planner::hash_resource(resource);
                if hash != rl.hash {
                    findings.push(DriftFinding {
                        resource_id: id.clone(),
                        resource_type: resource.resource_type.clone(),
                        expected_hash: rl.hash.clone(),
                        actual_hash: hash,
                        detail: format!("{} modified", id),
                    });
                }
            }
        }
    }
    for (id, resource) in &template.resources {
        if !lock.resources.contains_key(id) {
            findings.push(DriftFinding {
                resource_id: id.clone(),
                resource_type: resource.resource_type.clone(),
                expected_hash: "ABSENT".to_string(),
                actual_hash: planner::hash_resource(resource),
                detail: format!("{} added outside synth", id),
            });
        }
    }

    // Edits outside Resources (outputs, parameters, formatting) still count
    if findings.is_empty() {
        findings.push(template_finding(lock, &actual, "template content changed".to_string()));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembly::tests::demo_config;
    use crate::core::types::TemplateFormat;

    fn synth_demo(format: TemplateFormat) -> (tempfile::TempDir, StackLock) {
        let dir = tempfile::tempdir().unwrap();
        let config = demo_config();
        synth::synth(&synth::SynthConfig {
            config: &config,
            out_dir: dir.path(),
            format,
        })
        .unwrap();
        let lock = state::load_lock(dir.path(), "DemoStack").unwrap().unwrap();
        (dir, lock)
    }

    fn edit(dir: &Path, format: TemplateFormat, f: impl FnOnce(&mut serde_json::Value)) {
        let path = state::template_path(dir, "DemoStack", format);
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        f(&mut value);
        std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_as016_no_drift_after_synth() {
        let (dir, lock) = synth_demo(TemplateFormat::Json);
        assert!(detect_drift(dir.path(), &lock).is_empty());
    }

    #[test]
    fn test_as016_missing_template() {
        let (dir, lock) = synth_demo(TemplateFormat::Yaml);
        std::fs::remove_file(state::template_path(dir.path(), "DemoStack", TemplateFormat::Yaml))
            .unwrap();
        let findings = detect_drift(dir.path(), &lock);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource_id, TEMPLATE_ID);
        assert_eq!(findings[0].actual_hash, "MISSING");
    }

    #[test]
    fn test_as016_modified_resource() {
        let (dir, lock) = synth_demo(TemplateFormat::Json);
        edit(dir.path(), TemplateFormat::Json, |t| {
            t["Resources"]["BastionHost"]["Properties"]["InstanceType"] = "m5.large".into();
        });
        let findings = detect_drift(dir.path(), &lock);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource_id, "BastionHost");
        assert_eq!(findings[0].resource_type, "AWS::EC2::Instance");
        assert!(findings[0].detail.contains("modified"));
    }

    #[test]
    fn test_as016_added_and_removed_resources() {
        let (dir, lock) = synth_demo(TemplateFormat::Json);
        edit(dir.path(), TemplateFormat::Json, |t| {
            let resources = t["Resources"].as_object_mut().unwrap();
            resources.remove("AmplifyReactApp");
            resources.insert(
                "ExtraQueue".to_string(),
                serde_json::json!({"Type": "AWS::SQS::Queue"}),
            );
        });
        let findings = detect_drift(dir.path(), &lock);
        assert_eq!(findings.len(), 2);
        let removed = findings.iter().find(|f| f.resource_id == "AmplifyReactApp").unwrap();
        assert_eq!(removed.actual_hash, "MISSING");
        let added = findings.iter().find(|f| f.resource_id == "ExtraQueue").unwrap();
        assert_eq!(added.expected_hash, "ABSENT");
    }

    #[test]
    fn test_as016_output_edit_reports_template() {
        let (dir, lock) = synth_demo(TemplateFormat::Json);
        edit(dir.path(), TemplateFormat::Json, |t| {
            t["Outputs"]["AmplifyAppId"]["Description"] = "edited".into();
        });
        let findings = detect_drift(dir.path(), &lock);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource_id, TEMPLATE_ID);
        assert_eq!(findings[0].detail, "template content changed");
    }

    #[test]
    fn test_as016_unreadable_template() {
        let (dir, lock) = synth_demo(TemplateFormat::Json);
        std::fs::write(
            state::template_path(dir.path(), "DemoStack", TemplateFormat::Json),
            "not json",
        )
        .unwrap();
        let findings = detect_drift(dir.path(), &lock);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].detail.starts_with("template unreadable"));
    }
}
