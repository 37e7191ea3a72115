//! AS-020: Exported stack outputs.

use super::get_att;
use super::hosting::APP_ID;
use super::repository::REPOSITORY_ID;
use crate::core::types::*;

/// Outputs exported for other stacks.
pub fn build(app: &HostingApp, repository: &Repository) -> Vec<StackOutput> {
    vec![
        StackOutput {
            id: "AmplifyAppId".to_string(),
            description: "The ID of the Amplify Application".to_string(),
            export_name: "amplifyAppId".to_string(),
            resource: app.id.clone(),
            attribute: "AppId".to_string(),
        },
        StackOutput {
            id: "CodeCommitHTTPCloneUrl".to_string(),
            description: "The git HTTP clone URL".to_string(),
            export_name: "codeCommitHTTPCloneUrl".to_string(),
            resource: repository.id.clone(),
            attribute: "CloneUrlHttp".to_string(),
        },
    ]
}

/// Check outputs point at stack constructs and exports are unique.
pub fn check_outputs(stack: &Stack) -> Vec<String> {
    let mut problems = Vec::new();
    let mut exports = std::collections::HashSet::new();
    for output in &stack.outputs {
        if output.resource != APP_ID && output.resource != REPOSITORY_ID {
            problems.push(format!(
                "output {} references unknown resource {}",
                output.id, output.resource
            ));
        }
        if !exports.insert(output.export_name.as_str()) {
            problems.push(format!("duplicate export name {}", output.export_name));
        }
    }
    problems
}

pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    for output in &stack.outputs {
        template.outputs.insert(
            output.id.clone(),
            CfnOutput {
                description: Some(output.description.clone()),
                value: get_att(&output.resource, &output.attribute),
                export: Some(CfnExport {
                    name: output.export_name.clone(),
                }),
            },
        );
    }
    Ok(())
}
