//! AS-010: Source repository.

use crate::core::types::*;
use serde_json::json;

pub const REPOSITORY_ID: &str = "CodeCommitRepository";

const DESCRIPTION: &str = "CodeCommit repository that will be used as the source repository for the sample react app and the cdk app";

/// Repository names are the lowercased `<stack>-CodeCommitRepository`.
pub fn build(config: &StackConfig) -> Repository {
    Repository {
        id: REPOSITORY_ID.to_string(),
        name: format!("{}-{}", config.name, REPOSITORY_ID).to_lowercase(),
        description: DESCRIPTION.to_string(),
    }
}

pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    let repo = &stack.repository;
    template.resources.insert(
        repo.id.clone(),
        CfnResource::new(
            "AWS::CodeCommit::Repository",
            json!({
                "RepositoryDescription": repo.description,
                "RepositoryName": repo.name,
            }),
        ),
    );
    Ok(())
}
