//! AS-013: Delivery pipeline. A Source stage, then a concurrent Deploy stage.
//!
//! Stages run sequentially. Actions in one stage share a run order and start
//! together; the stage succeeds only if every action succeeds.

use super::project::{DEPLOY_AMPLIFY, DEPLOY_DATABASE};
use super::{allow, assume_role_policy, cfn_ref, get_att, join, policy_document, regional_arn};
use crate::core::types::*;
use serde_json::{json, Value};
use std::collections::HashSet;

pub const PIPELINE_ID: &str = "AmplifyAndDBCodePipeline";
pub const ARTIFACT_BUCKET_ID: &str = "AmplifyAndDBCodePipelineArtifactsBucket";
pub const SOURCE_ARTIFACT: &str = "SourceArtifact";

pub const SOURCE_STAGE: &str = "Source";
pub const DEPLOY_STAGE: &str = "Deploy";

const EVENTS_ROLE_ID: &str = "AmplifyAndDBCodePipelineEventsRole";

/// Build the two-stage pipeline wiring the repository to both projects.
pub fn build(
    config: &StackConfig,
    repository: &Repository,
    projects: &[BuildProject],
) -> Result<Pipeline, String> {
    let deploy = |label: &str| -> Result<Action, String> {
        let project = projects
            .iter()
            .find(|p| p.label == label)
            .ok_or_else(|| format!("pipeline needs build project {}", label))?;
        Ok(Action {
            name: project.label.clone(),
            kind: ActionKind::CodeBuild {
                project: project.id.clone(),
            },
            inputs: vec![SOURCE_ARTIFACT.to_string()],
            outputs: Vec::new(),
            run_order: 1,
        })
    };

    let source = Stage {
        name: SOURCE_STAGE.to_string(),
        actions: vec![Action {
            name: SOURCE_STAGE.to_string(),
            kind: ActionKind::CodeCommitSource {
                repository: repository.id.clone(),
                branch: config.pipeline.branch.clone(),
                trigger: config.pipeline.trigger,
            },
            inputs: Vec::new(),
            outputs: vec![SOURCE_ARTIFACT.to_string()],
            run_order: 1,
        }],
    };
    let deploy_stage = Stage {
        name: DEPLOY_STAGE.to_string(),
        actions: vec![deploy(DEPLOY_AMPLIFY)?, deploy(DEPLOY_DATABASE)?],
    };

    Ok(Pipeline {
        id: PIPELINE_ID.to_string(),
        name: format!("{}-{}", config.name, PIPELINE_ID),
        artifact_bucket: ARTIFACT_BUCKET_ID.to_string(),
        stages: vec![source, deploy_stage],
    })
}

/// Check stage ordering and artifact flow.
pub fn check_pipeline(stack: &Stack) -> Vec<String> {
    let pipeline = &stack.pipeline;
    let mut problems = Vec::new();
    if pipeline.stages.is_empty() {
        return vec![format!("pipeline {} has no stages", pipeline.id)];
    }

    let mut stage_names = HashSet::new();
    let mut produced: HashSet<&str> = HashSet::new();
    for (index, stage) in pipeline.stages.iter().enumerate() {
        if !stage_names.insert(stage.name.as_str()) {
            problems.push(format!("duplicate stage {}", stage.name));
        }
        if stage.actions.is_empty() {
            problems.push(format!("stage {} has no actions", stage.name));
            continue;
        }
        if !stage.is_concurrent() {
            problems.push(format!("actions in stage {} do not share a run order", stage.name));
        }

        let mut stage_outputs = Vec::new();
        for action in &stage.actions {
            let is_source = action.kind.is_source();
            if index == 0 && !is_source {
                problems.push(format!(
                    "first stage {} holds non-source action {}",
                    stage.name, action.name
                ));
            }
            if index > 0 && is_source {
                problems.push(format!(
                    "source action {} must be in the first stage",
                    action.name
                ));
            }
            for input in &action.inputs {
                if !produced.contains(input.as_str()) {
                    problems.push(format!(
                        "action {} consumes {} before any earlier stage produces it",
                        action.name, input
                    ));
                }
            }
            for output in &action.outputs {
                if produced.contains(output.as_str()) || stage_outputs.contains(&output.as_str()) {
                    problems.push(format!("artifact {} is produced twice", output));
                }
                stage_outputs.push(output.as_str());
            }
            match &action.kind {
                ActionKind::CodeCommitSource { repository, .. } => {
                    if repository != &stack.repository.id {
                        problems.push(format!(
                            "action {} reads unknown repository {}",
                            action.name, repository
                        ));
                    }
                }
                ActionKind::CodeBuild { project } => {
                    if stack.build_project(project).is_none() {
                        problems.push(format!(
                            "action {} runs unknown project {}",
                            action.name, project
                        ));
                    }
                }
            }
        }
        produced.extend(stage_outputs);
    }
    problems
}

fn artifacts(names: &[String]) -> Value {
    Value::Array(names.iter().map(|n| json!({ "Name": n })).collect())
}

fn render_action(action: &Action) -> Value {
    let mut rendered = match &action.kind {
        ActionKind::CodeCommitSource {
            repository,
            branch,
            trigger,
        } => json!({
            "ActionTypeId": {
                "Category": "Source",
                "Owner": "AWS",
                "Provider": "CodeCommit",
                "Version": "1",
            },
            "Configuration": {
                "RepositoryName": get_att(repository, "Name"),
                "BranchName": branch,
                "PollForSourceChanges": *trigger == SourceTrigger::Poll,
            },
            "Name": action.name,
            "RunOrder": action.run_order,
        }),
        ActionKind::CodeBuild { project } => json!({
            "ActionTypeId": {
                "Category": "Build",
                "Owner": "AWS",
                "Provider": "CodeBuild",
                "Version": "1",
            },
            "Configuration": { "ProjectName": cfn_ref(project) },
            "Name": action.name,
            "RunOrder": action.run_order,
        }),
    };
    if !action.inputs.is_empty() {
        rendered["InputArtifacts"] = artifacts(&action.inputs);
    }
    if !action.outputs.is_empty() {
        rendered["OutputArtifacts"] = artifacts(&action.outputs);
    }
    rendered
}

fn pipeline_arn(pipeline: &Pipeline) -> Value {
    regional_arn("codepipeline", vec![cfn_ref(&pipeline.id)])
}

fn bucket_arns(bucket: &str) -> Vec<Value> {
    vec![
        get_att(bucket, "Arn"),
        join(vec![get_att(bucket, "Arn"), json!("/*")]),
    ]
}

fn pipeline_policy(stack: &Stack, role: &str) -> Value {
    let pipeline = &stack.pipeline;
    let mut statements = vec![allow(
        &[
            "s3:Abort*",
            "s3:DeleteObject*",
            "s3:GetBucket*",
            "s3:GetObject*",
            "s3:List*",
            "s3:PutObject",
        ],
        bucket_arns(&pipeline.artifact_bucket),
    )];

    let actions = pipeline.stages.iter().flat_map(|s| &s.actions);
    let repositories: Vec<Value> = actions
        .clone()
        .filter_map(|a| match &a.kind {
            ActionKind::CodeCommitSource { repository, .. } => Some(get_att(repository, "Arn")),
            _ => None,
        })
        .collect();
    if !repositories.is_empty() {
        statements.push(allow(
            &[
                "codecommit:CancelUploadArchive",
                "codecommit:GetBranch",
                "codecommit:GetCommit",
                "codecommit:GetUploadArchiveStatus",
                "codecommit:UploadArchive",
            ],
            repositories,
        ));
    }
    let projects: Vec<Value> = actions
        .filter_map(|a| match &a.kind {
            ActionKind::CodeBuild { project } => Some(get_att(project, "Arn")),
            _ => None,
        })
        .collect();
    if !projects.is_empty() {
        statements.push(allow(
            &["codebuild:BatchGetBuilds", "codebuild:StartBuild", "codebuild:StopBuild"],
            projects,
        ));
    }

    json!({
        "PolicyDocument": policy_document(statements),
        "PolicyName": format!("{}DefaultPolicy", role),
        "Roles": [cfn_ref(role)],
    })
}

/// Render the artifact bucket, pipeline role, pipeline and source trigger.
pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    let pipeline = &stack.pipeline;
    let role = format!("{}Role", pipeline.id);
    let policy = format!("{}DefaultPolicy", role);

    template.resources.insert(
        pipeline.artifact_bucket.clone(),
        CfnResource::new(
            "AWS::S3::Bucket",
            json!({
                "BucketEncryption": {
                    "ServerSideEncryptionConfiguration": [{
                        "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                    }]
                },
                "PublicAccessBlockConfiguration": {
                    "BlockPublicAcls": true,
                    "BlockPublicPolicy": true,
                    "IgnorePublicAcls": true,
                    "RestrictPublicBuckets": true,
                },
            }),
        )
        .retain_policy("Retain"),
    );

    template.resources.insert(
        role.clone(),
        CfnResource::new(
            "AWS::IAM::Role",
            json!({ "AssumeRolePolicyDocument": assume_role_policy("codepipeline.amazonaws.com") }),
        ),
    );
    template.resources.insert(
        policy.clone(),
        CfnResource::new("AWS::IAM::Policy", pipeline_policy(stack, &role)),
    );

    let stages: Vec<Value> = pipeline
        .stages
        .iter()
        .map(|s| {
            json!({
                "Actions": s.actions.iter().map(render_action).collect::<Vec<_>>(),
                "Name": s.name,
            })
        })
        .collect();

    template.resources.insert(
        pipeline.id.clone(),
        CfnResource::new(
            "AWS::CodePipeline::Pipeline",
            json!({
                "ArtifactStore": {
                    "Location": cfn_ref(&pipeline.artifact_bucket),
                    "Type": "S3",
                },
                "Name": pipeline.name,
                "RoleArn": get_att(&role, "Arn"),
                "Stages": stages,
            }),
        )
        .depends_on([policy, role]),
    );

    for action in pipeline.stages.iter().flat_map(|s| &s.actions) {
        if let ActionKind::CodeCommitSource {
            repository,
            branch,
            trigger: SourceTrigger::Events,
        } = &action.kind
        {
            render_event_rule(pipeline, repository, branch, template);
        }
    }

    Ok(())
}

/// EventBridge rule starting the pipeline on pushes to the watched branch.
fn render_event_rule(pipeline: &Pipeline, repository: &str, branch: &str, template: &mut Template) {
    let events_policy = format!("{}DefaultPolicy", EVENTS_ROLE_ID);

    template.resources.insert(
        EVENTS_ROLE_ID.to_string(),
        CfnResource::new(
            "AWS::IAM::Role",
            json!({ "AssumeRolePolicyDocument": assume_role_policy("events.amazonaws.com") }),
        ),
    );
    template.resources.insert(
        events_policy.clone(),
        CfnResource::new(
            "AWS::IAM::Policy",
            json!({
                "PolicyDocument": policy_document(vec![allow(
                    &["codepipeline:StartPipelineExecution"],
                    vec![pipeline_arn(pipeline)],
                )]),
                "PolicyName": events_policy,
                "Roles": [cfn_ref(EVENTS_ROLE_ID)],
            }),
        ),
    );
    template.resources.insert(
        format!("{}{}SourceEventRule", repository, pipeline.id),
        CfnResource::new(
            "AWS::Events::Rule",
            json!({
                "EventPattern": {
                    "detail": {
                        "event": ["referenceCreated", "referenceUpdated"],
                        "referenceName": [branch],
                    },
                    "detail-type": ["CodeCommit Repository State Change"],
                    "resources": [get_att(repository, "Arn")],
                    "source": ["aws.codecommit"],
                },
                "State": "ENABLED",
                "Targets": [{
                    "Arn": pipeline_arn(pipeline),
                    "Id": "Target0",
                    "RoleArn": get_att(EVENTS_ROLE_ID, "Arn"),
                }],
            }),
        ),
    );
}
