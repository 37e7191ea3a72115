//! AS-012: CodeBuild projects for the front-end deploy and database migrations.
//!
//! Each project carries a version 0.2 buildspec. Secrets reach the build
//! through `env.secrets-manager`; the project role is granted read access to
//! exactly the secrets it references.

use super::pipeline::ARTIFACT_BUCKET_ID;
use super::secrets::{
    ACCESS_KEY_ID_ENV, ACCESS_KEY_ID_SECRET, SECRET_ACCESS_KEY_ENV, SECRET_ACCESS_KEY_SECRET,
};
use super::database;
use super::security::BUILD_SECURITY_GROUP;
use super::{allow, assume_role_policy, cfn_ref, get_att, join, logical_id, policy_document, regional_arn};
use crate::core::types::*;
use indexmap::IndexMap;
use serde_json::{json, Value};

pub const DEPLOY_AMPLIFY: &str = "DeployAmplify";
pub const DEPLOY_DATABASE: &str = "DeployDatabase";

const BUILDSPEC_VERSION: &str = "0.2";

/// Keys of the generated database secret exposed to the migration build.
const DATABASE_SECRET_KEYS: [&str; 5] = ["engine", "username", "password", "host", "dbname"];

/// Logical id of a project: `<stack>CodeBuild<label>` with non-alphanumerics dropped.
pub fn project_id(stack_name: &str, label: &str) -> String {
    logical_id(&[stack_name, "CodeBuild", label])
}

/// Wrap a JSON value as one double-quoted shell argument.
fn shell_json(value: &Value) -> String {
    format!("\"{}\"", value.to_string().replace('"', "\\\""))
}

fn phase(runtimes: &[(&str, &str)], commands: Vec<String>) -> BuildPhase {
    BuildPhase {
        runtime_versions: runtimes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        commands,
    }
}

/// Buildspec that initializes, configures and publishes the Amplify front end.
pub fn amplify_spec(build: &BuildConfig, region: &str, secrets: &[Secret]) -> Result<BuildSpec, String> {
    let secret_name = |id: &str| {
        secrets
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.clone())
            .ok_or_else(|| format!("build project {} needs secret {}", DEPLOY_AMPLIFY, id))
    };

    let mut env = BuildEnv::default();
    env.secrets_manager
        .insert(ACCESS_KEY_ID_ENV.to_string(), secret_name(ACCESS_KEY_ID_SECRET)?);
    env.secrets_manager.insert(
        SECRET_ACCESS_KEY_ENV.to_string(),
        secret_name(SECRET_ACCESS_KEY_SECRET)?,
    );

    let amplify = shell_json(&json!({
        "envName": build.env_name,
        "defaultEditor": "code",
    }));
    let providers = shell_json(&json!({
        "awscloudformation": {
            "useProfile": false,
            "accessKeyId": format!("${}", ACCESS_KEY_ID_ENV),
            "secretAccessKey": format!("${}", SECRET_ACCESS_KEY_ENV),
            "region": region,
        }
    }));
    let frontend = shell_json(&json!({
        "frontend": "javascript",
        "framework": "react",
        "config": {
            "SourceDir": "src",
            "DistributionDir": "build",
            "BuildCommand": "npm run-script build",
            "StartCommand": "npm run-script start",
        }
    }));

    let mut phases = IndexMap::new();
    phases.insert(
        BuildPhaseName::Install,
        phase(
            &[
                ("python", build.python_version.as_str()),
                ("nodejs", build.nodejs_version.as_str()),
            ],
            vec![
                format!("npm install -g {}", build.amplify_cli_package),
                "npm install".to_string(),
            ],
        ),
    );
    phases.insert(
        BuildPhaseName::Build,
        phase(
            &[],
            vec![
                format!("npx amplify init --yes --amplify {} --providers {}", amplify, providers),
                format!(
                    "npx amplify configure project --yes --amplify {} --providers {} --frontend {}",
                    amplify, providers, frontend
                ),
                "npx amplify publish --invalidateCloudFront --yes".to_string(),
            ],
        ),
    );

    Ok(BuildSpec {
        version: BUILDSPEC_VERSION.to_string(),
        env,
        phases,
    })
}

/// Buildspec that points alembic at the cluster and upgrades to head.
pub fn migration_spec(build: &BuildConfig, database_secret: &Secret) -> BuildSpec {
    let mut env = BuildEnv::default();
    for key in DATABASE_SECRET_KEYS {
        env.secrets_manager.insert(
            format!("DATABASE_SECRET_{}", key.to_uppercase()),
            format!("{}:{}", database_secret.name, key),
        );
    }

    let mut pre_build = vec![
        "python3 -m venv env".to_string(),
        "source env/bin/activate".to_string(),
    ];
    pre_build.extend(build.migration_packages.iter().map(|p| format!("pip install {}", p)));
    pre_build.push(
        r#"sed -i "s/sqlalchemy.url = [^\n]*/sqlalchemy.url = postgresql:\/\/$DATABASE_SECRET_USERNAME:$DATABASE_SECRET_PASSWORD@$DATABASE_SECRET_HOST\/$DATABASE_SECRET_DBNAME/" alembic.ini"#
            .to_string(),
    );

    let mut phases = IndexMap::new();
    phases.insert(
        BuildPhaseName::Install,
        phase(
            &[],
            vec![
                "yum install -y python3-devel postgresql-devel".to_string(),
                "yum install -y jq".to_string(),
            ],
        ),
    );
    phases.insert(BuildPhaseName::PreBuild, phase(&[], pre_build));
    phases.insert(
        BuildPhaseName::Build,
        phase(&[], vec!["alembic upgrade head".to_string()]),
    );

    BuildSpec {
        version: BUILDSPEC_VERSION.to_string(),
        env,
        phases,
    }
}

/// Build both projects. The migration project runs in the private subnets
/// with the build security group so it can reach the database.
pub fn build(
    config: &StackConfig,
    network: &Network,
    groups: &[SecurityGroup],
    secrets: &[Secret],
    database: &DatabaseCluster,
) -> Result<Vec<BuildProject>, String> {
    if !groups.iter().any(|g| g.id == BUILD_SECURITY_GROUP) {
        return Err(format!("build projects need security group {}", BUILD_SECURITY_GROUP));
    }
    let private = network.subnet_ids(SubnetType::Private);
    if private.is_empty() {
        return Err("migration project needs a private subnet".to_string());
    }

    let amplify = BuildProject {
        id: project_id(&config.name, DEPLOY_AMPLIFY),
        label: DEPLOY_AMPLIFY.to_string(),
        image: config.build.image.clone(),
        compute_type: config.build.compute_type,
        spec: amplify_spec(&config.build, &config.region, secrets)?,
        secret_access: vec![
            ACCESS_KEY_ID_SECRET.to_string(),
            SECRET_ACCESS_KEY_SECRET.to_string(),
        ],
        vpc: None,
    };

    let migrations = BuildProject {
        id: project_id(&config.name, DEPLOY_DATABASE),
        label: DEPLOY_DATABASE.to_string(),
        image: config.build.image.clone(),
        compute_type: config.build.compute_type,
        spec: migration_spec(&config.build, &database.credentials.secret),
        secret_access: vec![database.credentials.secret.id.clone()],
        vpc: Some(BuildVpcPlacement {
            vpc: network.id.clone(),
            subnets: private,
            security_groups: vec![BUILD_SECURITY_GROUP.to_string()],
        }),
    };

    Ok(vec![amplify, migrations])
}

/// Check buildspec ordering, secret references and VPC placement.
pub fn check_projects(stack: &Stack) -> Vec<String> {
    let mut problems = Vec::new();
    for project in &stack.build_projects {
        let keys: Vec<_> = project.spec.phases.keys().collect();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            problems.push(format!("project {} phases are out of order", project.id));
        }
        if project.spec.commands().is_empty() {
            problems.push(format!("project {} has no commands", project.id));
        }

        for (var, reference) in &project.spec.env.secrets_manager {
            let (name, key) = match reference.split_once(':') {
                Some((n, k)) => (n, Some(k)),
                None => (reference.as_str(), None),
            };
            match stack.all_secrets().find(|s| s.name == name) {
                Some(secret) if project.secret_access.contains(&secret.id) => {
                    let db_secret = &stack.database.credentials.secret;
                    if let (Some(key), true) = (key, secret.id == db_secret.id) {
                        if !database::secret_keys(&stack.database).iter().any(|k| k == key) {
                            problems.push(format!(
                                "project {} reads {} from key {} that {} never holds",
                                project.id, var, key, secret.id
                            ));
                        }
                    }
                }
                Some(secret) => problems.push(format!(
                    "project {} reads {} from {} without access",
                    project.id, var, secret.id
                )),
                None => problems.push(format!(
                    "project {} env {} references undeclared secret {}",
                    project.id, var, name
                )),
            }
        }
        for id in &project.secret_access {
            if !stack.all_secrets().any(|s| &s.id == id) {
                problems.push(format!("project {} grants access to unknown secret {}", project.id, id));
            }
        }

        if let Some(vpc) = &project.vpc {
            for subnet in &vpc.subnets {
                if !stack.network.subnets.iter().any(|s| &s.id == subnet) {
                    problems.push(format!("project {} uses unknown subnet {}", project.id, subnet));
                }
            }
            for group in &vpc.security_groups {
                if stack.security_group(group).is_none() {
                    problems.push(format!(
                        "project {} uses unknown security group {}",
                        project.id, group
                    ));
                }
            }
        }
    }
    problems
}

fn default_policy(project: &BuildProject, role: &str) -> Value {
    let log_group = |suffix: &str| {
        regional_arn(
            "logs",
            vec![json!("log-group:/aws/codebuild/"), cfn_ref(&project.id), json!(suffix)],
        )
    };
    let statements = vec![
        allow(
            &["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
            vec![log_group(""), log_group(":*")],
        ),
        allow(
            &[
                "codebuild:BatchPutCodeCoverages",
                "codebuild:BatchPutTestCases",
                "codebuild:CreateReport",
                "codebuild:CreateReportGroup",
                "codebuild:UpdateReport",
            ],
            vec![regional_arn(
                "codebuild",
                vec![json!("report-group/"), cfn_ref(&project.id), json!("-*")],
            )],
        ),
        allow(
            &["secretsmanager:GetSecretValue"],
            project.secret_access.iter().map(|s| cfn_ref(s)).collect(),
        ),
        allow(
            &["s3:GetBucket*", "s3:GetObject*", "s3:List*"],
            vec![
                get_att(ARTIFACT_BUCKET_ID, "Arn"),
                join(vec![get_att(ARTIFACT_BUCKET_ID, "Arn"), json!("/*")]),
            ],
        ),
    ];
    json!({
        "PolicyDocument": policy_document(statements),
        "PolicyName": format!("{}DefaultPolicy", role),
        "Roles": [cfn_ref(role)],
    })
}

fn vpc_policy(project: &BuildProject, placement: &BuildVpcPlacement, role: &str) -> Value {
    let subnet_arns: Vec<Value> = placement
        .subnets
        .iter()
        .map(|s| regional_arn("ec2", vec![json!("subnet/"), cfn_ref(s)]))
        .collect();
    let statements = vec![
        allow(
            &[
                "ec2:CreateNetworkInterface",
                "ec2:DeleteNetworkInterface",
                "ec2:DescribeDhcpOptions",
                "ec2:DescribeNetworkInterfaces",
                "ec2:DescribeSecurityGroups",
                "ec2:DescribeSubnets",
                "ec2:DescribeVpcs",
            ],
            vec![json!("*")],
        ),
        json!({
            "Action": "ec2:CreateNetworkInterfacePermission",
            "Condition": {
                "StringEquals": {
                    "ec2:Subnet": subnet_arns,
                    "ec2:AuthorizedService": "codebuild.amazonaws.com",
                }
            },
            "Effect": "Allow",
            "Resource": regional_arn("ec2", vec![json!("network-interface/*")]),
        }),
    ];
    json!({
        "PolicyDocument": policy_document(statements),
        "PolicyName": format!("{}VpcPolicy", project.id),
        "Roles": [cfn_ref(role)],
    })
}

/// Render role, policies and project for every build project.
pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    for project in &stack.build_projects {
        let role = format!("{}Role", project.id);
        let buildspec = serde_json::to_string_pretty(&project.spec)
            .map_err(|e| format!("buildspec serialize error for {}: {}", project.id, e))?;

        template.resources.insert(
            role.clone(),
            CfnResource::new(
                "AWS::IAM::Role",
                json!({ "AssumeRolePolicyDocument": assume_role_policy("codebuild.amazonaws.com") }),
            ),
        );
        template.resources.insert(
            format!("{}DefaultPolicy", role),
            CfnResource::new("AWS::IAM::Policy", default_policy(project, &role)),
        );

        let mut properties = json!({
            "Artifacts": { "Type": "NO_ARTIFACTS" },
            "EncryptionKey": "alias/aws/s3",
            "Environment": {
                "ComputeType": project.compute_type.as_codebuild(),
                "Image": project.image,
                "ImagePullCredentialsType": "CODEBUILD",
                "PrivilegedMode": false,
                "Type": "LINUX_CONTAINER",
            },
            "ServiceRole": get_att(&role, "Arn"),
            "Source": { "BuildSpec": buildspec, "Type": "NO_SOURCE" },
        });
        let mut depends_on = Vec::new();

        if let Some(placement) = &project.vpc {
            let policy = format!("{}VpcPolicy", project.id);
            template.resources.insert(
                policy.clone(),
                CfnResource::new("AWS::IAM::Policy", vpc_policy(project, placement, &role)),
            );
            properties["VpcConfig"] = json!({
                "SecurityGroupIds": placement
                    .security_groups
                    .iter()
                    .map(|g| get_att(g, "GroupId"))
                    .collect::<Vec<_>>(),
                "Subnets": placement.subnets.iter().map(|s| cfn_ref(s)).collect::<Vec<_>>(),
                "VpcId": cfn_ref(&placement.vpc),
            });
            depends_on.push(policy);
        }

        template.resources.insert(
            project.id.clone(),
            CfnResource::new("AWS::CodeBuild::Project", properties).depends_on(depends_on),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembly::tests::demo_config;

    fn stack() -> Stack {
        crate::core::assembly::assemble(&demo_config()).unwrap()
    }

    #[test]
    fn test_as012_project_ids() {
        let stack = stack();
        assert_eq!(stack.build_projects[0].id, "DemoStackCodeBuildDeployAmplify");
        assert_eq!(stack.build_projects[1].id, "DemoStackCodeBuildDeployDatabase");
        assert_eq!(project_id("My-Stack", DEPLOY_DATABASE), "MyStackCodeBuildDeployDatabase");
        for p in &stack.build_projects {
            assert_eq!(p.compute_type, ComputeType::Large);
            assert_eq!(p.image, "aws/codebuild/amazonlinux2-x86_64-standard:3.0");
        }
    }

    #[test]
    fn test_as012_amplify_spec() {
        let stack = stack();
        let spec = &stack.build_projects[0].spec;
        assert_eq!(spec.version, "0.2");
        assert_eq!(
            spec.env.secrets_manager[ACCESS_KEY_ID_ENV],
            "/app/DemoStack/CodeBuild/dev/AMPLIFY_USER_ACCESS_KEY_ID"
        );
        let install = &spec.phases[&BuildPhaseName::Install];
        assert_eq!(install.runtime_versions["python"], "3.8");
        assert_eq!(install.runtime_versions["nodejs"], "12");
        assert_eq!(install.commands, vec!["npm install -g @aws-amplify/cli", "npm install"]);

        let build = &spec.phases[&BuildPhaseName::Build].commands;
        assert_eq!(build.len(), 3);
        assert_eq!(
            build[0],
            r#"npx amplify init --yes --amplify "{\"envName\":\"dev\",\"defaultEditor\":\"code\"}" --providers "{\"awscloudformation\":{\"useProfile\":false,\"accessKeyId\":\"$AMPLIFY_USER_ACCESS_KEY_ID\",\"secretAccessKey\":\"$AMPLIFY_USER_SECRET_ACCESS_KEY\",\"region\":\"us-east-1\"}}""#
        );
        assert!(build[1].starts_with("npx amplify configure project --yes"));
        assert!(build[1].ends_with(
            r#"--frontend "{\"frontend\":\"javascript\",\"framework\":\"react\",\"config\":{\"SourceDir\":\"src\",\"DistributionDir\":\"build\",\"BuildCommand\":\"npm run-script build\",\"StartCommand\":\"npm run-script start\"}}""#
        ));
        assert_eq!(build[2], "npx amplify publish --invalidateCloudFront --yes");
    }

    #[test]
    fn test_as012_amplify_spec_follows_region() {
        let mut config = demo_config();
        config.region = "eu-west-1".to_string();
        let secrets = crate::constructs::secrets::build(&config);
        let spec = amplify_spec(&config.build, &config.region, &secrets).unwrap();
        assert!(spec.commands()[2].contains(r#"\"region\":\"eu-west-1\""#));
    }

    #[test]
    fn test_as012_amplify_spec_missing_secret() {
        let config = demo_config();
        let err = amplify_spec(&config.build, &config.region, &[]).unwrap_err();
        assert!(err.contains(ACCESS_KEY_ID_SECRET));
    }

    #[test]
    fn test_as012_migration_spec() {
        let stack = stack();
        let project = &stack.build_projects[1];
        let spec = &project.spec;
        assert_eq!(
            spec.env.secrets_manager["DATABASE_SECRET_HOST"],
            "DemoStack-ServerlessClusterCredentials:host"
        );
        assert_eq!(spec.env.secrets_manager.len(), 5);
        let phases: Vec<_> = spec.phases.keys().copied().collect();
        assert_eq!(
            phases,
            vec![BuildPhaseName::Install, BuildPhaseName::PreBuild, BuildPhaseName::Build]
        );
        let pre = &spec.phases[&BuildPhaseName::PreBuild].commands;
        assert_eq!(pre[0], "python3 -m venv env");
        assert_eq!(pre[2], "pip install psycopg2-binary==2.9.3");
        assert!(pre.last().unwrap().starts_with("sed -i \"s/sqlalchemy.url = [^\\n]*/"));
        assert!(pre.last().unwrap().ends_with("/\" alembic.ini"));
        assert_eq!(spec.commands().last().copied(), Some("alembic upgrade head"));

        let vpc = project.vpc.as_ref().unwrap();
        assert_eq!(vpc.subnets, stack.network.subnet_ids(SubnetType::Private));
        assert_eq!(vpc.security_groups, vec![BUILD_SECURITY_GROUP]);
        assert_eq!(
            project.secret_access,
            vec![crate::constructs::database::SECRET_ID]
        );
    }

    #[test]
    fn test_as012_check_projects() {
        let mut stack = stack();
        assert!(check_projects(&stack).is_empty());

        stack.build_projects[0].secret_access.clear();
        stack.build_projects[1]
            .spec
            .env
            .secrets_manager
            .insert("GHOST".to_string(), "/no/such/secret".to_string());
        let problems = check_projects(&stack);
        assert!(problems.iter().any(|p| p.contains("without access")));
        assert!(problems.iter().any(|p| p.contains("undeclared secret /no/such/secret")));
    }

    #[test]
    fn test_as012_check_database_secret_keys() {
        let mut stack = stack();
        let secret_name = stack.database.credentials.secret.name.clone();
        stack.build_projects[1].spec.env.secrets_manager.insert(
            "DATABASE_SECRET_SCHEMA".to_string(),
            format!("{}:schema", secret_name),
        );
        let problems = check_projects(&stack);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("key schema"));
    }

    #[test]
    fn test_as012_check_phase_order() {
        let mut stack = stack();
        let spec = &mut stack.build_projects[1].spec;
        spec.phases.move_index(2, 0);
        let problems = check_projects(&stack);
        assert!(problems.iter().any(|p| p.contains("out of order")));
    }

    #[test]
    fn test_as012_render() {
        let stack = stack();
        let mut template = Template::default();
        render(&stack, &mut template).unwrap();
        let amplify = &template.resources["DemoStackCodeBuildDeployAmplify"];
        assert_eq!(amplify.resource_type, "AWS::CodeBuild::Project");
        assert!(amplify.depends_on.is_empty());
        assert!(amplify.property("VpcConfig").is_none());
        assert_eq!(
            amplify.property("Environment").unwrap()["ComputeType"],
            "BUILD_GENERAL1_LARGE"
        );
        let buildspec = amplify.property("Source").unwrap()["BuildSpec"].as_str().unwrap();
        let parsed: BuildSpec = serde_json::from_str(buildspec).unwrap();
        assert_eq!(parsed, stack.build_projects[0].spec);

        let db = &template.resources["DemoStackCodeBuildDeployDatabase"];
        assert_eq!(db.depends_on, vec!["DemoStackCodeBuildDeployDatabaseVpcPolicy"]);
        assert_eq!(
            db.property("VpcConfig").unwrap()["SecurityGroupIds"][0],
            json!({"Fn::GetAtt": [BUILD_SECURITY_GROUP, "GroupId"]})
        );

        let policy = &template.resources["DemoStackCodeBuildDeployAmplifyRoleDefaultPolicy"];
        let statements = &policy.property("PolicyDocument").unwrap()["Statement"];
        let secrets = statements
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["Action"] == "secretsmanager:GetSecretValue")
            .unwrap();
        assert_eq!(secrets["Resource"].as_array().unwrap().len(), 2);
    }
}
