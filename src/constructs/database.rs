//! AS-008: Aurora Serverless cluster with generated master credentials.

use super::security::DATABASE_SECURITY_GROUP;
use super::{cfn_ref, get_att, join};
use crate::core::types::*;
use serde_json::json;

pub const CLUSTER_ID: &str = "ServerlessCluster";
pub const SECRET_ID: &str = "ServerlessClusterSecret";

const SUBNET_GROUP_ID: &str = "ServerlessClusterSubnets";
const SECRET_ATTACHMENT_ID: &str = "ServerlessClusterSecretAttachment";

/// Characters kept out of generated database passwords.
pub const PASSWORD_EXCLUDE_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

const PASSWORD_LENGTH: u32 = 30;

/// Key the generated password is stored under.
const GENERATE_STRING_KEY: &str = "password";

/// Keys the target attachment adds to the secret once the cluster exists.
pub const ATTACHMENT_KEYS: [&str; 4] = ["engine", "host", "port", "dbClusterIdentifier"];

/// Build the cluster description. Placement is always the private subnets.
pub fn build(
    config: &StackConfig,
    network: &Network,
    groups: &[SecurityGroup],
) -> Result<DatabaseCluster, String> {
    let db = &config.database;
    if !groups.iter().any(|g| g.id == DATABASE_SECURITY_GROUP) {
        return Err(format!("database needs security group {}", DATABASE_SECURITY_GROUP));
    }
    let private = network.subnet_ids(SubnetType::Private);
    if private.is_empty() {
        return Err("database needs at least one private subnet".to_string());
    }

    Ok(DatabaseCluster {
        id: CLUSTER_ID.to_string(),
        cluster_identifier: format!("{}-{}", config.name, CLUSTER_ID).to_lowercase(),
        engine: db.engine.clone(),
        engine_version: db.engine_version.clone(),
        port: db.port,
        default_database_name: db.default_database_name.clone(),
        scaling: ScalingConfig {
            min_capacity: db.min_capacity,
            max_capacity: db.max_capacity,
            auto_pause_minutes: db.auto_pause_minutes,
        },
        backup_retention_days: db.backup_retention_days,
        parameter_group: db.parameter_group.clone(),
        enable_data_api: db.enable_data_api,
        credentials: DatabaseCredentials {
            username: db.master_username.clone(),
            secret: Secret {
                id: SECRET_ID.to_string(),
                name: format!("{}-{}Credentials", config.name, CLUSTER_ID),
                value: SecretValue::Generated {
                    username: db.master_username.clone(),
                    exclude_characters: PASSWORD_EXCLUDE_CHARACTERS.to_string(),
                },
            },
        },
        subnet_group: DbSubnetGroup {
            id: SUBNET_GROUP_ID.to_string(),
            description: format!("Subnets for {} database", CLUSTER_ID),
            subnets: private,
        },
        security_groups: vec![DATABASE_SECURITY_GROUP.to_string()],
    })
}

/// Check cluster invariants against the network it lives in.
pub fn check_cluster(cluster: &DatabaseCluster, network: &Network) -> Vec<String> {
    let mut problems = Vec::new();
    if cluster.scaling.min_capacity > cluster.scaling.max_capacity {
        problems.push(format!(
            "cluster {} min capacity {} exceeds max {}",
            cluster.id, cluster.scaling.min_capacity, cluster.scaling.max_capacity
        ));
    }
    if cluster.subnet_group.subnets.is_empty() {
        problems.push(format!("cluster {} has no subnets", cluster.id));
    }
    for id in &cluster.subnet_group.subnets {
        let private = network
            .subnets_of(SubnetType::Private)
            .any(|s| &s.id == id);
        if !private {
            problems.push(format!("cluster {} placed in non-private subnet {}", cluster.id, id));
        }
    }
    problems
}

/// Initial JSON of the credentials secret, before the password is generated.
fn secret_string_template(cluster: &DatabaseCluster) -> serde_json::Value {
    json!({
        "username": cluster.credentials.username,
        "dbname": cluster.default_database_name,
    })
}

/// Every JSON key the credentials secret holds once the cluster is attached.
pub fn secret_keys(cluster: &DatabaseCluster) -> Vec<String> {
    let mut keys: Vec<String> = secret_string_template(cluster)
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    keys.push(GENERATE_STRING_KEY.to_string());
    keys.extend(ATTACHMENT_KEYS.iter().map(|k| k.to_string()));
    keys
}

/// `{{resolve:secretsmanager:<secret>:SecretString:<key>::}}` dynamic reference.
fn secret_field(secret_id: &str, key: &str) -> serde_json::Value {
    join(vec![
        json!("{{resolve:secretsmanager:"),
        cfn_ref(secret_id),
        json!(format!(":SecretString:{}::}}}}", key)),
    ])
}

/// Render the credentials secret, subnet group, cluster and secret attachment.
pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    let cluster = &stack.database;
    let secret = &cluster.credentials.secret;

    let exclude = match &secret.value {
        SecretValue::Generated {
            exclude_characters, ..
        } => exclude_characters,
        SecretValue::Placeholder { .. } => {
            return Err(format!("database secret {} must be generated", secret.id))
        }
    };
    let secret_template = serde_json::to_string(&secret_string_template(cluster))
        .map_err(|e| format!("JSON serialize error: {}", e))?;

    template.resources.insert(
        secret.id.clone(),
        CfnResource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Description": format!("Generated by ampstack for {}/{}", stack.name, cluster.id),
                "GenerateSecretString": {
                    "ExcludeCharacters": exclude,
                    "GenerateStringKey": GENERATE_STRING_KEY,
                    "PasswordLength": PASSWORD_LENGTH,
                    "SecretStringTemplate": secret_template,
                },
                "Name": secret.name,
            }),
        )
        .retain_policy("Delete"),
    );

    template.resources.insert(
        cluster.subnet_group.id.clone(),
        CfnResource::new(
            "AWS::RDS::DBSubnetGroup",
            json!({
                "DBSubnetGroupDescription": cluster.subnet_group.description,
                "SubnetIds": cluster.subnet_group.subnets.iter().map(|s| cfn_ref(s)).collect::<Vec<_>>(),
            }),
        ),
    );

    let scaling = &cluster.scaling;
    let mut scaling_config = json!({
        "AutoPause": scaling.auto_pause_minutes > 0,
        "MaxCapacity": scaling.max_capacity,
        "MinCapacity": scaling.min_capacity,
    });
    if scaling.auto_pause_minutes > 0 {
        scaling_config["SecondsUntilAutoPause"] = json!(scaling.auto_pause_minutes * 60);
    }

    template.resources.insert(
        cluster.id.clone(),
        CfnResource::new(
            "AWS::RDS::DBCluster",
            json!({
                "BackupRetentionPeriod": cluster.backup_retention_days,
                "CopyTagsToSnapshot": true,
                "DatabaseName": cluster.default_database_name,
                "DBClusterIdentifier": cluster.cluster_identifier,
                "DBClusterParameterGroupName": cluster.parameter_group,
                "DBSubnetGroupName": cfn_ref(&cluster.subnet_group.id),
                "EnableHttpEndpoint": cluster.enable_data_api,
                "Engine": cluster.engine,
                "EngineMode": "serverless",
                "EngineVersion": cluster.engine_version,
                "MasterUsername": secret_field(&secret.id, "username"),
                "MasterUserPassword": secret_field(&secret.id, GENERATE_STRING_KEY),
                "Port": cluster.port,
                "ScalingConfiguration": scaling_config,
                "StorageEncrypted": true,
                "VpcSecurityGroupIds": cluster
                    .security_groups
                    .iter()
                    .map(|g| get_att(g, "GroupId"))
                    .collect::<Vec<_>>(),
            }),
        )
        .retain_policy("Snapshot"),
    );

    template.resources.insert(
        SECRET_ATTACHMENT_ID.to_string(),
        CfnResource::new(
            "AWS::SecretsManager::SecretTargetAttachment",
            json!({
                "SecretId": cfn_ref(&secret.id),
                "TargetId": cfn_ref(&cluster.id),
                "TargetType": "AWS::RDS::DBCluster",
            }),
        ),
    );

    Ok(())
}
