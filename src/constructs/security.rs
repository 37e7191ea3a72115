//! AS-007: Security groups for build execution and the database.

use super::{cfn_ref, get_att, logical_id};
use crate::core::types::*;
use serde_json::json;

/// Logical id of the group attached to build projects and the bastion.
pub const BUILD_SECURITY_GROUP: &str = "CodeBuildSecurityGroup";

/// Logical id of the group attached to the database cluster.
pub const DATABASE_SECURITY_GROUP: &str = "DatabaseSecurityGroup";

/// Build both groups. The database group admits the build group on the
/// database port and nothing else.
pub fn build(config: &StackConfig, network: &Network) -> Vec<SecurityGroup> {
    let group = |id: &str, ingress: Vec<IngressRule>| SecurityGroup {
        id: id.to_string(),
        group_name: format!("{}-{}", config.name, id),
        description: format!("{}/{}", config.name, id),
        vpc: network.id.clone(),
        ingress,
    };

    let port = config.database.port;
    vec![
        group(BUILD_SECURITY_GROUP, Vec::new()),
        group(
            DATABASE_SECURITY_GROUP,
            vec![IngressRule {
                source_group: BUILD_SECURITY_GROUP.to_string(),
                port,
                description: format!("from {}:{}", BUILD_SECURITY_GROUP, port),
            }],
        ),
    ]
}

/// Check that rules reference declared groups and valid ports.
pub fn check_rules(groups: &[SecurityGroup]) -> Vec<String> {
    let mut problems = Vec::new();
    for g in groups {
        for rule in &g.ingress {
            if !groups.iter().any(|other| other.id == rule.source_group) {
                problems.push(format!(
                    "security group {} admits unknown group {}",
                    g.id, rule.source_group
                ));
            }
            if rule.source_group == g.id {
                problems.push(format!("security group {} admits itself", g.id));
            }
            if rule.port == 0 {
                problems.push(format!("security group {} has an ingress rule on port 0", g.id));
            }
        }
    }
    problems
}

/// Logical id of the standalone ingress resource for one rule.
pub fn ingress_id(group: &SecurityGroup, rule: &IngressRule) -> String {
    logical_id(&[&group.id, "from", &rule.source_group, &rule.port.to_string()])
}

/// Render security groups and their ingress rules.
pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    for g in &stack.security_groups {
        template.resources.insert(
            g.id.clone(),
            CfnResource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": g.description,
                    "GroupName": g.group_name,
                    "SecurityGroupEgress": [{
                        "CidrIp": "0.0.0.0/0",
                        "Description": "Allow all outbound traffic by default",
                        "IpProtocol": "-1"
                    }],
                    "VpcId": cfn_ref(&g.vpc),
                }),
            ),
        );
    }

    // Ingress rules are separate resources so groups may reference each other
    for g in &stack.security_groups {
        for rule in &g.ingress {
            template.resources.insert(
                ingress_id(g, rule),
                CfnResource::new(
                    "AWS::EC2::SecurityGroupIngress",
                    json!({
                        "IpProtocol": "tcp",
                        "Description": rule.description,
                        "FromPort": rule.port,
                        "GroupId": get_att(&g.id, "GroupId"),
                        "SourceSecurityGroupId": get_att(&rule.source_group, "GroupId"),
                        "ToPort": rule.port,
                    }),
                ),
            );
        }
    }

    Ok(())
}
