//! AS-009: Bastion host, an always-on Linux instance for operator access.

use super::security::BUILD_SECURITY_GROUP;
use super::{assume_role_policy, cfn_ref, get_att, name_tags};
use crate::core::types::*;
use serde_json::json;

pub const BASTION_ID: &str = "BastionHost";
pub const IMAGE_PARAMETER_ID: &str = "BastionHostImageIdParameter";

const ROLE_ID: &str = "BastionHostInstanceRole";
const PROFILE_ID: &str = "BastionHostInstanceProfile";

/// Build the bastion description. The host sits in the first private subnet
/// and shares the build security group, so it can reach the database.
pub fn build(
    config: &StackConfig,
    network: &Network,
    groups: &[SecurityGroup],
) -> Result<BastionHost, String> {
    let subnet = network
        .subnets_of(SubnetType::Private)
        .next()
        .ok_or_else(|| "bastion host needs a private subnet".to_string())?;
    if !groups.iter().any(|g| g.id == BUILD_SECURITY_GROUP) {
        return Err(format!("bastion host needs security group {}", BUILD_SECURITY_GROUP));
    }

    Ok(BastionHost {
        id: BASTION_ID.to_string(),
        instance_name: format!("{}-{}", config.name, BASTION_ID),
        instance_type: config.bastion.instance_type.clone(),
        image_parameter: config.bastion.image_parameter.clone(),
        subnet: subnet.id.clone(),
        availability_zone: subnet.availability_zone.clone(),
        security_group: BUILD_SECURITY_GROUP.to_string(),
    })
}

/// Render the AMI parameter, instance role, instance profile and instance.
pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    let host = &stack.bastion;

    template.parameters.insert(
        IMAGE_PARAMETER_ID.to_string(),
        CfnParameter {
            parameter_type: "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>".to_string(),
            default: Some(host.image_parameter.clone()),
            description: None,
        },
    );

    template.resources.insert(
        ROLE_ID.to_string(),
        CfnResource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role_policy("ec2.amazonaws.com"),
                "ManagedPolicyArns": [{
                    "Fn::Join": ["", [
                        "arn:",
                        cfn_ref("AWS::Partition"),
                        ":iam::aws:policy/AmazonSSMManagedInstanceCore",
                    ]]
                }],
                "Tags": name_tags(&host.instance_name),
            }),
        ),
    );

    template.resources.insert(
        PROFILE_ID.to_string(),
        CfnResource::new(
            "AWS::IAM::InstanceProfile",
            json!({ "Roles": [cfn_ref(ROLE_ID)] }),
        ),
    );

    template.resources.insert(
        host.id.clone(),
        CfnResource::new(
            "AWS::EC2::Instance",
            json!({
                "AvailabilityZone": host.availability_zone,
                "IamInstanceProfile": cfn_ref(PROFILE_ID),
                "ImageId": cfn_ref(IMAGE_PARAMETER_ID),
                "InstanceType": host.instance_type,
                "SecurityGroupIds": [get_att(&host.security_group, "GroupId")],
                "SubnetId": cfn_ref(&host.subnet),
                "Tags": name_tags(&host.instance_name),
                "UserData": { "Fn::Base64": "#!/bin/bash" },
            }),
        )
        .depends_on([ROLE_ID]),
    );

    Ok(())
}
