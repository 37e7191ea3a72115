//! Construct handlers, one module per stack entity.
//!
//! Each handler provides:
//! 1. `build`: a pure function from config (and earlier constructs) to the
//!    entity's description
//! 2. `render`: the CloudFormation resources for that description
//! 3. where the entity carries invariants, a `check_*` returning violations

pub mod bastion;
pub mod database;
pub mod hosting;
pub mod network;
pub mod outputs;
pub mod pipeline;
pub mod project;
pub mod repository;
pub mod secrets;
pub mod security;

use serde_json::{json, Value};

/// Build a logical id from construct path parts, dropping non-alphanumerics.
pub fn logical_id(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.chars())
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// `{"Ref": id}`
pub fn cfn_ref(id: &str) -> Value {
    json!({ "Ref": id })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub fn get_att(id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attribute] })
}

/// `{"Fn::Join": ["", parts]}`
pub fn join(parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": ["", parts] })
}

/// Regional ARN for the stack's partition/region/account:
/// `arn:<partition>:<service>:<region>:<account>:<suffix...>`.
pub fn regional_arn(service: &str, suffix: Vec<Value>) -> Value {
    let mut parts = vec![
        json!("arn:"),
        cfn_ref("AWS::Partition"),
        json!(format!(":{}:", service)),
        cfn_ref("AWS::Region"),
        json!(":"),
        cfn_ref("AWS::AccountId"),
        json!(":"),
    ];
    parts.extend(suffix);
    join(parts)
}

/// `[{"Key": "Name", "Value": name}]`
pub fn name_tags(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

/// Trust policy letting one AWS service assume a role.
pub fn assume_role_policy(service: &str) -> Value {
    json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service }
        }],
        "Version": "2012-10-17"
    })
}

/// One Allow statement.
pub fn allow(actions: &[&str], resources: Vec<Value>) -> Value {
    let action = match actions {
        [single] => json!(single),
        many => json!(many),
    };
    let resource = match resources.len() {
        1 => resources.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(resources),
    };
    json!({ "Action": action, "Effect": "Allow", "Resource": resource })
}

/// Policy document wrapping statements.
pub fn policy_document(statements: Vec<Value>) -> Value {
    json!({ "Statement": statements, "Version": "2012-10-17" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as005_logical_id() {
        assert_eq!(logical_id(&["VPC", "private-", "Subnet", "1"]), "VPCprivateSubnet1");
        assert_eq!(
            logical_id(&["My-Stack", "CodeBuildDeployAmplify"]),
            "MyStackCodeBuildDeployAmplify"
        );
    }

    #[test]
    fn test_as005_intrinsics() {
        assert_eq!(cfn_ref("VPC"), json!({"Ref": "VPC"}));
        assert_eq!(
            get_att("Repo", "Arn"),
            json!({"Fn::GetAtt": ["Repo", "Arn"]})
        );
        let arn = regional_arn("logs", vec![json!("log-group:x")]);
        let parts = arn["Fn::Join"][1].as_array().unwrap();
        assert_eq!(parts[2], json!(":logs:"));
        assert_eq!(parts.last().unwrap(), &json!("log-group:x"));
    }

    #[test]
    fn test_as005_allow_single_and_many() {
        let one = allow(&["s3:GetObject"], vec![json!("*")]);
        assert_eq!(one["Action"], "s3:GetObject");
        assert_eq!(one["Resource"], "*");
        let many = allow(&["a:B", "a:C"], vec![json!("x"), json!("y")]);
        assert_eq!(many["Action"].as_array().unwrap().len(), 2);
        assert_eq!(many["Resource"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_as005_assume_role_policy() {
        let doc = assume_role_policy("codebuild.amazonaws.com");
        assert_eq!(
            doc["Statement"][0]["Principal"]["Service"],
            "codebuild.amazonaws.com"
        );
    }
}
