//! AS-011: Placeholder secrets for the Amplify deploy user.
//!
//! Values are literal placeholders. They are replaced in the console after
//! deployment and never populated here.

use crate::core::types::*;
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

pub const ACCESS_KEY_ID_SECRET: &str = "AmplifyUserAccessKeyIDSecret";
pub const SECRET_ACCESS_KEY_SECRET: &str = "AmplifyUserSecretAccessKeySecret";

pub const ACCESS_KEY_ID_ENV: &str = "AMPLIFY_USER_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_ENV: &str = "AMPLIFY_USER_SECRET_ACCESS_KEY";

pub const PLACEHOLDER_VALUE: &str = "REPLACE-IN-CONSOLE-WITH-ACTUAL-VALUE";

fn secret_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9/_+=.@-]{1,512}$").expect("static regex"))
}

/// Whether `name` is accepted by the secret store.
pub fn is_valid_secret_name(name: &str) -> bool {
    secret_name_pattern().is_match(name)
}

/// Path prefix of the deploy-user secrets: `/app/<stack>/CodeBuild/<env>`.
/// Only the first `-` of the stack name is dropped.
pub fn secret_prefix(stack_name: &str, env_name: &str) -> String {
    format!(
        "/app/{}/CodeBuild/{}",
        stack_name.replacen('-', "", 1),
        env_name
    )
}

pub fn build(config: &StackConfig) -> Vec<Secret> {
    let prefix = secret_prefix(&config.name, &config.build.env_name);
    [
        (ACCESS_KEY_ID_SECRET, ACCESS_KEY_ID_ENV),
        (SECRET_ACCESS_KEY_SECRET, SECRET_ACCESS_KEY_ENV),
    ]
    .iter()
    .map(|(id, env)| Secret {
        id: id.to_string(),
        name: format!("{}/{}", prefix, env),
        value: SecretValue::Placeholder {
            value: PLACEHOLDER_VALUE.to_string(),
        },
    })
    .collect()
}

/// Check names against the store pattern and ids/names for uniqueness.
pub fn check_secrets<'a>(secrets: impl IntoIterator<Item = &'a Secret>) -> Vec<String> {
    let mut problems = Vec::new();
    let mut ids = std::collections::HashSet::new();
    let mut names = std::collections::HashSet::new();
    for s in secrets {
        if !is_valid_secret_name(&s.name) {
            problems.push(format!("secret {} has invalid name '{}'", s.id, s.name));
        }
        if !ids.insert(s.id.as_str()) {
            problems.push(format!("duplicate secret id {}", s.id));
        }
        if !names.insert(s.name.as_str()) {
            problems.push(format!("duplicate secret name {}", s.name));
        }
    }
    problems
}

/// Render placeholder secrets. Generated secrets belong to their owning construct.
pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    for secret in &stack.secrets {
        let value = match &secret.value {
            SecretValue::Placeholder { value } => value,
            SecretValue::Generated { .. } => {
                return Err(format!("secret {} is not a placeholder", secret.id))
            }
        };
        template.resources.insert(
            secret.id.clone(),
            CfnResource::new(
                "AWS::SecretsManager::Secret",
                json!({ "Name": secret.name, "SecretString": value }),
            )
            .retain_policy("Delete"),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembly::tests::demo_config;

    #[test]
    fn test_as011_prefix_drops_first_dash_only() {
        assert_eq!(secret_prefix("My-Demo-Stack", "dev"), "/app/MyDemo-Stack/CodeBuild/dev");
        assert_eq!(secret_prefix("Plain", "prod"), "/app/Plain/CodeBuild/prod");
    }

    #[test]
    fn test_as011_build_placeholders() {
        let secrets = build(&demo_config());
        assert_eq!(secrets.len(), 2);
        assert_eq!(
            secrets[0].name,
            "/app/DemoStack/CodeBuild/dev/AMPLIFY_USER_ACCESS_KEY_ID"
        );
        assert_eq!(
            secrets[1].name,
            "/app/DemoStack/CodeBuild/dev/AMPLIFY_USER_SECRET_ACCESS_KEY"
        );
        for s in &secrets {
            assert_eq!(
                s.value,
                SecretValue::Placeholder {
                    value: PLACEHOLDER_VALUE.to_string()
                }
            );
        }
        assert!(check_secrets(&secrets).is_empty());
    }

    #[test]
    fn test_as011_secret_name_pattern() {
        assert!(is_valid_secret_name("/app/x/CodeBuild/dev/KEY"));
        assert!(is_valid_secret_name("a+b=c.d@e_f-g"));
        assert!(!is_valid_secret_name(""));
        assert!(!is_valid_secret_name("has space"));
        assert!(!is_valid_secret_name("semi;colon"));
        assert!(!is_valid_secret_name(&"a".repeat(513)));
    }

    #[test]
    fn test_as011_check_duplicates() {
        let mut secrets = build(&demo_config());
        secrets.push(secrets[0].clone());
        let problems = check_secrets(&secrets);
        assert!(problems.iter().any(|p| p.contains("duplicate secret id")));
        assert!(problems.iter().any(|p| p.contains("duplicate secret name")));
    }

    #[test]
    fn test_as011_render_literal_placeholder() {
        let stack = crate::core::assembly::assemble(&demo_config()).unwrap();
        let mut template = Template::default();
        render(&stack, &mut template).unwrap();
        assert_eq!(template.resources.len(), 2);
        let r = &template.resources[ACCESS_KEY_ID_SECRET];
        assert_eq!(r.property("SecretString").unwrap(), PLACEHOLDER_VALUE);
    }
}
