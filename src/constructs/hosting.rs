//! AS-010: Amplify hosting application.
//!
//! The app is an empty shell; the deploy-frontend build project publishes
//! into it with the Amplify CLI.

use crate::core::types::*;
use serde_json::json;

pub const APP_ID: &str = "AmplifyReactApp";

pub fn build(config: &StackConfig) -> HostingApp {
    HostingApp {
        id: APP_ID.to_string(),
        name: format!("{}-AwsAmplifyCodepipelineDbMigrations", config.name),
    }
}

pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    let app = &stack.hosting_app;
    template.resources.insert(
        app.id.clone(),
        CfnResource::new("AWS::Amplify::App", json!({ "Name": app.name })),
    );
    Ok(())
}
