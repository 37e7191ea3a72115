//! AS-004: Plan generation by diffing a freshly synthesized template against the lock.

use super::types::*;
use crate::tripwire::hasher;

/// Generate a change plan by comparing the desired template to the last lock.
/// Changes follow `execution_order`; destroys of resources no longer in the
/// template come last.
pub fn plan(
    name: &str,
    template: &Template,
    execution_order: &[String],
    lock: Option<&StackLock>,
) -> ExecutionPlan {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for logical_id in execution_order {
        let resource = match template.resources.get(logical_id) {
            Some(r) => r,
            None => continue,
        };
        let previous = lock.and_then(|l| l.resources.get(logical_id));
        let action = determine_action(resource, previous);
        let description = describe_action(logical_id, &resource.resource_type, previous, &action);

        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }

        changes.push(PlannedChange {
            logical_id: logical_id.clone(),
            resource_type: resource.resource_type.clone(),
            action,
            description,
        });
    }

    if let Some(lock) = lock {
        for (logical_id, rl) in &lock.resources {
            if template.resources.contains_key(logical_id) {
                continue;
            }
            to_destroy += 1;
            changes.push(PlannedChange {
                logical_id: logical_id.clone(),
                resource_type: rl.resource_type.clone(),
                action: PlanAction::Destroy,
                description: describe_action(
                    logical_id,
                    &rl.resource_type,
                    Some(rl),
                    &PlanAction::Destroy,
                ),
            });
        }
    }

    ExecutionPlan {
        name: name.to_string(),
        changes,
        to_create,
        to_update,
        to_destroy,
        unchanged,
    }
}

fn determine_action(resource: &CfnResource, previous: Option<&ResourceLock>) -> PlanAction {
    match previous {
        None => PlanAction::Create,
        Some(rl) if rl.hash == hash_resource(resource) => PlanAction::NoOp,
        Some(_) => PlanAction::Update,
    }
}

/// Hash a rendered resource (type, properties, dependencies and policies).
pub fn hash_resource(resource: &CfnResource) -> String {
    let body = serde_json::to_string(resource).unwrap_or_default();
    hasher::composite_hash(&[&resource.resource_type, &body])
}

fn describe_action(
    logical_id: &str,
    resource_type: &str,
    previous: Option<&ResourceLock>,
    action: &PlanAction,
) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", logical_id, resource_type),
        PlanAction::Update => match previous {
            Some(rl) if rl.resource_type != resource_type => format!(
                "{}: replace ({} → {})",
                logical_id, rl.resource_type, resource_type
            ),
            _ => format!("{}: update (properties changed)", logical_id),
        },
        PlanAction::Destroy => format!("{}: destroy {}", logical_id, resource_type),
        PlanAction::NoOp => format!("{}: no changes", logical_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::new_lock;
    use serde_json::json;

    fn make_template() -> Template {
        let mut t = Template::default();
        t.resources.insert(
            "Bucket".to_string(),
            CfnResource::new("AWS::S3::Bucket", json!({})),
        );
        t.resources.insert(
            "Role".to_string(),
            CfnResource::new("AWS::IAM::Role", json!({"Path": "/"})),
        );
        t.resources.insert(
            "Policy".to_string(),
            CfnResource::new(
                "AWS::IAM::Policy",
                json!({"Roles": [{"Ref": "Role"}], "Bucket": {"Ref": "Bucket"}}),
            ),
        );
        t
    }

    fn order() -> Vec<String> {
        vec!["Bucket".to_string(), "Role".to_string(), "Policy".to_string()]
    }

    fn lock_for(template: &Template) -> StackLock {
        let mut lock = new_lock("Demo", TemplateFormat::Json);
        for (id, r) in &template.resources {
            lock.resources.insert(
                id.clone(),
                ResourceLock {
                    resource_type: r.resource_type.clone(),
                    hash: hash_resource(r),
                },
            );
        }
        lock
    }

    #[test]
    fn test_as004_plan_all_create() {
        let t = make_template();
        let plan = plan("Demo", &t, &order(), None);
        assert_eq!(plan.to_create, 3);
        assert_eq!(plan.unchanged, 0);
        assert!(plan.has_changes());
        assert!(plan.changes.iter().all(|c| c.action == PlanAction::Create));
        assert_eq!(plan.changes[0].description, "Bucket: create AWS::S3::Bucket");
    }

    #[test]
    fn test_as004_plan_all_unchanged() {
        let t = make_template();
        let lock = lock_for(&t);
        let plan = plan("Demo", &t, &order(), Some(&lock));
        assert_eq!(plan.unchanged, 3);
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_as004_plan_update_on_hash_mismatch() {
        let t = make_template();
        let mut lock = lock_for(&t);
        lock.resources["Role"].hash = "blake3:stale".to_string();
        let plan = plan("Demo", &t, &order(), Some(&lock));
        assert_eq!(plan.to_update, 1);
        assert_eq!(plan.unchanged, 2);
        assert_eq!(plan.changes[1].description, "Role: update (properties changed)");
    }

    #[test]
    fn test_as004_plan_replace_on_type_change() {
        let t = make_template();
        let mut lock = lock_for(&t);
        lock.resources["Bucket"].resource_type = "AWS::SQS::Queue".to_string();
        lock.resources["Bucket"].hash = "blake3:other".to_string();
        let plan = plan("Demo", &t, &order(), Some(&lock));
        assert!(plan.changes[0].description.contains("replace (AWS::SQS::Queue → AWS::S3::Bucket)"));
    }

    #[test]
    fn test_as004_plan_destroy_removed_resources_last() {
        let t = make_template();
        let mut lock = lock_for(&t);
        lock.resources.insert(
            "OldTopic".to_string(),
            ResourceLock {
                resource_type: "AWS::SNS::Topic".to_string(),
                hash: "blake3:xxx".to_string(),
            },
        );
        let plan = plan("Demo", &t, &order(), Some(&lock));
        assert_eq!(plan.to_destroy, 1);
        let last = plan.changes.last().unwrap();
        assert_eq!(last.logical_id, "OldTopic");
        assert_eq!(last.action, PlanAction::Destroy);
    }

    #[test]
    fn test_as004_plan_follows_execution_order() {
        let t = make_template();
        let reversed: Vec<String> = order().into_iter().rev().collect();
        let plan = plan("Demo", &t, &reversed, None);
        let ids: Vec<_> = plan.changes.iter().map(|c| c.logical_id.as_str()).collect();
        assert_eq!(ids, vec!["Policy", "Role", "Bucket"]);
    }

    #[test]
    fn test_as004_hash_resource() {
        let a = CfnResource::new("AWS::S3::Bucket", json!({"BucketName": "a"}));
        let b = CfnResource::new("AWS::S3::Bucket", json!({"BucketName": "b"}));
        assert_eq!(hash_resource(&a), hash_resource(&a.clone()));
        assert_ne!(hash_resource(&a), hash_resource(&b));
        assert_ne!(hash_resource(&a), hash_resource(&a.clone().retain_policy("Retain")));
        assert!(hash_resource(&a).starts_with("blake3:"));
    }
}
