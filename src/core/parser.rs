//! AS-002: YAML parsing and validation.
//!
//! Parses stack.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Stack name must be a valid CloudFormation stack name whose derived
//!   cluster, repository and pipeline names stay within service limits
//! - Address block, subnet masks and AZ counts must describe a layout that fits
//! - Database capacity bounds must be ordered and supported
//!
//! Validation runs on a config whose `{{...}}` templates are already resolved.

use super::network;
use super::types::*;
use crate::constructs::{database, pipeline, repository};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Aurora Serverless v1 capacity units accepted by the service.
pub const AURORA_CAPACITY_UNITS: [u16; 10] = [1, 2, 4, 8, 16, 32, 64, 128, 256, 384];

/// Longest DB cluster identifier RDS accepts.
const MAX_CLUSTER_IDENTIFIER: usize = 63;

/// Longest CodeCommit repository or CodePipeline name.
const MAX_PIPELINE_NAME: usize = 100;

/// Most AZs any region offers.
pub const MAX_AVAILABILITY_ZONES: u8 = 6;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stack.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stack.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

fn stack_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("static regex"))
}

/// Validate a parsed, template-resolved config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    if config.name.is_empty() {
        errors.push(ValidationError::new("name must not be empty"));
    } else if !stack_name_pattern().is_match(&config.name) {
        errors.push(ValidationError::new(format!(
            "name '{}' must start with a letter and contain only letters, digits and '-' (max 128)",
            config.name
        )));
    } else {
        validate_derived_names(&config.name, &mut errors);
    }

    if config.region.is_empty() {
        errors.push(ValidationError::new("region must not be empty"));
    }

    validate_network(&config.network, &config.region, &mut errors);
    validate_database(&config.database, &mut errors);

    if config.pipeline.branch.is_empty() {
        errors.push(ValidationError::new("pipeline.branch must not be empty"));
    }
    if config.build.env_name.is_empty() {
        errors.push(ValidationError::new("build.env_name must not be empty"));
    }

    errors
}

/// Physical names built from the stack name must satisfy the owning service.
fn validate_derived_names(name: &str, errors: &mut Vec<ValidationError>) {
    if name.ends_with('-') || name.contains("--") {
        errors.push(ValidationError::new(format!(
            "name '{}' must not end with '-' or contain '--' (DB cluster identifier)",
            name
        )));
    }
    let cluster = format!("{}-{}", name, database::CLUSTER_ID).to_lowercase();
    if cluster.len() > MAX_CLUSTER_IDENTIFIER {
        errors.push(ValidationError::new(format!(
            "name '{}' yields DB cluster identifier '{}' longer than {} characters",
            name, cluster, MAX_CLUSTER_IDENTIFIER
        )));
    }
    for (kind, derived) in [
        ("repository", format!("{}-{}", name, repository::REPOSITORY_ID)),
        ("pipeline", format!("{}-{}", name, pipeline::PIPELINE_ID)),
    ] {
        if derived.len() > MAX_PIPELINE_NAME {
            errors.push(ValidationError::new(format!(
                "name '{}' yields {} name longer than {} characters",
                name, kind, MAX_PIPELINE_NAME
            )));
        }
    }
}

fn validate_network(net: &NetworkConfig, region: &str, errors: &mut Vec<ValidationError>) {
    let block = match network::parse_block(&net.cidr) {
        Ok(b) => Some(b),
        Err(e) => {
            errors.push(ValidationError::new(format!("network.cidr: {}", e)));
            None
        }
    };

    if net.max_azs == 0 || net.max_azs > MAX_AVAILABILITY_ZONES {
        errors.push(ValidationError::new(format!(
            "network.max_azs must be between 1 and {}, got {}",
            MAX_AVAILABILITY_ZONES, net.max_azs
        )));
    }
    if !net.availability_zones.is_empty() && net.availability_zones.len() < net.max_azs as usize {
        errors.push(ValidationError::new(format!(
            "network.availability_zones lists {} zone(s) but max_azs is {}",
            net.availability_zones.len(),
            net.max_azs
        )));
    }
    if net.nat_gateways > net.max_azs {
        errors.push(ValidationError::new(format!(
            "network.nat_gateways ({}) exceeds max_azs ({})",
            net.nat_gateways, net.max_azs
        )));
    }

    if net.subnets.is_empty() {
        errors.push(ValidationError::new("network.subnets must not be empty"));
        return;
    }

    let mut seen = std::collections::HashSet::new();
    for group in &net.subnets {
        if group.name.is_empty() {
            errors.push(ValidationError::new("subnet group name must not be empty"));
        } else if !seen.insert(group.name.as_str()) {
            errors.push(ValidationError::new(format!(
                "duplicate subnet group '{}'",
                group.name
            )));
        }
        if !(network::MIN_SUBNET_PREFIX..=network::MAX_SUBNET_PREFIX).contains(&group.cidr_mask) {
            errors.push(ValidationError::new(format!(
                "subnet group '{}' cidr_mask must be between {} and {}, got {}",
                group.name,
                network::MIN_SUBNET_PREFIX,
                network::MAX_SUBNET_PREFIX,
                group.cidr_mask
            )));
        } else if let Some(block) = block {
            if group.cidr_mask < block.prefix() {
                errors.push(ValidationError::new(format!(
                    "subnet group '{}' /{} is larger than the address block {}",
                    group.name, group.cidr_mask, block
                )));
            }
        }
    }

    for required in [SubnetType::Public, SubnetType::Private] {
        if !net.subnets.iter().any(|g| g.subnet_type == required) {
            errors.push(ValidationError::new(format!(
                "network needs at least one {} subnet group",
                required.to_string().to_lowercase()
            )));
        }
    }
    if net.nat_gateways == 0 && net.subnets.iter().any(|g| g.subnet_type == SubnetType::Private) {
        errors.push(ValidationError::new(
            "private subnets need at least one NAT gateway for egress",
        ));
    }

    // Only try a full allocation once the inputs are individually sane
    if let Some(block) = block {
        if errors.is_empty() {
            let zones = network::availability_zones(net, region);
            if let Err(e) = network::allocate_subnets(block, &net.subnets, &zones) {
                errors.push(ValidationError::new(format!("network: {}", e)));
            }
        }
    }
}

fn validate_database(db: &DatabaseConfig, errors: &mut Vec<ValidationError>) {
    if db.port == 0 {
        errors.push(ValidationError::new("database.port must be between 1 and 65535"));
    }
    if db.master_username.is_empty() {
        errors.push(ValidationError::new("database.master_username must not be empty"));
    }
    for (field, value) in [("min_capacity", db.min_capacity), ("max_capacity", db.max_capacity)] {
        if !AURORA_CAPACITY_UNITS.contains(&value) {
            errors.push(ValidationError::new(format!(
                "database.{} must be one of {:?}, got {}",
                field, AURORA_CAPACITY_UNITS, value
            )));
        }
    }
    if db.min_capacity > db.max_capacity {
        errors.push(ValidationError::new(format!(
            "database.min_capacity ({}) exceeds max_capacity ({})",
            db.min_capacity, db.max_capacity
        )));
    }
    if db.auto_pause_minutes != 0 && !(5..=1440).contains(&db.auto_pause_minutes) {
        errors.push(ValidationError::new(format!(
            "database.auto_pause_minutes must be 0 or between 5 and 1440, got {}",
            db.auto_pause_minutes
        )));
    }
    if !(1..=35).contains(&db.backup_retention_days) {
        errors.push(ValidationError::new(format!(
            "database.backup_retention_days must be between 1 and 35, got {}",
            db.backup_retention_days
        )));
    }
}
