//! AS-001: Stack configuration, assembled-stack model and template types.
//!
//! `StackConfig` is the YAML schema of stack.yaml. `Stack` is the assembled,
//! validated description of every construct. `Template` is the CloudFormation
//! document rendered from a `Stack`. All types derive Serialize/Deserialize.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Top-level stack.yaml
// ============================================================================

/// Root configuration: the desired shape of the stack.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name, used as the prefix of every physical name
    pub name: String,

    /// Optional template description
    #[serde(default)]
    pub description: Option<String>,

    /// Target region (drives AZ names and the Amplify provider region)
    #[serde(default = "default_region")]
    pub region: String,

    /// Externally supplied parameters (templatable as `{{params.key}}`)
    #[serde(default)]
    #[schemars(with = "HashMap<String, serde_json::Value>")]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    /// VPC layout
    #[serde(default)]
    pub network: NetworkConfig,

    /// Aurora cluster settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Bastion host settings
    #[serde(default)]
    pub bastion: BastionConfig,

    /// CodeBuild settings shared by both build projects
    #[serde(default)]
    pub build: BuildConfig,

    /// CodePipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

// ============================================================================
// Network config
// ============================================================================

/// VPC address block and subnet layout.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NetworkConfig {
    /// IPv4 address block (CIDR notation)
    #[serde(default = "default_vpc_cidr")]
    pub cidr: String,

    /// Number of availability zones to spread subnets across
    #[serde(default = "default_max_azs")]
    pub max_azs: u8,

    /// Number of NAT gateways (placed in the first public subnets)
    #[serde(default = "default_nat_gateways")]
    pub nat_gateways: u8,

    /// Explicit AZ names; empty derives `<region>a`, `<region>b`, ...
    #[serde(default)]
    pub availability_zones: Vec<String>,

    /// Subnet groups; each group gets one subnet per AZ
    #[serde(default = "default_subnet_groups")]
    pub subnets: Vec<SubnetGroupConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: default_vpc_cidr(),
            max_azs: default_max_azs(),
            nat_gateways: default_nat_gateways(),
            availability_zones: Vec::new(),
            subnets: default_subnet_groups(),
        }
    }
}

fn default_vpc_cidr() -> String {
    "{{params.vpc_cidr}}".to_string()
}

fn default_max_azs() -> u8 {
    2
}

fn default_nat_gateways() -> u8 {
    1
}

fn default_subnet_groups() -> Vec<SubnetGroupConfig> {
    vec![
        SubnetGroupConfig {
            name: "private-".to_string(),
            subnet_type: SubnetType::Private,
            cidr_mask: 26,
        },
        SubnetGroupConfig {
            name: "public-".to_string(),
            subnet_type: SubnetType::Public,
            cidr_mask: 26,
        },
    ]
}

/// One subnet group (replicated across every AZ).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubnetGroupConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub subnet_type: SubnetType,

    /// Prefix length of each subnet in the group
    pub cidr_mask: u8,
}

/// Subnet routing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubnetType {
    /// Routed through the internet gateway
    Public,
    /// Egress through a NAT gateway
    Private,
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "Public"),
            Self::Private => write!(f, "Private"),
        }
    }
}

// ============================================================================
// Database config
// ============================================================================

/// Aurora Serverless (v1) cluster settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseConfig {
    #[serde(default = "default_engine")]
    pub engine: String,

    #[serde(default = "default_engine_version")]
    pub engine_version: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_database_name")]
    pub default_database_name: String,

    #[serde(default = "default_master_username")]
    pub master_username: String,

    /// Minimum Aurora capacity units
    #[serde(default = "default_capacity")]
    pub min_capacity: u16,

    /// Maximum Aurora capacity units
    #[serde(default = "default_capacity")]
    pub max_capacity: u16,

    /// Idle minutes before the cluster pauses (0 disables auto-pause)
    #[serde(default = "default_auto_pause_minutes")]
    pub auto_pause_minutes: u32,

    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u32,

    #[serde(default = "default_parameter_group")]
    pub parameter_group: String,

    #[serde(default)]
    pub enable_data_api: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            engine_version: default_engine_version(),
            port: default_db_port(),
            default_database_name: default_database_name(),
            master_username: default_master_username(),
            min_capacity: default_capacity(),
            max_capacity: default_capacity(),
            auto_pause_minutes: default_auto_pause_minutes(),
            backup_retention_days: default_backup_retention_days(),
            parameter_group: default_parameter_group(),
            enable_data_api: false,
        }
    }
}

fn default_engine() -> String {
    "aurora-postgresql".to_string()
}

fn default_engine_version() -> String {
    "11.13".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_database_name() -> String {
    "postgres".to_string()
}

fn default_master_username() -> String {
    "migrationstest".to_string()
}

fn default_capacity() -> u16 {
    2
}

fn default_auto_pause_minutes() -> u32 {
    10
}

fn default_backup_retention_days() -> u32 {
    1
}

fn default_parameter_group() -> String {
    "default.aurora-postgresql11".to_string()
}

// ============================================================================
// Bastion / build / pipeline config
// ============================================================================

/// Bastion host settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BastionConfig {
    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    /// SSM parameter path resolving to the AMI id
    #[serde(default = "default_image_parameter")]
    pub image_parameter: String,
}

impl Default for BastionConfig {
    fn default() -> Self {
        Self {
            instance_type: default_instance_type(),
            image_parameter: default_image_parameter(),
        }
    }
}

fn default_instance_type() -> String {
    "t3.nano".to_string()
}

fn default_image_parameter() -> String {
    "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2".to_string()
}

/// CodeBuild settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildConfig {
    #[serde(default = "default_build_image")]
    pub image: String,

    #[serde(default)]
    pub compute_type: ComputeType,

    /// Amplify environment name (also the secret path segment)
    #[serde(default = "default_env_name")]
    pub env_name: String,

    #[serde(default = "default_amplify_cli_package")]
    pub amplify_cli_package: String,

    #[serde(default = "default_python_version")]
    pub python_version: String,

    #[serde(default = "default_nodejs_version")]
    pub nodejs_version: String,

    /// Pinned pip requirements installed before running migrations
    #[serde(default = "default_migration_packages")]
    pub migration_packages: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image: default_build_image(),
            compute_type: ComputeType::default(),
            env_name: default_env_name(),
            amplify_cli_package: default_amplify_cli_package(),
            python_version: default_python_version(),
            nodejs_version: default_nodejs_version(),
            migration_packages: default_migration_packages(),
        }
    }
}

fn default_build_image() -> String {
    "aws/codebuild/amazonlinux2-x86_64-standard:3.0".to_string()
}

fn default_env_name() -> String {
    "dev".to_string()
}

fn default_amplify_cli_package() -> String {
    "@aws-amplify/cli".to_string()
}

fn default_python_version() -> String {
    "3.8".to_string()
}

fn default_nodejs_version() -> String {
    "12".to_string()
}

fn default_migration_packages() -> Vec<String> {
    [
        "psycopg2-binary==2.9.3",
        "postgres==4.0",
        "SQLAlchemy==1.4.41",
        "alembic==1.11.1",
        "boto3",
        "pytest",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// CodeBuild compute size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComputeType {
    Small,
    Medium,
    #[default]
    Large,
    #[serde(rename = "2xlarge")]
    X2Large,
}

impl ComputeType {
    /// CodeBuild API identifier.
    pub fn as_codebuild(&self) -> &'static str {
        match self {
            Self::Small => "BUILD_GENERAL1_SMALL",
            Self::Medium => "BUILD_GENERAL1_MEDIUM",
            Self::Large => "BUILD_GENERAL1_LARGE",
            Self::X2Large => "BUILD_GENERAL1_2XLARGE",
        }
    }
}

/// CodePipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    /// Branch watched by the source action
    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default)]
    pub trigger: SourceTrigger,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            trigger: SourceTrigger::default(),
        }
    }
}

fn default_branch() -> String {
    "master".to_string()
}

/// How the source action learns about repository changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceTrigger {
    /// EventBridge rule on repository state changes
    #[default]
    Events,
    /// CodePipeline polls the repository
    Poll,
    /// Manual release only
    None,
}

// ============================================================================
// Assembled stack
// ============================================================================

/// The assembled stack. Every construct is built once, in dependency order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub description: Option<String>,
    pub region: String,
    pub network: Network,
    pub security_groups: Vec<SecurityGroup>,
    pub database: DatabaseCluster,
    pub bastion: BastionHost,
    pub repository: Repository,
    pub hosting_app: HostingApp,
    pub secrets: Vec<Secret>,
    pub build_projects: Vec<BuildProject>,
    pub pipeline: Pipeline,
    pub outputs: Vec<StackOutput>,
}

impl Stack {
    /// Look up a security group by logical id.
    pub fn security_group(&self, id: &str) -> Option<&SecurityGroup> {
        self.security_groups.iter().find(|g| g.id == id)
    }

    /// Look up a build project by logical id.
    pub fn build_project(&self, id: &str) -> Option<&BuildProject> {
        self.build_projects.iter().find(|p| p.id == id)
    }

    /// Every secret the stack declares, including the generated database credentials.
    pub fn all_secrets(&self) -> impl Iterator<Item = &Secret> {
        self.secrets
            .iter()
            .chain(std::iter::once(&self.database.credentials.secret))
    }
}

/// VPC with its subnets and NAT egress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub availability_zones: Vec<String>,
    pub subnets: Vec<Subnet>,
    pub nat_gateways: Vec<NatGateway>,
}

impl Network {
    /// Subnets of one routing type, in allocation order.
    pub fn subnets_of(&self, subnet_type: SubnetType) -> impl Iterator<Item = &Subnet> {
        self.subnets
            .iter()
            .filter(move |s| s.subnet_type == subnet_type)
    }

    /// Logical ids of the subnets of one routing type.
    pub fn subnet_ids(&self, subnet_type: SubnetType) -> Vec<String> {
        self.subnets_of(subnet_type).map(|s| s.id.clone()).collect()
    }
}

/// One allocated subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub group: String,
    pub subnet_type: SubnetType,
    pub cidr: String,
    pub availability_zone: String,
}

/// NAT gateway placed in a public subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatGateway {
    pub id: String,
    pub subnet: String,
    pub availability_zone: String,
}

/// Named access-control group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub group_name: String,
    pub description: String,
    pub vpc: String,
    pub ingress: Vec<IngressRule>,
}

/// Allow-rule from another security group on one TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub source_group: String,
    pub port: u16,
    pub description: String,
}

/// Aurora Serverless cluster description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCluster {
    pub id: String,
    pub cluster_identifier: String,
    pub engine: String,
    pub engine_version: String,
    pub port: u16,
    pub default_database_name: String,
    pub scaling: ScalingConfig,
    pub backup_retention_days: u32,
    pub parameter_group: String,
    pub enable_data_api: bool,
    pub credentials: DatabaseCredentials,
    pub subnet_group: DbSubnetGroup,
    pub security_groups: Vec<String>,
}

/// Serverless scaling bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub min_capacity: u16,
    pub max_capacity: u16,
    pub auto_pause_minutes: u32,
}

/// Master credentials, generated into a secret and never set inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub secret: Secret,
}

/// Subnet group binding the cluster to private subnets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSubnetGroup {
    pub id: String,
    pub description: String,
    pub subnets: Vec<String>,
}

/// Always-on operator access instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BastionHost {
    pub id: String,
    pub instance_name: String,
    pub instance_type: String,
    pub image_parameter: String,
    pub subnet: String,
    pub availability_zone: String,
    pub security_group: String,
}

/// CodeCommit repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Amplify hosting application placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingApp {
    pub id: String,
    pub name: String,
}

/// Secrets Manager entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub name: String,
    pub value: SecretValue,
}

/// How a secret's value is provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecretValue {
    /// Literal non-functional value, replaced out-of-band before use
    Placeholder { value: String },
    /// JSON credentials with a generated password
    Generated {
        username: String,
        exclude_characters: String,
    },
}

impl Secret {
    pub fn is_placeholder(&self) -> bool {
        matches!(self.value, SecretValue::Placeholder { .. })
    }
}

/// CodeBuild project description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildProject {
    pub id: String,
    /// Short label, also used as the pipeline action name
    pub label: String,
    pub image: String,
    pub compute_type: ComputeType,
    pub spec: BuildSpec,
    /// Logical ids of secrets the project role may read
    pub secret_access: Vec<String>,
    pub vpc: Option<BuildVpcPlacement>,
}

/// VPC placement of a build project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildVpcPlacement {
    pub vpc: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
}

/// CodeBuild buildspec (version 0.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub version: String,
    #[serde(default, skip_serializing_if = "BuildEnv::is_empty")]
    pub env: BuildEnv,
    pub phases: IndexMap<BuildPhaseName, BuildPhase>,
}

impl BuildSpec {
    /// All commands across phases, in execution order.
    pub fn commands(&self) -> Vec<&str> {
        self.phases
            .values()
            .flat_map(|p| p.commands.iter().map(String::as_str))
            .collect()
    }
}

/// Buildspec environment block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildEnv {
    /// Env var name → `secret-name` or `secret-name:json-key`
    #[serde(rename = "secrets-manager", default)]
    pub secrets_manager: IndexMap<String, String>,
}

impl BuildEnv {
    pub fn is_empty(&self) -> bool {
        self.secrets_manager.is_empty()
    }
}

/// Buildspec phase names, in CodeBuild execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhaseName {
    Install,
    PreBuild,
    Build,
    PostBuild,
}

/// One buildspec phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildPhase {
    #[serde(
        rename = "runtime-versions",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub runtime_versions: IndexMap<String, String>,
    pub commands: Vec<String>,
}

/// Two-stage delivery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub artifact_bucket: String,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Index of a stage in execution order.
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }
}

/// Ordered pipeline phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    /// True when every action shares one run order (they start together).
    pub fn is_concurrent(&self) -> bool {
        match self.actions.first() {
            Some(first) => self.actions.iter().all(|a| a.run_order == first.run_order),
            None => false,
        }
    }
}

/// One pipeline action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub run_order: u32,
}

/// What an action runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ActionKind {
    CodeCommitSource {
        repository: String,
        branch: String,
        trigger: SourceTrigger,
    },
    CodeBuild {
        project: String,
    },
}

impl ActionKind {
    pub fn is_source(&self) -> bool {
        matches!(self, Self::CodeCommitSource { .. })
    }
}

/// Exported stack output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackOutput {
    pub id: String,
    pub description: String,
    pub export_name: String,
    pub resource: String,
    pub attribute: String,
}

// ============================================================================
// Template
// ============================================================================

/// CloudFormation template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Parameters", default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, CfnParameter>,

    #[serde(rename = "Resources")]
    pub resources: IndexMap<String, CfnResource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, CfnOutput>,
}

/// Template parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnParameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(rename = "Default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Template resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties", default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,

    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,

    #[serde(
        rename = "UpdateReplacePolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update_replace_policy: Option<String>,
}

impl CfnResource {
    /// Build a resource from a JSON object of properties. Non-object values
    /// produce a resource with no properties.
    pub fn new(resource_type: &str, properties: serde_json::Value) -> Self {
        let properties = match properties {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Add explicit DependsOn edges.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Set both DeletionPolicy and UpdateReplacePolicy.
    pub fn retain_policy(mut self, policy: &str) -> Self {
        self.deletion_policy = Some(policy.to_string());
        self.update_replace_policy = Some(policy.to_string());
        self
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

/// Template output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnOutput {
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Value")]
    pub value: serde_json::Value,

    #[serde(rename = "Export", default, skip_serializing_if = "Option::is_none")]
    pub export: Option<CfnExport>,
}

/// Output export block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnExport {
    #[serde(rename = "Name")]
    pub name: String,
}

/// Template serialization format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

impl fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Lock file written next to a synthesized template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLock {
    /// Schema version
    pub schema: String,

    /// Stack name
    pub stack: String,

    /// When the template was synthesized
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 version
    pub blake3_version: String,

    /// Format of the written template
    pub format: TemplateFormat,

    /// BLAKE3 hash of the written template file
    pub template_hash: String,

    /// Per-resource state
    pub resources: IndexMap<String, ResourceLock>,

    /// Export names declared by the template
    #[serde(default)]
    pub exports: Vec<String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    /// CloudFormation resource type
    #[serde(rename = "type")]
    pub resource_type: String,

    /// BLAKE3 hash of the rendered resource
    pub hash: String,
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Logical id
    pub logical_id: String,

    /// CloudFormation resource type
    pub resource_type: String,

    /// Action to take
    pub action: PlanAction,

    /// Human-readable description
    pub description: String,
}

/// Full change plan against the last synthesized template.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Stack name
    pub name: String,

    /// Planned changes in dependency order (destroys last)
    pub changes: Vec<PlannedChange>,

    /// Summary counts
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

impl ExecutionPlan {
    pub fn has_changes(&self) -> bool {
        self.to_create + self.to_update + self.to_destroy > 0
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    SynthStarted {
        stack: String,
        run_id: String,
        ampstack_version: String,
    },
    SynthCompleted {
        stack: String,
        run_id: String,
        resources: u32,
        outputs: u32,
        template_hash: String,
        total_seconds: f64,
    },
    ValidationFailed {
        stack: String,
        run_id: String,
        errors: Vec<String>,
    },
    DriftDetected {
        stack: String,
        resource: String,
        expected_hash: String,
        actual_hash: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Synth result
// ============================================================================

/// Result of synthesizing one stack to disk.
#[derive(Debug, Clone)]
pub struct SynthResult {
    pub stack: String,
    pub template_path: std::path::PathBuf,
    pub template_hash: String,
    pub resources: u32,
    pub outputs: u32,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
