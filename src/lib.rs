//! ampstack: declarative stack assembly for an Amplify-hosted app.
//!
//! One stack.yaml describes a VPC, an Aurora Serverless cluster, a bastion,
//! a CodeCommit repository, an Amplify app and the CodePipeline that deploys
//! the app and runs database migrations. ampstack assembles it, checks its
//! invariants, and writes a CloudFormation template with a BLAKE3 lock.

pub mod cli;
pub mod constructs;
pub mod core;
pub mod tripwire;
