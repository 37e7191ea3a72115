//! Core stack logic: config, network layout, assembly, synthesis, planning, state.

pub mod assembly;
pub mod network;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod synth;
pub mod types;
