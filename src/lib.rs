//! briefrun: runs an ordered list of research queries per company against a
//! Dify chat app, persists each answer to disk, and aggregates the answers
//! into a proposal through a Dify workflow.

pub mod cleanup;
pub mod company;
pub mod config;
pub mod coordinator;
pub mod dify;
pub mod error;
pub mod liveness;
pub mod markers;
pub mod outputs;
pub mod proposal;
pub mod results;
pub mod runner;
pub mod state_machine;
pub mod steps;
