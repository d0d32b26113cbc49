//! GuardianForge: autonomous wallet-threat monitoring agent.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod chain;
pub mod cli;
pub mod config;
pub mod engine;
pub mod llm;
pub mod types;
