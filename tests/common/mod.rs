#![allow(dead_code)]

pub mod builders;
pub mod harness;

// Re-export commonly used test utilities
pub use harness::{test_config, HashEmbedding, ScriptedLlm, TestHarness, TestWorld};
