//! Test Helper Utilities
//!
//! Shared utilities for testing hwreg-upload

#![allow(dead_code)]

pub mod fake_registry;
pub mod fakes;

pub use fake_registry::FakeRegistry;
pub use fakes::{
    build_engine, build_supervisor, record, FixedIdentitySource, HangingSleeper, RecordingSleeper,
    TestSupervisor,
};
