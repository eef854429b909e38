//! Shared utilities.
//!
//! Test doubles for the platform capabilities live here.

#[cfg(test)]
pub mod testutil;
