//! Library half of the `genflow` binary, shared with the integration tests.

pub mod commands;
