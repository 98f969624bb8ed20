//! Dispatch engine integration tests.

mod support;
mod commit_policy;
mod isolation;
mod publish;
