//! Shared plumbing for the `mbap` command-line tools.

pub mod common;
