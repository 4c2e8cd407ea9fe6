pub mod cache;
pub mod clean;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod git;
pub mod link;
pub mod model;

mod api;
#[cfg(test)]
mod test_support;

pub use api::{Repolink, RepolinkBuilder};
