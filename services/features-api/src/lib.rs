//! Query features of configured collections from the command line.

pub mod config;
pub mod output;
pub mod query;
