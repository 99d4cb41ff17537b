pub mod classify;
pub mod config;
pub mod context;
pub mod deck;
pub mod error;
pub mod invoker;
pub mod launcher;
pub mod monitor;
pub mod parse;
pub mod reconcile;
pub mod rescut;
pub mod results;
pub mod scaling;
pub mod scheduler;
pub mod sink;
pub mod spacegroup;
pub mod xds_output;

pub use crate::error::IntegrateError;
pub use crate::scheduler::{run_integration, Collaborators, ControllerOptions, ControllerReport};
