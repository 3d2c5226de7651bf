#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod agent;
pub mod beacon;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod embedded;
pub mod error;
pub mod hostinfo;
pub mod identity;
pub mod results;
pub mod tasks;
pub mod transport;
pub mod util;

pub use config::Config;
pub use error::{OutpostError, Result};
