// Allow some clippy lints - to be fixed gradually
#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]

pub mod config;
pub mod error;
pub mod ethereum_clients;
pub mod logging;
pub mod time;

pub use error::ConfigurationError;
