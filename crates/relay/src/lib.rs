pub mod cli;
pub mod config;
pub mod control;
pub mod runtime;
pub mod timespec;

mod dca;

pub use dca::DcaFileConnector;
