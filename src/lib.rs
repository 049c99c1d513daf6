pub mod actions;
pub mod collection;
pub mod config;
pub mod context;
pub mod importer;
pub mod logging;
pub mod rpc;
