pub mod blockchain;
pub mod cli;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod relayer;
pub mod store;
pub mod wallet;
