pub mod config;
pub mod consumer;
pub mod logging;
pub mod p2p;
pub mod producer;
pub mod quote;
