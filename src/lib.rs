pub mod config;
pub mod controller;
pub mod sink;
pub mod transport;
