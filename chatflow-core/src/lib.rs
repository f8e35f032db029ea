pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod normalize;
pub mod service;
pub mod session;
pub mod stream;
pub mod telemetry;
