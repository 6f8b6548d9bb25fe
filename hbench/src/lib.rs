pub mod cfg;
pub mod cmd;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pacer;
pub mod resolve;
pub mod runtime;
pub mod stat;
pub mod transport;
