pub mod classify;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod model;
pub mod storage;
pub mod telemetry;
pub mod textgen;
#[cfg(test)]
pub mod test_util;
