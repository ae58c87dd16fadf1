pub mod backoff;
pub mod client;
pub mod consumer;
pub mod receive;
pub mod send;
pub mod transport;
