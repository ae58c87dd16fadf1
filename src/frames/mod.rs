pub mod envelope;
pub mod filter;
