pub mod claims;
pub mod envelope;
