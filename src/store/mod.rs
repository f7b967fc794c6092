pub mod credential;
pub mod kv;
pub mod token_store;
