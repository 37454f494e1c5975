mod client;
mod kv_impl;

pub use client::{KvConfig, KvError, KvRestClient};
pub use kv_impl::{rate_limit_key, KvRestStore};
