pub mod client;
pub mod ntlm;
pub mod types;

pub use client::{Client, Identity};
