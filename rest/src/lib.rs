pub mod client;
pub mod error;
pub mod rate_limit;

pub use client::*;
pub use error::*;
pub use rate_limit::*;
