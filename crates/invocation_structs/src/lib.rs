//! Common structs for invocation logs and model bundles shared across crates.

mod error;
mod model;
mod record;
mod request;

pub use error::*;
pub use model::*;
pub use record::*;
pub use request::*;
