//! Request handlers.

pub mod health;
pub mod jobs;
pub mod legacy;

pub use health::*;
pub use jobs::*;
pub use legacy::*;
