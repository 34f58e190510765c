//! HTTP request handlers.

pub mod formats;
pub mod health;
pub mod restore;

pub use formats::*;
pub use health::*;
pub use restore::*;
