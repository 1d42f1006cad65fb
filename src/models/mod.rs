//! Data models

mod result;
mod snippet;

pub use result::*;
pub use snippet::*;
