pub mod engine;

pub use engine::{FilterError, VhostMatcher};
