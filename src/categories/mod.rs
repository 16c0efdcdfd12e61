//! Category system for landmark groupings.
//!
//! Categories group one or more leaf arrays (for example `left_hand` and
//! `right_hand` into `hands`). Definitions may reference other definitions;
//! the resolver flattens them into ordered leaf lists once, at startup.

mod resolver;
mod spec;

pub use resolver::{resolve, CategoryResolver, ResolvedCategory};
pub use spec::{CategoryDefinitions, CategorySpec};
