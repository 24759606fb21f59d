//! Command-line argument parsing and event-selector resolution.

mod args;

pub use args::{parse_event, parse_sort_keys, Args, EventSpec, SortKey};
