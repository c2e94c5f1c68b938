//! Tag composition: prioritized prefix/suffix fragments from independent
//! feature modules, merged per principal and mirrored onto the chat name,
//! roster name and visual group of its session.

mod compose;
mod engine;

pub use compose::{compose, visual_group_name, MergedTag, TagContribution};
pub use engine::{TagEngine, TagError};
