//! Internal object and pack-format machinery backing the wire protocol:
//! typed views over raw object bytes and the pack encoder/decoder used by the
//! fetch and push pipelines.

pub mod object;
pub mod pack;
