//! Memory data model
//!
//! Records, attribute bags, relationships, and the pure analytics
//! projection over a record's learning state.

pub mod analytics;
pub mod attrs;
pub mod record;
pub mod relationship;

pub use analytics::{project, AccessFrequency, UsageAnalytics};
pub use attrs::{attr_map, AttrValue};
pub use record::{
    AccessPatternData, CreateMemoryInput, MemoryPatch, MemoryRecord, INITIAL_HELPFULNESS,
    MAX_TAGS, MAX_TAG_CODEPOINTS, MAX_TEXT_CODEPOINTS,
};
pub use relationship::{Relationship, RelationshipType};
