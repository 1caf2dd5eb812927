//! Data model (§3). Types here are the records the storage interface (§6) performs
//! CRUD over; the orchestrator never persists anything that isn't one of these.

mod chapter;
mod entities;
mod plot_thread;
mod project;
mod thought_log;
mod usage;
mod violation;
mod world_bible;

pub use chapter::{Chapter, ChapterStatus, ScenePlan};
pub use entities::{EntityRelationship, EntityType, RelationshipKind, WorldEntity, WorldRule};
pub use plot_thread::{PlotThread, PlotThreadStatus};
pub use project::{Project, ProjectFlags, ProjectStatus};
pub use thought_log::ThoughtLog;
pub use usage::{AiUsageEvent, TokenUsage};
pub use violation::{ConsistencyViolation, ViolationSeverity, ViolationStatus, ViolationType};
pub use world_bible::{
    CharacterProfile, PersistentInjury, PlotOutline, ChapterOutline, StructuralRole, WorldBible,
};
