//! World Bible derived-projection layer (§2, §4.5): folds the normalized
//! consistency DB (entities, rules, relationships, injuries) into the
//! denormalized [`crate::model::WorldBible`] document consumed by writing agents.

pub mod sync;

pub use sync::rebuild_world_bible;
