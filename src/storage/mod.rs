//! Candidate persistence
//!
//! One table of nations keyed by normalized id, each carrying its
//! recruitment status, the time that status was set and an optional
//! qualifier (the region for `member` rows).

pub mod repository;

pub use repository::{
    create_memory_repository, create_sqlite_repository, MemberSync, MemoryNationRepository,
    NationRepository, SharedNationRepository, SqliteNationRepository, StoreStats,
};
