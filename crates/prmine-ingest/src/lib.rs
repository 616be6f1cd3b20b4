//! prmine-ingest: fact shards and their relational materialization.
//!
//! The crawler writes append-only JSON-lines shards through [`ShardWriter`].
//! A separate `materialize` run replays them into SQLite with
//! [`Materializer`], resolving parents by natural key.

pub mod materializer;
pub mod schema;
pub mod shard;

pub use materializer::{MaterializeReport, Materializer};
pub use shard::{
    count_lines, open_shard, scan_repo_names, ClassChangeRecord, CommitRecord, CommitStats,
    DiffHunkRecord, FileChangeRecord, FunctionChangeRecord, ImportRecord, PrRecord, PrStats,
    ReviewCommentRecord, ShardError, ShardKind, ShardLine, ShardRecord, ShardWriter,
};
