//! Shard to SQLite materialization.
//!
//! Shards are produced independently per language, so no shard line carries
//! a database id. Every record names its parents by natural key (repository
//! full name, PR number, commit hash, file path) and the materializer
//! resolves those keys against rows it inserted earlier. Repositories, pull
//! requests, commits and file changes are looked up before they are
//! inserted. Fact rows carry unique natural keys and are inserted with
//! `ON CONFLICT DO NOTHING`, so re-running a shard, or a shard holding the
//! same facts twice, leaves one row per fact.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};

use prmine_semantic::Language;

use crate::schema;
use crate::shard::{
    open_shard, ClassChangeRecord, CommitRecord, DiffHunkRecord, FileChangeRecord,
    FunctionChangeRecord, ImportRecord, PrRecord, ReviewCommentRecord, ShardError, ShardKind,
    ShardRecord,
};

/// Lines applied between commits.
pub const COMMIT_EVERY: usize = 100;

/// What happened to one decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Inserted(&'static str),
    /// Natural key already present.
    Existing,
    /// A parent could not be resolved.
    Orphan(&'static str),
    /// Field values failed validation.
    Rejected(&'static str),
}

/// Counters for one materialization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeReport {
    pub lines_read: u64,
    pub malformed_lines: u64,
    pub invalid_records: u64,
    pub orphans_dropped: u64,
    pub already_present: u64,
    pub failed_statements: u64,
    /// Rows inserted per table.
    pub inserted: BTreeMap<String, u64>,
}

impl MaterializeReport {
    pub fn inserted_into(&self, table: &str) -> u64 {
        self.inserted.get(table).copied().unwrap_or(0)
    }

    pub fn total_inserted(&self) -> u64 {
        self.inserted.values().sum()
    }

    pub fn merge(&mut self, other: &MaterializeReport) {
        self.lines_read += other.lines_read;
        self.malformed_lines += other.malformed_lines;
        self.invalid_records += other.invalid_records;
        self.orphans_dropped += other.orphans_dropped;
        self.already_present += other.already_present;
        self.failed_statements += other.failed_statements;
        for (table, n) in &other.inserted {
            *self.inserted.entry(table.clone()).or_default() += n;
        }
    }

    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Inserted(table) => *self.inserted.entry(table.to_string()).or_default() += 1,
            Applied::Existing => self.already_present += 1,
            Applied::Orphan(_) => self.orphans_dropped += 1,
            Applied::Rejected(_) => self.invalid_records += 1,
        }
    }
}

/// Sole writer of the relational store.
#[derive(Clone)]
pub struct Materializer {
    pool: SqlitePool,
}

impl Materializer {
    /// Open (creating if needed) a database file and ensure the schema.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::from_str("sqlite:")?
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database {}", db_path.display()))?;
        Self::new(pool).await
    }

    /// Wrap an existing pool and ensure the schema.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Materialize every shard of one language, parents first.
    #[instrument(skip_all, fields(language = %language))]
    pub async fn materialize_language(&self, shard_dir: &Path, language: Language) -> Result<MaterializeReport> {
        let mut report = MaterializeReport::default();
        for kind in ShardKind::ALL {
            let shard = self.materialize_shard(shard_dir, language, kind).await?;
            report.merge(&shard);
        }
        info!(
            lines = report.lines_read,
            inserted = report.total_inserted(),
            malformed = report.malformed_lines,
            orphans = report.orphans_dropped,
            "Materialized {} shards",
            language
        );
        Ok(report)
    }

    /// Materialize one shard file. A missing file is an empty shard.
    pub async fn materialize_shard(
        &self,
        shard_dir: &Path,
        language: Language,
        kind: ShardKind,
    ) -> Result<MaterializeReport> {
        let mut report = MaterializeReport::default();
        let Some(reader) = open_shard(shard_dir, language, kind)? else {
            debug!("No {} shard", kind.file_name(language));
            return Ok(report);
        };

        let mut tx = self.pool.begin().await?;
        let mut pending = 0usize;

        for (idx, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read {}", kind.file_name(language)))?;
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            report.lines_read += 1;

            match kind.decode(&line) {
                Ok(record) => match apply(&mut *tx, &record, &mut report).await {
                    Ok(applied) => {
                        match applied {
                            Applied::Orphan(missing) => warn!(
                                "{}:{}: parent {} not found, dropping",
                                kind.file_name(language),
                                line_no,
                                missing
                            ),
                            Applied::Rejected(reason) => warn!(
                                "{}:{}: {}, skipping",
                                kind.file_name(language),
                                line_no,
                                reason
                            ),
                            _ => {}
                        }
                        report.record(applied);
                    }
                    Err(e) => {
                        warn!("{}:{}: insert failed: {}", kind.file_name(language), line_no, e);
                        report.failed_statements += 1;
                    }
                },
                Err(e @ ShardError::Malformed(_)) => {
                    warn!("{}:{}: {}", kind.file_name(language), line_no, e);
                    report.malformed_lines += 1;
                }
                Err(e @ ShardError::Invalid(_)) => {
                    warn!("{}:{}: {}", kind.file_name(language), line_no, e);
                    report.invalid_records += 1;
                }
            }

            pending += 1;
            if pending >= COMMIT_EVERY {
                tx.commit().await?;
                tx = self.pool.begin().await?;
                pending = 0;
            }
        }

        tx.commit().await?;
        debug!(lines = report.lines_read, "Finished {}", kind.file_name(language));
        Ok(report)
    }

    /// Actual row count of every table.
    pub async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        schema::table_counts(&self.pool).await
    }
}

async fn apply(
    conn: &mut SqliteConnection,
    record: &ShardRecord,
    report: &mut MaterializeReport,
) -> Result<Applied> {
    match record {
        ShardRecord::Pr(r) => apply_pr(conn, r, report).await,
        ShardRecord::Commit(r) => apply_commit(conn, r).await,
        ShardRecord::FileChange(r) => apply_file_change(conn, r).await,
        ShardRecord::FunctionChange(r) => apply_function_change(conn, r).await,
        ShardRecord::ClassChange(r) => apply_class_change(conn, r).await,
        ShardRecord::DiffHunk(r) => apply_diff_hunk(conn, r).await,
        ShardRecord::Import(r) => apply_import(conn, r).await,
        ShardRecord::ReviewComment(r) => apply_review_comment(conn, r).await,
    }
}

fn timestamp(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

async fn repo_id(conn: &mut SqliteConnection, full_name: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar("SELECT id FROM repositories WHERE full_name = ?1")
        .bind(full_name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

async fn pr_id(conn: &mut SqliteConnection, full_name: &str, pr_number: i64) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        "SELECT p.id FROM pull_requests p
         JOIN repositories r ON p.repo_id = r.id
         WHERE r.full_name = ?1 AND p.pr_number = ?2",
    )
    .bind(full_name)
    .bind(pr_number)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

async fn commit_id(conn: &mut SqliteConnection, full_name: &str, commit_hash: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        "SELECT c.id FROM commits c
         JOIN repositories r ON c.repo_id = r.id
         WHERE r.full_name = ?1 AND c.commit_hash = ?2",
    )
    .bind(full_name)
    .bind(commit_hash)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

async fn file_change_id(
    conn: &mut SqliteConnection,
    full_name: &str,
    commit_hash: &str,
    file_path: &str,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        "SELECT f.id FROM file_changes f
         JOIN commits c ON f.commit_id = c.id
         JOIN repositories r ON c.repo_id = r.id
         WHERE r.full_name = ?1 AND c.commit_hash = ?2 AND f.file_path = ?3",
    )
    .bind(full_name)
    .bind(commit_hash)
    .bind(file_path)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

async fn apply_pr(
    conn: &mut SqliteConnection,
    r: &PrRecord,
    report: &mut MaterializeReport,
) -> Result<Applied> {
    let repo: i64 = match repo_id(conn, &r.repo_full_name).await? {
        Some(id) => id,
        None => {
            let Some((owner, name)) = r.repo_full_name.split_once('/') else {
                return Ok(Applied::Rejected("repository name is not owner/name"));
            };
            let id = sqlx::query_scalar(
                "INSERT INTO repositories (owner, name, full_name, language, stars, url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING id",
            )
            .bind(owner)
            .bind(name)
            .bind(&r.repo_full_name)
            .bind(&r.repo_language)
            .bind(r.repo_stars)
            .bind(format!("https://github.com/{}", r.repo_full_name))
            .fetch_one(&mut *conn)
            .await?;
            report.record(Applied::Inserted("repositories"));
            id
        }
    };

    if pr_id(conn, &r.repo_full_name, r.pr_number).await?.is_some() {
        return Ok(Applied::Existing);
    }

    sqlx::query(
        "INSERT INTO pull_requests
            (repo_id, pr_number, title, body, author, created_at, merged_at, state,
             additions, deletions, changed_files, commits_count, reviews_count,
             review_comments_count, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'merged', ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )
    .bind(repo)
    .bind(r.pr_number)
    .bind(&r.pr_title)
    .bind(&r.pr_body)
    .bind(&r.pr_author)
    .bind(timestamp(&r.pr_created_at))
    .bind(timestamp(&r.pr_merged_at))
    .bind(r.pr_stats.additions)
    .bind(r.pr_stats.deletions)
    .bind(r.pr_stats.changed_files)
    .bind(r.pr_stats.commits_count)
    .bind(r.pr_stats.reviews_count)
    .bind(r.pr_stats.review_comments_count)
    .bind(r.processed_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(Applied::Inserted("pull_requests"))
}

async fn apply_commit(conn: &mut SqliteConnection, r: &CommitRecord) -> Result<Applied> {
    let Some(repo) = repo_id(conn, &r.repo_full_name).await? else {
        return Ok(Applied::Orphan("repository"));
    };
    let Some(pr) = pr_id(conn, &r.repo_full_name, r.pr_number).await? else {
        return Ok(Applied::Orphan("pull request"));
    };
    if commit_id(conn, &r.repo_full_name, &r.commit_hash).await?.is_some() {
        return Ok(Applied::Existing);
    }

    sqlx::query(
        "INSERT INTO commits
            (repo_id, pr_id, commit_hash, message, author_name, author_email, committed_at,
             additions, deletions, total_changes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(repo)
    .bind(pr)
    .bind(&r.commit_hash)
    .bind(&r.commit_message)
    .bind(&r.commit_author)
    .bind(&r.commit_author_email)
    .bind(timestamp(&r.committed_at))
    .bind(r.commit_stats.additions)
    .bind(r.commit_stats.deletions)
    .bind(r.commit_stats.total)
    .execute(&mut *conn)
    .await?;

    Ok(Applied::Inserted("commits"))
}

async fn apply_file_change(conn: &mut SqliteConnection, r: &FileChangeRecord) -> Result<Applied> {
    let Some(commit) = commit_id(conn, &r.repo_full_name, &r.commit_hash).await? else {
        return Ok(Applied::Orphan("commit"));
    };
    if file_change_id(conn, &r.repo_full_name, &r.commit_hash, &r.file_path)
        .await?
        .is_some()
    {
        return Ok(Applied::Existing);
    }

    let language = match r.file_language.as_deref() {
        Some(label) if Language::parse(label).is_none() => {
            warn!("Unknown language label {:?} on {}, storing NULL", label, r.file_path);
            None
        }
        other => other,
    };

    sqlx::query(
        "INSERT INTO file_changes
            (commit_id, file_path, language, change_type, additions, deletions, changes, patch_content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(commit)
    .bind(&r.file_path)
    .bind(language)
    .bind(&r.change_type)
    .bind(r.additions)
    .bind(r.deletions)
    .bind(r.changes)
    .bind(&r.patch_content)
    .execute(&mut *conn)
    .await?;

    Ok(Applied::Inserted("file_changes"))
}

async fn apply_function_change(conn: &mut SqliteConnection, r: &FunctionChangeRecord) -> Result<Applied> {
    let Some(file) = file_change_id(conn, &r.repo_full_name, &r.commit_hash, &r.file_path).await? else {
        return Ok(Applied::Orphan("file change"));
    };
    let result = sqlx::query(
        "INSERT INTO function_changes (file_change_id, function_name, change_type, line_content, source)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT DO NOTHING",
    )
    .bind(file)
    .bind(&r.function_name)
    .bind(&r.change_type)
    .bind(&r.line_content)
    .bind(&r.source)
    .execute(&mut *conn)
    .await?;
    Ok(inserted_or_existing(result.rows_affected(), "function_changes"))
}

async fn apply_class_change(conn: &mut SqliteConnection, r: &ClassChangeRecord) -> Result<Applied> {
    let Some(file) = file_change_id(conn, &r.repo_full_name, &r.commit_hash, &r.file_path).await? else {
        return Ok(Applied::Orphan("file change"));
    };
    let result = sqlx::query(
        "INSERT INTO class_changes (file_change_id, class_name, change_type, line_content, source)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT DO NOTHING",
    )
    .bind(file)
    .bind(&r.class_name)
    .bind(&r.change_type)
    .bind(&r.line_content)
    .bind(&r.source)
    .execute(&mut *conn)
    .await?;
    Ok(inserted_or_existing(result.rows_affected(), "class_changes"))
}

async fn apply_diff_hunk(conn: &mut SqliteConnection, r: &DiffHunkRecord) -> Result<Applied> {
    let Some(file) = file_change_id(conn, &r.repo_full_name, &r.commit_hash, &r.file_path).await? else {
        return Ok(Applied::Orphan("file change"));
    };
    let result = sqlx::query(
        "INSERT INTO diff_hunks
            (file_change_id, hunk_index, old_start, old_count, new_start, new_count, context, content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(file_change_id, hunk_index) DO NOTHING",
    )
    .bind(file)
    .bind(r.hunk_index)
    .bind(r.old_start)
    .bind(r.old_count)
    .bind(r.new_start)
    .bind(r.new_count)
    .bind(&r.context)
    .bind(&r.content)
    .execute(&mut *conn)
    .await?;
    Ok(inserted_or_existing(result.rows_affected(), "diff_hunks"))
}

async fn apply_import(conn: &mut SqliteConnection, r: &ImportRecord) -> Result<Applied> {
    let Some(file) = file_change_id(conn, &r.repo_full_name, &r.commit_hash, &r.file_path).await? else {
        return Ok(Applied::Orphan("file change"));
    };
    let items = match &r.imported_items {
        Some(items) => Some(serde_json::to_string(items)?),
        None => None,
    };
    let result = sqlx::query(
        "INSERT INTO file_imports
            (file_change_id, import_statement, import_type, module_name, imported_items, line_number)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT DO NOTHING",
    )
    .bind(file)
    .bind(&r.import_statement)
    .bind(&r.import_type)
    .bind(&r.module_name)
    .bind(items)
    .bind(r.line_number)
    .execute(&mut *conn)
    .await?;
    Ok(inserted_or_existing(result.rows_affected(), "file_imports"))
}

async fn apply_review_comment(conn: &mut SqliteConnection, r: &ReviewCommentRecord) -> Result<Applied> {
    let Some(pr) = pr_id(conn, &r.repo_full_name, r.pr_number).await? else {
        return Ok(Applied::Orphan("pull request"));
    };
    let result = sqlx::query(
        "INSERT INTO review_comments
            (pr_id, comment_type, reviewer, comment_text, file_path, line_number, state, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT DO NOTHING",
    )
    .bind(pr)
    .bind(&r.comment_type)
    .bind(&r.reviewer)
    .bind(&r.comment_text)
    .bind(&r.file_path)
    .bind(r.line_number)
    .bind(&r.state)
    .bind(timestamp(&r.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(inserted_or_existing(result.rows_affected(), "review_comments"))
}

/// Fact inserts skip rows whose natural key is already stored.
fn inserted_or_existing(rows_affected: u64, table: &'static str) -> Applied {
    if rows_affected == 0 {
        Applied::Existing
    } else {
        Applied::Inserted(table)
    }
}
