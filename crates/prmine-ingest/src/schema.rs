//! Relational schema for materialized shards.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::instrument;

/// Tables in parent-before-child order.
pub const TABLES: [&str; 9] = [
    "repositories",
    "pull_requests",
    "commits",
    "file_changes",
    "function_changes",
    "class_changes",
    "diff_hunks",
    "file_imports",
    "review_comments",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_pull_requests_repo ON pull_requests(repo_id)",
    "CREATE INDEX IF NOT EXISTS idx_commits_pr ON commits(pr_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_changes_commit ON file_changes(commit_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_changes_language ON file_changes(language)",
    "CREATE INDEX IF NOT EXISTS idx_function_changes_file ON function_changes(file_change_id)",
    "CREATE INDEX IF NOT EXISTS idx_function_changes_name ON function_changes(function_name)",
    "CREATE INDEX IF NOT EXISTS idx_class_changes_file ON class_changes(file_change_id)",
    "CREATE INDEX IF NOT EXISTS idx_diff_hunks_file ON diff_hunks(file_change_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_imports_file ON file_imports(file_change_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_imports_module ON file_imports(module_name)",
    "CREATE INDEX IF NOT EXISTS idx_review_comments_pr ON review_comments(pr_id)",
];

/// Natural keys of the fact tables. A shard line written twice maps to one row.
const FACT_KEYS: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_function_changes
        ON function_changes(file_change_id, function_name, change_type, line_content, source)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_class_changes
        ON class_changes(file_change_id, class_name, change_type, line_content, source)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_file_imports
        ON file_imports(file_change_id, line_number, import_type, module_name)",
    // NULLs never collide in a UNIQUE index, so nullable columns are coalesced
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_review_comments
        ON review_comments(pr_id, comment_type, COALESCE(reviewer, ''), comment_text,
                           COALESCE(file_path, ''), COALESCE(line_number, -1),
                           COALESCE(created_at, ''))",
];

/// Create all tables and indexes if they do not exist.
#[instrument(skip_all)]
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            full_name TEXT NOT NULL UNIQUE,
            language TEXT,
            stars INTEGER,
            url TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(owner, name)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pull_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id INTEGER NOT NULL REFERENCES repositories(id),
            pr_number INTEGER NOT NULL,
            title TEXT,
            body TEXT,
            author TEXT,
            created_at TEXT,
            merged_at TEXT,
            state TEXT NOT NULL DEFAULT 'merged',
            additions INTEGER NOT NULL DEFAULT 0,
            deletions INTEGER NOT NULL DEFAULT 0,
            changed_files INTEGER NOT NULL DEFAULT 0,
            commits_count INTEGER NOT NULL DEFAULT 0,
            reviews_count INTEGER NOT NULL DEFAULT 0,
            review_comments_count INTEGER NOT NULL DEFAULT 0,
            processed_at TEXT,
            UNIQUE(repo_id, pr_number)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS commits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id INTEGER NOT NULL REFERENCES repositories(id),
            pr_id INTEGER NOT NULL REFERENCES pull_requests(id),
            commit_hash TEXT NOT NULL,
            message TEXT,
            author_name TEXT,
            author_email TEXT,
            committed_at TEXT,
            additions INTEGER NOT NULL DEFAULT 0,
            deletions INTEGER NOT NULL DEFAULT 0,
            total_changes INTEGER NOT NULL DEFAULT 0,
            UNIQUE(repo_id, commit_hash)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS file_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            commit_id INTEGER NOT NULL REFERENCES commits(id),
            file_path TEXT NOT NULL,
            language TEXT,
            change_type TEXT,
            additions INTEGER NOT NULL DEFAULT 0,
            deletions INTEGER NOT NULL DEFAULT 0,
            changes INTEGER NOT NULL DEFAULT 0,
            patch_content TEXT,
            UNIQUE(commit_id, file_path)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS function_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_change_id INTEGER NOT NULL REFERENCES file_changes(id),
            function_name TEXT NOT NULL,
            change_type TEXT NOT NULL,
            line_content TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS class_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_change_id INTEGER NOT NULL REFERENCES file_changes(id),
            class_name TEXT NOT NULL,
            change_type TEXT NOT NULL,
            line_content TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS diff_hunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_change_id INTEGER NOT NULL REFERENCES file_changes(id),
            hunk_index INTEGER NOT NULL,
            old_start INTEGER NOT NULL,
            old_count INTEGER NOT NULL,
            new_start INTEGER NOT NULL,
            new_count INTEGER NOT NULL,
            context TEXT,
            content TEXT,
            UNIQUE(file_change_id, hunk_index)
        )",
    )
    .execute(pool)
    .await?;

    // imported_items holds a JSON array or NULL
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS file_imports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_change_id INTEGER NOT NULL REFERENCES file_changes(id),
            import_statement TEXT NOT NULL,
            import_type TEXT NOT NULL,
            module_name TEXT NOT NULL,
            imported_items TEXT,
            line_number INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS review_comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pr_id INTEGER NOT NULL REFERENCES pull_requests(id),
            comment_type TEXT NOT NULL,
            reviewer TEXT,
            comment_text TEXT NOT NULL,
            file_path TEXT,
            line_number INTEGER,
            state TEXT,
            created_at TEXT
        )",
    )
    .execute(pool)
    .await?;

    for index in INDEXES.iter().chain(FACT_KEYS) {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}

/// Actual `COUNT(*)` of every table, in [`TABLES`] order.
pub async fn table_counts(pool: &SqlitePool) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await?;
        counts.push((table, count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_init_schema_is_repeatable() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        let counts = table_counts(&pool).await.unwrap();
        assert_eq!(counts.len(), 9);
        assert!(counts.iter().all(|(_, n)| *n == 0));
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();

        let orphan = sqlx::query("INSERT INTO pull_requests (repo_id, pr_number) VALUES (99, 1)")
            .execute(&pool)
            .await;
        assert!(orphan.is_err());
    }

    #[tokio::test]
    async fn test_review_comment_key_treats_nulls_as_equal() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        sqlx::query("INSERT INTO repositories (owner, name, full_name) VALUES ('a', 'b', 'a/b')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO pull_requests (repo_id, pr_number) VALUES (1, 1)")
            .execute(&pool)
            .await
            .unwrap();

        let insert = "INSERT INTO review_comments (pr_id, comment_type, comment_text)
                      VALUES (1, 'review', 'lgtm') ON CONFLICT DO NOTHING";
        let first = sqlx::query(insert).execute(&pool).await.unwrap();
        let second = sqlx::query(insert).execute(&pool).await.unwrap();
        assert_eq!(first.rows_affected(), 1);
        assert_eq!(second.rows_affected(), 0);
    }
}
