//! Project files

use qv_common::db::ProjectFile;
use qv_common::ids::{generate_id, now_db};
use qv_common::{Error, Result};
use sqlx::SqlitePool;

/// Longest accepted file path
pub const MAX_PATH_LEN: usize = 255;

/// Validate a project-relative file path
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| Err(Error::InvalidInput(format!("Invalid file path: {}", reason)));

    if path.trim().is_empty() {
        return invalid("empty");
    }
    if path.chars().count() > MAX_PATH_LEN {
        return invalid("too long");
    }
    if path.starts_with('/') {
        return invalid("must be relative");
    }
    if path.contains('\\') {
        return invalid("backslash not allowed");
    }
    if path.split('/').any(|segment| segment == "..") {
        return invalid("'..' not allowed");
    }
    Ok(())
}

/// Editor language for a path, from its extension
pub fn infer_language(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "html",
        "css" => "css",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "json" => "json",
        "md" | "markdown" => "markdown",
        _ => "plaintext",
    }
}

pub async fn list_files(db: &SqlitePool, project_id: &str) -> Result<Vec<ProjectFile>> {
    let files = sqlx::query_as::<_, ProjectFile>(
        "SELECT * FROM project_files WHERE project_id = ? ORDER BY path",
    )
    .bind(project_id)
    .fetch_all(db)
    .await?;
    Ok(files)
}

/// Insert or replace the file at `path`
pub async fn upsert_file(
    db: &SqlitePool,
    project_id: &str,
    path: &str,
    content: &str,
    language: &str,
) -> Result<ProjectFile> {
    validate_path(path)?;
    let ts = now_db();

    let file = sqlx::query_as::<_, ProjectFile>(
        r#"
        INSERT INTO project_files (id, project_id, path, content, language, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, path) DO UPDATE SET
            content = excluded.content,
            language = excluded.language,
            updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(generate_id("file"))
    .bind(project_id)
    .bind(path)
    .bind(content)
    .bind(language)
    .bind(&ts)
    .bind(&ts)
    .fetch_one(db)
    .await?;

    sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
        .bind(&ts)
        .bind(project_id)
        .execute(db)
        .await?;

    Ok(file)
}

pub async fn delete_file(db: &SqlitePool, project_id: &str, path: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM project_files WHERE project_id = ? AND path = ?")
        .bind(project_id)
        .bind(path)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("index.html").is_ok());
        assert!(validate_path("src/app.js").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("a/../b").is_err());
        assert!(validate_path("..").is_err());
        assert!(validate_path("a\\b").is_err());
        assert!(validate_path(&"x".repeat(256)).is_err());
        assert!(validate_path("a..b/c").is_ok());
    }

    #[test]
    fn test_infer_language() {
        assert_eq!(infer_language("index.HTML"), "html");
        assert_eq!(infer_language("styles.css"), "css");
        assert_eq!(infer_language("app.js"), "javascript");
        assert_eq!(infer_language("main.ts"), "typescript");
        assert_eq!(infer_language("data.json"), "json");
        assert_eq!(infer_language("README.md"), "markdown");
        assert_eq!(infer_language("Makefile"), "plaintext");
    }
}
