use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use solvetrack_core::{ClassName, ScoreUpdate, StudentScore, Username};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("class not found: {0}")]
    ClassNotFound(String),
    #[error("student not found in {class}: {username}")]
    StudentNotFound { class: String, username: String },
    #[error("corrupt row in {class}: {detail}")]
    Corrupt { class: String, detail: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// One SQLite table per class, named after the validated class name.
/// `ClassName` is the allow-list that makes the identifier interpolation
/// below safe; identifiers are additionally double-quoted.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the score database and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas
    /// cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(Self { conn })
    }

    /// Create one score table per class if not already present. Idempotent;
    /// existing tables and their rows are left untouched.
    ///
    /// # Errors
    /// Returns an error when table creation fails.
    pub fn ensure_schema(&self, classes: &[ClassName]) -> Result<(), StoreError> {
        for class in classes {
            self.conn.execute_batch(&format!(
                r#"CREATE TABLE IF NOT EXISTS "{class}" (
                  s_no INTEGER PRIMARY KEY,
                  user_name TEXT NOT NULL,
                  roll_no TEXT NOT NULL,
                  previous_week INTEGER NOT NULL DEFAULT 0 CHECK (previous_week >= 0),
                  recent_week INTEGER NOT NULL DEFAULT 0 CHECK (recent_week >= 0),
                  count INTEGER NOT NULL DEFAULT 0
                );"#
            ))?;
            tracing::debug!(class = %class, "ensured score table");
        }
        Ok(())
    }

    /// List all class tables known to the store, ordered by name.
    ///
    /// # Errors
    /// Returns an error when the catalog query fails.
    pub fn list_classes(&self) -> Result<Vec<ClassName>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name ASC",
        )?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut classes = Vec::new();
        for name in names {
            // Tables that do not fit the class-name alphabet are not ours.
            if let Ok(class) = ClassName::parse(&name?) {
                classes.push(class);
            }
        }
        Ok(classes)
    }

    /// Usernames of a class in stored (sequence-number) order.
    ///
    /// # Errors
    /// `ClassNotFound` when no table exists for the class.
    pub fn list_usernames(&self, class: &ClassName) -> Result<Vec<Username>, StoreError> {
        self.require_class(class)?;
        let mut stmt = self
            .conn
            .prepare(&format!(r#"SELECT user_name FROM "{class}" ORDER BY s_no ASC"#))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut usernames = Vec::new();
        for name in names {
            let name = name?;
            let username = Username::parse(&name).map_err(|err| StoreError::Corrupt {
                class: class.to_string(),
                detail: err.to_string(),
            })?;
            usernames.push(username);
        }
        Ok(usernames)
    }

    /// Current recent-week count for one student.
    ///
    /// # Errors
    /// `ClassNotFound` / `StudentNotFound` when the class or row is absent.
    pub fn get_recent(&self, class: &ClassName, username: &Username) -> Result<u32, StoreError> {
        self.require_class(class)?;
        self.conn
            .query_row(
                &format!(r#"SELECT recent_week FROM "{class}" WHERE user_name = ?1"#),
                params![username.as_str()],
                |row| row.get::<_, u32>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::StudentNotFound {
                class: class.to_string(),
                username: username.to_string(),
            })
    }

    /// Overwrite the three numeric fields for one student.
    ///
    /// # Errors
    /// `ClassNotFound` / `StudentNotFound` when the class or row is absent.
    pub fn apply_update(
        &self,
        class: &ClassName,
        username: &Username,
        update: &ScoreUpdate,
    ) -> Result<(), StoreError> {
        self.require_class(class)?;
        let affected = self.conn.execute(
            &format!(
                r#"UPDATE "{class}"
                   SET previous_week = ?1, recent_week = ?2, count = ?3
                   WHERE user_name = ?4"#
            ),
            params![update.previous_week, update.recent_week, update.count, username.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::StudentNotFound {
                class: class.to_string(),
                username: username.to_string(),
            });
        }
        Ok(())
    }

    /// Full rows for display, ordered by sequence number.
    ///
    /// # Errors
    /// `ClassNotFound` when no table exists for the class; `Corrupt` when a
    /// stored username no longer parses.
    pub fn list_rows(&self, class: &ClassName) -> Result<Vec<StudentScore>, StoreError> {
        self.require_class(class)?;
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT s_no, user_name, roll_no, previous_week, recent_week, count
               FROM "{class}" ORDER BY s_no ASC"#
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut scores = Vec::new();
        for row in rows {
            let (seq_no, user_name, roll_no, previous_week, recent_week, count) = row?;
            let username = Username::parse(&user_name).map_err(|err| StoreError::Corrupt {
                class: class.to_string(),
                detail: err.to_string(),
            })?;
            scores.push(StudentScore {
                seq_no,
                username,
                roll_no,
                previous_week,
                recent_week,
                count,
            });
        }
        Ok(scores)
    }

    /// Insert one student with zeroed counters. Roster provisioning is an
    /// out-of-band operation; the web service never calls this.
    ///
    /// # Errors
    /// `ClassNotFound` when no table exists for the class; a duplicate
    /// sequence number surfaces as a constraint violation.
    pub fn add_student(
        &self,
        class: &ClassName,
        seq_no: i64,
        username: &Username,
        roll_no: &str,
    ) -> Result<(), StoreError> {
        self.require_class(class)?;
        self.conn.execute(
            &format!(
                r#"INSERT INTO "{class}" (s_no, user_name, roll_no, previous_week, recent_week, count)
                   VALUES (?1, ?2, ?3, 0, 0, 0)"#
            ),
            params![seq_no, username.as_str(), roll_no],
        )?;
        Ok(())
    }

    fn require_class(&self, class: &ClassName) -> Result<(), StoreError> {
        let present = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![class.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        match present {
            Some(()) => Ok(()),
            None => Err(StoreError::ClassNotFound(class.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    static DB_SEQ: AtomicU64 = AtomicU64::new(0);

    fn unique_temp_db_path() -> PathBuf {
        let seq = DB_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir()
            .join(format!("solvetrack-store-{}-{seq}.sqlite3", std::process::id()))
    }

    fn open_store(path: &Path) -> SqliteStore {
        match SqliteStore::open(path) {
            Ok(store) => store,
            Err(err) => panic!("failed to open store: {err}"),
        }
    }

    fn class(name: &str) -> ClassName {
        match ClassName::parse(name) {
            Ok(class) => class,
            Err(err) => panic!("invalid test class: {err}"),
        }
    }

    fn username(value: &str) -> Username {
        match Username::parse(value) {
            Ok(name) => name,
            Err(err) => panic!("invalid test username: {err}"),
        }
    }

    fn must<T>(result: Result<T, StoreError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("store operation failed: {err}"),
        }
    }

    #[test]
    fn ensure_schema_is_idempotent_and_preserves_rows() {
        let path = unique_temp_db_path();
        let store = open_store(&path);
        let cse_a = class("CSE_A");

        must(store.ensure_schema(&[cse_a.clone()]));
        must(store.add_student(&cse_a, 1, &username("alice"), "22891A0001"));

        // Second run must be a no-op on the existing table.
        must(store.ensure_schema(&[cse_a.clone()]));
        let rows = must(store.list_rows(&cse_a));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].username.as_str(), "alice");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn list_classes_returns_created_tables_sorted() {
        let path = unique_temp_db_path();
        let store = open_store(&path);
        must(store.ensure_schema(&[class("CSE_B"), class("CSE_A")]));

        let classes = must(store.list_classes());
        let names: Vec<&str> = classes.iter().map(ClassName::as_str).collect();
        assert_eq!(names, vec!["CSE_A", "CSE_B"]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unknown_class_is_not_found_everywhere() {
        let path = unique_temp_db_path();
        let store = open_store(&path);
        let ghost = class("Ghost");
        let alice = username("alice");

        assert!(matches!(store.list_usernames(&ghost), Err(StoreError::ClassNotFound(_))));
        assert!(matches!(store.get_recent(&ghost, &alice), Err(StoreError::ClassNotFound(_))));
        assert!(matches!(store.list_rows(&ghost), Err(StoreError::ClassNotFound(_))));
        assert!(matches!(
            store.apply_update(&ghost, &alice, &ScoreUpdate::from_counts(0, 0)),
            Err(StoreError::ClassNotFound(_))
        ));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn get_recent_reports_missing_student() {
        let path = unique_temp_db_path();
        let store = open_store(&path);
        let cse_a = class("CSE_A");
        must(store.ensure_schema(&[cse_a.clone()]));

        assert!(matches!(
            store.get_recent(&cse_a, &username("nobody")),
            Err(StoreError::StudentNotFound { .. })
        ));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn apply_update_overwrites_the_numeric_triple() {
        let path = unique_temp_db_path();
        let store = open_store(&path);
        let cse_a = class("CSE_A");
        let alice = username("alice");
        must(store.ensure_schema(&[cse_a.clone()]));
        must(store.add_student(&cse_a, 1, &alice, "22891A0001"));

        must(store.apply_update(&cse_a, &alice, &ScoreUpdate::from_counts(10, 15)));
        assert_eq!(must(store.get_recent(&cse_a, &alice)), 15);

        must(store.apply_update(&cse_a, &alice, &ScoreUpdate::from_counts(15, 20)));
        let rows = must(store.list_rows(&cse_a));
        assert_eq!(rows[0].previous_week, 15);
        assert_eq!(rows[0].recent_week, 20);
        assert_eq!(rows[0].count, 5);
        assert_eq!(
            rows[0].count,
            i64::from(rows[0].recent_week) - i64::from(rows[0].previous_week)
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn apply_update_reports_missing_student() {
        let path = unique_temp_db_path();
        let store = open_store(&path);
        let cse_a = class("CSE_A");
        must(store.ensure_schema(&[cse_a.clone()]));

        assert!(matches!(
            store.apply_update(&cse_a, &username("nobody"), &ScoreUpdate::from_counts(1, 2)),
            Err(StoreError::StudentNotFound { .. })
        ));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rows_and_usernames_come_back_in_sequence_order() {
        let path = unique_temp_db_path();
        let store = open_store(&path);
        let cse_a = class("CSE_A");
        must(store.ensure_schema(&[cse_a.clone()]));
        must(store.add_student(&cse_a, 3, &username("carol"), "22891A0003"));
        must(store.add_student(&cse_a, 1, &username("alice"), "22891A0001"));
        must(store.add_student(&cse_a, 2, &username("bob"), "22891A0002"));

        let usernames = must(store.list_usernames(&cse_a));
        let names: Vec<&str> = usernames.iter().map(Username::as_str).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);

        let rows = must(store.list_rows(&cse_a));
        let seqs: Vec<i64> = rows.iter().map(|row| row.seq_no).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let _ = std::fs::remove_file(&path);
    }
}
