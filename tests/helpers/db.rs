use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use tempfile::NamedTempFile;

/// Tables mirroring the case management catalog used by the tests.
const TABLES: &str = r#"
CREATE TABLE cases (id TEXT PRIMARY KEY, status TEXT, parent_id TEXT);
CREATE TABLE tasks (
    id TEXT PRIMARY KEY,
    status TEXT,
    priority INTEGER,
    case_id TEXT,
    assignee TEXT,
    title TEXT
);
CREATE TABLE notes (
    id TEXT PRIMARY KEY,
    task_id TEXT,
    case_id TEXT,
    case_assignee TEXT,
    flagged INTEGER
)
"#;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new SQLite database file with the test tables in place
    pub async fn new() -> Self {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        let db = Self {
            connection,
            _temp_file: temp_file,
        };
        db.execute_script(TABLES).await;
        db
    }

    /// Run each `;`-separated statement in `script`
    pub async fn execute_script(&self, script: &str) {
        for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.connection
                .execute_unprepared(statement)
                .await
                .unwrap_or_else(|e| panic!("Failed to run `{statement}`: {e}"));
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}
