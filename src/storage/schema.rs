//! Database schema definitions

/// SQL to create the project table
pub const CREATE_PROJECT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS project (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
)
"#;

/// SQL to create the repository table
pub const CREATE_REPOSITORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS repository (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES project(id),
    name TEXT NOT NULL,
    import_depth INTEGER NOT NULL DEFAULT 1,
    UNIQUE(project_id, name)
)
"#;

/// SQL to create the reference table
/// `last_commit` is the tip recorded by the last successful extraction
pub const CREATE_REFERENCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS reference (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repository(id),
    name TEXT NOT NULL,
    ref_type TEXT NOT NULL DEFAULT 'branch',
    last_commit TEXT,
    UNIQUE(repository_id, name)
)
"#;

/// SQL to create the users table
///
/// A user is identified by email when one is known, otherwise by name.
pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    email TEXT UNIQUE
)
"#;

/// SQL to create the commits table
///
/// `parent_hashes` keeps the ordered parent list as written by git so that
/// missing `commit_parent` rows can be rebuilt after the parallel phase.
pub const CREATE_COMMITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repository(id),
    hash TEXT NOT NULL,
    author_id INTEGER REFERENCES users(id),
    committer_id INTEGER REFERENCES users(id),
    authored_at TEXT NOT NULL,
    committed_at TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    parent_hashes TEXT NOT NULL DEFAULT '',
    UNIQUE(repository_id, hash)
)
"#;

/// SQL to create the commit_parent table
pub const CREATE_COMMIT_PARENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commit_parent (
    commit_id INTEGER NOT NULL REFERENCES commits(id),
    parent_hash TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    parent_id INTEGER REFERENCES commits(id),
    PRIMARY KEY(commit_id, sequence)
)
"#;

/// SQL to create the commit_in_reference table
pub const CREATE_COMMIT_IN_REFERENCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commit_in_reference (
    commit_id INTEGER NOT NULL REFERENCES commits(id),
    reference_id INTEGER NOT NULL REFERENCES reference(id),
    PRIMARY KEY(commit_id, reference_id)
)
"#;

/// SQL to create the file table
pub const CREATE_FILE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repository(id),
    name TEXT NOT NULL,
    extension TEXT,
    UNIQUE(repository_id, name)
)
"#;

/// SQL to create the file_modification table
/// `patch` is only filled from import depth 2 upwards
pub const CREATE_FILE_MODIFICATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_modification (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    commit_id INTEGER NOT NULL REFERENCES commits(id),
    file_id INTEGER NOT NULL REFERENCES file(id),
    status TEXT NOT NULL,
    additions INTEGER NOT NULL DEFAULT 0,
    deletions INTEGER NOT NULL DEFAULT 0,
    changes INTEGER NOT NULL DEFAULT 0,
    patch TEXT,
    UNIQUE(commit_id, file_id)
)
"#;

/// SQL to create the line_detail table (import depth 3)
pub const CREATE_LINE_DETAIL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS line_detail (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_modification_id INTEGER NOT NULL REFERENCES file_modification(id),
    kind TEXT NOT NULL,
    line_number INTEGER NOT NULL,
    content TEXT NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_name_without_email ON users(name) WHERE email IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_reference_repository ON reference(repository_id)",
    "CREATE INDEX IF NOT EXISTS idx_commits_repository ON commits(repository_id)",
    "CREATE INDEX IF NOT EXISTS idx_commit_parent_unresolved ON commit_parent(parent_id) WHERE parent_id IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_commit_in_reference_ref ON commit_in_reference(reference_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_modification_commit ON file_modification(commit_id)",
    "CREATE INDEX IF NOT EXISTS idx_line_detail_modification ON line_detail(file_modification_id)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_PROJECT_TABLE,
        CREATE_REPOSITORY_TABLE,
        CREATE_REFERENCE_TABLE,
        CREATE_USERS_TABLE,
        CREATE_COMMITS_TABLE,
        CREATE_COMMIT_PARENT_TABLE,
        CREATE_COMMIT_IN_REFERENCE_TABLE,
        CREATE_FILE_TABLE,
        CREATE_FILE_MODIFICATION_TABLE,
        CREATE_LINE_DETAIL_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
