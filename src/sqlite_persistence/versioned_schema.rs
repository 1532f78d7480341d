use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};

/// Offset added to every schema version stored in `PRAGMA user_version`, so a
/// database created by some other tool (user_version 0) is never mistaken for
/// one of ours.
pub const BASE_DB_VERSION: usize = 77000;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = $crate::sqlite_persistence::Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            "REAL" => Some(SqlType::Real),
            "BLOB" => Some(SqlType::Blob),
            _ => None,
        }
    }
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [(&'static str, &'static str)],
}

impl Table {
    pub fn create_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let mut def = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    def.push_str(" NOT NULL");
                }
                if let Some(default_value) = column.default_value {
                    def.push_str(&format!(" DEFAULT {}", default_value));
                }
                def
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({});", self.name, columns)
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), params![])
            .with_context(|| format!("Failed to create table {}", self.name))?;
        for (index_name, columns) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, columns),
                params![],
            )
            .with_context(|| format!("Failed to create index {}", index_name))?;
        }
        Ok(())
    }

    /// Compares the live table against this definition: column order, names,
    /// types, NOT NULL, primary keys and the presence of every index.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<(String, String, bool, bool)> = stmt
            .query_map(params![], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? == 1,
                    row.get::<_, i32>(5)? > 0,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if actual.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {} (found: {})",
                self.name,
                actual.len(),
                self.columns.len(),
                actual
                    .iter()
                    .map(|(name, ..)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for ((name, sql_type, non_null, is_pk), expected) in actual.iter().zip(self.columns) {
            if name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    name
                );
            }
            if SqlType::parse(sql_type) != Some(expected.sql_type) {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    sql_type
                );
            }
            if *non_null != expected.non_null {
                bail!(
                    "Table {} column {} non-null mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.non_null,
                    non_null
                );
            }
            if *is_pk != expected.is_primary_key {
                bail!(
                    "Table {} column {} primary key mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.is_primary_key,
                    is_pk
                );
            }
        }

        for (index_name, _) in self.indices {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Reads the schema version stored in `PRAGMA user_version`.
pub fn read_schema_version(conn: &Connection) -> Result<Option<usize>> {
    let raw: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let raw = usize::try_from(raw).unwrap_or(0);
    if raw <= BASE_DB_VERSION {
        return Ok(None);
    }
    Ok(Some(raw - BASE_DB_VERSION))
}

/// Brings `conn` up to the last schema in `schemas`.
///
/// A database without our version marker and without tables gets the latest
/// schema created from scratch. An existing database is validated against the
/// schema of its recorded version and then migrated forward in one transaction.
pub fn open_versioned(conn: &mut Connection, schemas: &[VersionedSchema], label: &str) -> Result<()> {
    let latest = schemas
        .last()
        .with_context(|| format!("No schema versions defined for {} database", label))?;

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
        [],
        |row| row.get(0),
    )?;

    let version = match read_schema_version(conn)? {
        Some(version) => version,
        None if table_count == 0 => {
            tracing::info!("Creating {} database schema v{}", label, latest.version);
            let tx = conn.transaction()?;
            latest.create(&tx)?;
            tx.commit()?;
            return Ok(());
        }
        None => bail!(
            "{} database has tables but no schema version marker, refusing to touch it",
            label
        ),
    };

    let current = schemas
        .iter()
        .find(|s| s.version == version)
        .with_context(|| format!("Unknown {} database version {}", label, version))?;
    current
        .validate(conn)
        .with_context(|| format!("{} database schema validation failed for version {}", label, version))?;

    if version < latest.version {
        tracing::info!(
            "Migrating {} database from version {} to {}",
            label,
            version,
            latest.version
        );
        let tx = conn.transaction()?;
        for schema in schemas.iter().filter(|s| s.version > version) {
            if let Some(migration) = schema.migration {
                migration(&tx).with_context(|| {
                    format!("Failed to run {} migration to version {}", label, schema.version)
                })?;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest.version),
            [],
        )?;
        tx.commit()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDGETS_V1: Table = Table {
        name: "widgets",
        columns: &[
            sqlite_column!("id", SqlType::Text, is_primary_key = true),
            sqlite_column!("label", SqlType::Text, non_null = true),
        ],
        indices: &[("idx_widgets_label", "label")],
    };

    const WIDGETS_V2: Table = Table {
        name: "widgets",
        columns: &[
            sqlite_column!("id", SqlType::Text, is_primary_key = true),
            sqlite_column!("label", SqlType::Text, non_null = true),
            sqlite_column!("weight", SqlType::Integer, non_null = true, default_value = Some("0")),
        ],
        indices: &[("idx_widgets_label", "label")],
    };

    fn migrate_widgets_v1_to_v2(conn: &Connection) -> Result<()> {
        conn.execute(
            "ALTER TABLE widgets ADD COLUMN weight INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
        Ok(())
    }

    const V1_ONLY: &[VersionedSchema] = &[VersionedSchema {
        version: 1,
        tables: &[WIDGETS_V1],
        migration: None,
    }];

    const V1_AND_V2: &[VersionedSchema] = &[
        VersionedSchema {
            version: 1,
            tables: &[WIDGETS_V1],
            migration: None,
        },
        VersionedSchema {
            version: 2,
            tables: &[WIDGETS_V2],
            migration: Some(migrate_widgets_v1_to_v2),
        },
    ];

    #[test]
    fn creates_latest_schema_on_empty_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        open_versioned(&mut conn, V1_AND_V2, "test").unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(2));
        WIDGETS_V2.validate(&conn).unwrap();
    }

    #[test]
    fn migrates_existing_database_forward() {
        let mut conn = Connection::open_in_memory().unwrap();
        open_versioned(&mut conn, V1_ONLY, "test").unwrap();
        conn.execute("INSERT INTO widgets (id, label) VALUES ('w1', 'one')", [])
            .unwrap();

        open_versioned(&mut conn, V1_AND_V2, "test").unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(2));
        let weight: i64 = conn
            .query_row("SELECT weight FROM widgets WHERE id = 'w1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(weight, 0);
    }

    #[test]
    fn validation_detects_missing_column() {
        let conn = Connection::open_in_memory().unwrap();
        WIDGETS_V1.create(&conn).unwrap();

        let err = WIDGETS_V2.validate(&conn).unwrap_err();
        assert!(err.to_string().contains("has 2 columns, expected 3"));
    }

    #[test]
    fn refuses_unversioned_database_with_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE foreign_stuff (x INTEGER)", []).unwrap();

        let err = open_versioned(&mut conn, V1_ONLY, "test").unwrap_err();
        assert!(err.to_string().contains("no schema version marker"));
    }
}
