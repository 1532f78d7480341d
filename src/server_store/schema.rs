//! SQLite schema for the server database (job run history and schedules).

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Job runs and schedules
// =============================================================================

const JOB_RUNS_TABLE_V1: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", SqlType::Integer, is_primary_key = true), // rowid alias
        sqlite_column!("job_id", SqlType::Text, non_null = true),
        sqlite_column!("started_at", SqlType::Text, non_null = true),
        sqlite_column!("finished_at", SqlType::Text),
        sqlite_column!("status", SqlType::Text, non_null = true),
        sqlite_column!("error_message", SqlType::Text),
        sqlite_column!("triggered_by", SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_runs_job_id_started", "job_id, started_at DESC"),
        ("idx_job_runs_status", "status"),
    ],
};

const JOB_SCHEDULES_TABLE_V1: Table = Table {
    name: "job_schedules",
    columns: &[
        sqlite_column!("job_id", SqlType::Text, is_primary_key = true),
        sqlite_column!("next_run_at", SqlType::Text, non_null = true),
        sqlite_column!("last_run_at", SqlType::Text),
    ],
    indices: &[],
};

// =============================================================================
// Version 2 - Run details (JSON result of each run)
// =============================================================================

const JOB_RUNS_TABLE_V2: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", SqlType::Integer, is_primary_key = true), // rowid alias
        sqlite_column!("job_id", SqlType::Text, non_null = true),
        sqlite_column!("started_at", SqlType::Text, non_null = true),
        sqlite_column!("finished_at", SqlType::Text),
        sqlite_column!("status", SqlType::Text, non_null = true),
        sqlite_column!("error_message", SqlType::Text),
        sqlite_column!("triggered_by", SqlType::Text, non_null = true),
        sqlite_column!("details", SqlType::Text),
    ],
    indices: &[
        ("idx_job_runs_job_id_started", "job_id, started_at DESC"),
        ("idx_job_runs_status", "status"),
    ],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute("ALTER TABLE job_runs ADD COLUMN details TEXT", [])?;
    Ok(())
}

pub const SERVER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOB_RUNS_TABLE_V1, JOB_SCHEDULES_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[JOB_RUNS_TABLE_V2, JOB_SCHEDULES_TABLE_V1],
        migration: Some(migrate_v1_to_v2),
    },
];
