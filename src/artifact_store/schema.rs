//! SQLite schema for the artifact database.
//!
//! Expiry columns hold unix milliseconds. Storage path and URL columns are
//! nullable: rows are created before their audio is uploaded.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Audio records, flashcards and chunks
// =============================================================================

const AUDIO_RECORDS_TABLE_V1: Table = Table {
    name: "audio_records",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("word", SqlType::Text, non_null = true),
        sqlite_column!("storage_path", SqlType::Text),
        sqlite_column!("audio_url", SqlType::Text),
        sqlite_column!("url_expires_at", SqlType::Integer),
    ],
    indices: &[("idx_audio_records_url_expires_at", "url_expires_at")],
};

const FLASHCARDS_TABLE_V1: Table = Table {
    name: "flashcards",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("question", SqlType::Text, non_null = true),
        sqlite_column!("answer", SqlType::Text, non_null = true),
        sqlite_column!("question_audio_storage_path", SqlType::Text),
        sqlite_column!("question_audio_url", SqlType::Text),
        sqlite_column!("question_audio_url_expires_at", SqlType::Integer),
    ],
    indices: &[(
        "idx_flashcards_question_audio_url_expires_at",
        "question_audio_url_expires_at",
    )],
};

const CHUNKS_TABLE_V1: Table = Table {
    name: "chunks",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("text", SqlType::Text, non_null = true),
        sqlite_column!("audio_storage_path", SqlType::Text),
        sqlite_column!("audio_url", SqlType::Text),
        sqlite_column!("audio_url_expires_at", SqlType::Integer),
    ],
    indices: &[("idx_chunks_audio_url_expires_at", "audio_url_expires_at")],
};

pub const ARTIFACT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[AUDIO_RECORDS_TABLE_V1, FLASHCARDS_TABLE_V1, CHUNKS_TABLE_V1],
    migration: None,
}];
