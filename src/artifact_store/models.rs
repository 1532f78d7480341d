use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the record that owns an artifact.
///
/// Some tables key by UUID, others by free-form text ids; both are stored as
/// TEXT, so the core treats them as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ArtifactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The tables whose rows carry an audio object with an expiring signed URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFamily {
    /// Dictionary audio records (`audio_records`).
    AudioRecords,
    /// Audio attached to flashcard questions (`flashcards`).
    FlashcardQuestions,
    /// Audio for text chunks (`chunks`).
    Chunks,
}

/// Table and column names backing one artifact family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyColumns {
    pub table: &'static str,
    pub storage_path: &'static str,
    pub access_url: &'static str,
    pub url_expires_at: &'static str,
}

impl ArtifactFamily {
    pub const ALL: [ArtifactFamily; 3] = [
        ArtifactFamily::AudioRecords,
        ArtifactFamily::FlashcardQuestions,
        ArtifactFamily::Chunks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactFamily::AudioRecords => "audio_records",
            ArtifactFamily::FlashcardQuestions => "flashcard_questions",
            ArtifactFamily::Chunks => "chunks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio_records" => Some(ArtifactFamily::AudioRecords),
            "flashcard_questions" => Some(ArtifactFamily::FlashcardQuestions),
            "chunks" => Some(ArtifactFamily::Chunks),
            _ => None,
        }
    }

    pub fn columns(&self) -> FamilyColumns {
        match self {
            ArtifactFamily::AudioRecords => FamilyColumns {
                table: "audio_records",
                storage_path: "storage_path",
                access_url: "audio_url",
                url_expires_at: "url_expires_at",
            },
            ArtifactFamily::FlashcardQuestions => FamilyColumns {
                table: "flashcards",
                storage_path: "question_audio_storage_path",
                access_url: "question_audio_url",
                url_expires_at: "question_audio_url_expires_at",
            },
            ArtifactFamily::Chunks => FamilyColumns {
                table: "chunks",
                storage_path: "audio_storage_path",
                access_url: "audio_url",
                url_expires_at: "audio_url_expires_at",
            },
        }
    }

    /// Id of the background job that refreshes this family.
    pub fn job_id(&self) -> &'static str {
        match self {
            ArtifactFamily::AudioRecords => "url_refresh_audio_records",
            ArtifactFamily::FlashcardQuestions => "url_refresh_flashcard_questions",
            ArtifactFamily::Chunks => "url_refresh_chunks",
        }
    }
}

impl fmt::Display for ArtifactFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored object with a time-limited access URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub family: ArtifactFamily,
    pub storage_path: String,
    pub access_url: Option<String>,
    pub url_expires_at: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn has_storage_path(&self) -> bool {
        !self.storage_path.trim().is_empty()
    }

    /// True if this artifact needs a new URL before `cutoff`.
    ///
    /// Rows without an expiry have never been given a URL and belong to the
    /// creation flow, so they never qualify.
    pub fn expires_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.has_storage_path() && self.url_expires_at.is_some_and(|exp| exp < cutoff)
    }
}
