//! SQLite-backed profile roster.
//!
//! Descriptors are stored as JSON arrays so a row written with the wrong
//! length stays readable; the gallery filters it out at rebuild time.

use greeter_core::{Profile, RoleType};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("profile not found: {0}")]
    NotFound(String),
}

/// Fields supplied by the operator when enrolling.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub name: String,
    pub role_type: RoleType,
    pub designation: String,
    pub qualification: String,
    pub photo_url: Option<String>,
    pub face_descriptor: Option<Vec<f32>>,
}

pub struct ProfileStore {
    conn: Connection,
}

impl ProfileStore {
    /// Open or create the store at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// All profiles, oldest first.
    pub async fn list(&self) -> Result<Vec<Profile>, StoreError> {
        let profiles = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, role_type, designation, qualification,
                            photo_url, face_descriptor, created_at
                     FROM profiles
                     ORDER BY created_at ASC, rowid ASC",
                )?;
                let rows = stmt.query_map([], decode_profile_row)?;
                let profiles = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(profiles)
            })
            .await?;
        Ok(profiles)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        let id = id.to_string();
        let profile = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, role_type, designation, qualification,
                                photo_url, face_descriptor, created_at
                         FROM profiles WHERE id = ?1",
                        params![id],
                        decode_profile_row,
                    )
                    .optional()?)
            })
            .await?;
        Ok(profile)
    }

    /// Insert a new profile with a fresh id and creation timestamp.
    pub async fn create(&self, new: NewProfile) -> Result<Profile, StoreError> {
        let profile = Profile {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            role_type: new.role_type,
            designation: new.designation,
            qualification: new.qualification,
            photo_url: new.photo_url,
            face_descriptor: new.face_descriptor,
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };

        let row = profile.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO profiles (id, name, role_type, designation, qualification,
                                           photo_url, face_descriptor, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        row.id,
                        row.name,
                        row.role_type.as_str(),
                        row.designation,
                        row.qualification,
                        row.photo_url,
                        encode_descriptor(row.face_descriptor.as_deref()),
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(id = %profile.id, name = %profile.name, has_face = profile.face_descriptor.is_some(), "profile created");
        Ok(profile)
    }

    /// Replace the photo and descriptor of an existing profile.
    pub async fn update_face(
        &self,
        id: &str,
        photo_url: Option<String>,
        face_descriptor: Option<Vec<f32>>,
    ) -> Result<Profile, StoreError> {
        let key = id.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE profiles SET photo_url = ?2, face_descriptor = ?3 WHERE id = ?1",
                    params![key, photo_url, encode_descriptor(face_descriptor.as_deref())],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tracing::info!(id, "profile face updated");
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Delete a profile. Returns whether a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let key = id.to_string();
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM profiles WHERE id = ?1", params![key])?))
            .await?;
        if deleted > 0 {
            tracing::info!(id, "profile deleted");
        }
        Ok(deleted > 0)
    }
}

fn encode_descriptor(descriptor: Option<&[f32]>) -> Option<String> {
    descriptor.and_then(|d| serde_json::to_string(d).ok())
}

fn decode_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id: String = row.get(0)?;
    let role: String = row.get(2)?;
    let role_type = role.parse().unwrap_or_else(|e: String| {
        tracing::warn!(id = %id, error = %e, "unknown role type; treating as staff");
        RoleType::Staff
    });

    let descriptor: Option<String> = row.get(6)?;
    let face_descriptor = descriptor.and_then(|json| match serde_json::from_str(&json) {
        Ok(values) => Some(values),
        Err(e) => {
            tracing::warn!(id = %id, error = %e, "unreadable face descriptor; ignoring");
            None
        }
    });

    Ok(Profile {
        id,
        name: row.get(1)?,
        role_type,
        designation: row.get(3)?,
        qualification: row.get(4)?,
        photo_url: row.get(5)?,
        face_descriptor,
        created_at: row.get(7)?,
    })
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    role_type TEXT NOT NULL CHECK(role_type IN ('staff', 'student')),
    designation TEXT NOT NULL DEFAULT '',
    qualification TEXT NOT NULL DEFAULT '',
    photo_url TEXT,
    face_descriptor TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_created_at ON profiles(created_at);
";

#[cfg(test)]
mod tests {
    use super::*;

    fn new_profile(name: &str, descriptor: Option<Vec<f32>>) -> NewProfile {
        NewProfile {
            name: name.into(),
            role_type: RoleType::Staff,
            designation: "Lecturer".into(),
            qualification: "MSc".into(),
            photo_url: Some(format!("/photos/{name}.jpg")),
            face_descriptor: descriptor,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_in_creation_order() {
        let store = ProfileStore::open_in_memory().await.unwrap();
        let alice = store.create(new_profile("Alice", Some(vec![0.25; 128]))).await.unwrap();
        let bob = store.create(new_profile("Bob", None)).await.unwrap();

        let profiles = store.list().await.unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].id, alice.id);
        assert_eq!(profiles[1].id, bob.id);
        assert_eq!(profiles[0].face_descriptor.as_ref().map(Vec::len), Some(128));
        assert_eq!(profiles[1].face_descriptor, None);
        assert_eq!(profiles[0].photo_url.as_deref(), Some("/photos/Alice.jpg"));
    }

    #[tokio::test]
    async fn test_update_face() {
        let store = ProfileStore::open_in_memory().await.unwrap();
        let alice = store.create(new_profile("Alice", None)).await.unwrap();

        let updated = store
            .update_face(&alice.id, Some("/photos/new.jpg".into()), Some(vec![0.5; 128]))
            .await
            .unwrap();
        assert_eq!(updated.name, "Alice");
        assert_eq!(updated.created_at, alice.created_at);
        assert_eq!(updated.photo_url.as_deref(), Some("/photos/new.jpg"));
        assert!(updated.embedding().unwrap().is_valid(128));
    }

    #[tokio::test]
    async fn test_update_missing_profile() {
        let store = ProfileStore::open_in_memory().await.unwrap();
        let err = store.update_face("nope", None, None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = ProfileStore::open_in_memory().await.unwrap();
        let alice = store.create(new_profile("Alice", None)).await.unwrap();
        assert!(store.delete(&alice.id).await.unwrap());
        assert!(!store.delete(&alice.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_descriptor_is_ignored() {
        let store = ProfileStore::open_in_memory().await.unwrap();
        let alice = store.create(new_profile("Alice", None)).await.unwrap();
        let id = alice.id.clone();
        store
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE profiles SET face_descriptor = 'not json' WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let profile = store.get(&alice.id).await.unwrap().unwrap();
        assert_eq!(profile.face_descriptor, None);
    }
}
