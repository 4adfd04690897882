use crate::kiosk::{EnrollRequest, Kiosk, KioskError};
use greeter_core::RoleType;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the greeter kiosk daemon.
///
/// Bus name: org.greeter.Kiosk1
/// Object path: /org/greeter/Kiosk1
pub struct KioskService {
    kiosk: Arc<Kiosk>,
}

impl KioskService {
    pub fn new(kiosk: Arc<Kiosk>) -> Self {
        Self { kiosk }
    }
}

fn to_fdo(e: KioskError) -> zbus::fdo::Error {
    match e {
        KioskError::InvalidInput(msg) => zbus::fdo::Error::InvalidArgs(msg),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn optional_path(path: &str) -> Option<PathBuf> {
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[interface(name = "org.greeter.Kiosk1")]
impl KioskService {
    /// Return kiosk status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.status().await)
    }

    /// List roster profiles as JSON, oldest first.
    async fn list_profiles(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.profiles().await)
    }

    /// Create a profile from an enrollment photo. An empty `photo_path`
    /// creates a profile without face data.
    async fn enroll(
        &self,
        name: &str,
        role: &str,
        designation: &str,
        qualification: &str,
        photo_path: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(name, role, photo_path, "enroll requested");
        let role_type: RoleType = role.parse().map_err(zbus::fdo::Error::InvalidArgs)?;
        let outcome = self
            .kiosk
            .enroll(EnrollRequest {
                name: name.to_string(),
                role_type,
                designation: designation.to_string(),
                qualification: qualification.to_string(),
                photo_path: optional_path(photo_path),
            })
            .await
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Replace a profile's photo and face data.
    async fn reenroll(&self, id: &str, photo_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, photo_path, "reenroll requested");
        let path = optional_path(photo_path)
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs("photo path is required".into()))?;
        let outcome = self.kiosk.reenroll(id, path).await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Remove a profile by ID. Returns false if no such profile exists.
    async fn remove_profile(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "remove_profile requested");
        self.kiosk.remove_profile(id).await.map_err(to_fdo)
    }

    /// Forget the current match.
    async fn clear_detection(&self) {
        self.kiosk.clear_detection().await;
    }

    /// Re-read the roster from the database. Returns the profile count.
    async fn reload_profiles(&self) -> zbus::fdo::Result<u32> {
        let count = self.kiosk.reload_profiles().await.map_err(to_fdo)?;
        Ok(count as u32)
    }
}
