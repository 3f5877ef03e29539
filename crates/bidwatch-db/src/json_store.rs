use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bidwatch_core::error::AppError;
use bidwatch_core::models::Listing;
use bidwatch_core::traits::SnapshotStore;

pub const DEFAULT_STATE_PATH: &str = "data/state.json";

/// Snapshot persisted as a pretty-printed JSON array in a single file.
///
/// A missing file loads as an empty snapshot. Saves go to a sibling temp
/// file that is then renamed over the target, so a crash mid-write leaves
/// the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Default for JsonSnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_PATH)
    }
}

impl SnapshotStore for JsonSnapshotStore {
    async fn load(&self) -> Result<Vec<Listing>, AppError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No snapshot file yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AppError::StoreError(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&raw).map_err(|e| {
            AppError::StoreError(format!("Corrupt snapshot {}: {e}", self.path.display()))
        })
    }

    async fn save(&self, listings: &[Listing]) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::StoreError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let json = serde_json::to_string_pretty(listings)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await.map_err(|e| {
            AppError::StoreError(format!("Failed to write {}: {e}", temp.display()))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            AppError::StoreError(format!("Failed to replace {}: {e}", self.path.display()))
        })?;

        tracing::debug!(path = %self.path.display(), count = listings.len(), "Snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str) -> Listing {
        Listing::new(
            id,
            format!("Listing {id}"),
            "Agency",
            "IT",
            "Open",
            format!("https://portal.test/Procurement_Details.aspx?id={id}"),
        )
    }

    #[tokio::test]
    async fn missing_file_is_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_preserves_order_and_description() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("nested/data/state.json"));
        let snapshot = vec![
            listing("2"),
            listing("1").with_description(Some("Scope of work".into())),
        ];

        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), snapshot);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("state.json"));

        store.save(&[listing("1"), listing("2")]).await.unwrap();
        store.save(&[]).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_records_without_description_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"[{"id":"7","title":"T","agency":"A","category":"IT","status":"Open","detail_url":"u"}]"#,
        )
        .unwrap();

        let loaded = JsonSnapshotStore::new(&path).load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].description, None);
    }

    #[tokio::test]
    async fn corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonSnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, AppError::StoreError(_)));
    }
}
