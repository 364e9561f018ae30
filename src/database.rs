use serde::{de::DeserializeOwned, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{fs, sync::RwLock, time};
use tracing::{debug, error, warn};

const SAVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Save of {0} timed out")]
    Timeout(String),
}

#[derive(Debug)]
struct DatabaseInner<T> {
    data: T,
    path: Option<PathBuf>,
}

/// Snapshot store: the whole state lives in memory and every committed
/// transaction rewrites one bincode file.
#[derive(Clone, Debug)]
pub struct Database<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> {
    inner: Arc<RwLock<DatabaseInner<T>>>,
}

impl<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> Database<T> {
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self, DbError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create database directory: {}", e);
                DbError::Io(e)
            })?;
        }

        let data = if path.exists() {
            match fs::read(&path).await {
                Ok(bytes) => match bincode::deserialize(&bytes) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to deserialize database {}: {}", path.display(), e);
                        T::default()
                    }
                },
                Err(e) => {
                    error!("Failed to read database {}: {}", path.display(), e);
                    T::default()
                }
            }
        } else {
            debug!("Creating empty database at {}", path.display());
            T::default()
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(DatabaseInner {
                data,
                path: Some(path),
            })),
        })
    }

    /// A database that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(DatabaseInner {
                data: T::default(),
                path: None,
            })),
        }
    }

    async fn save(path: &Path, data: &T) -> Result<(), DbError> {
        let bytes = bincode::serialize(data)?;
        let tmp = path.with_extension("tmp");

        let write = async {
            fs::write(&tmp, bytes).await?;
            fs::rename(&tmp, path).await
        };

        match time::timeout(SAVE_TIMEOUT, write).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!("Database save operation timed out");
                Err(DbError::Timeout(path.display().to_string()))
            }
        }
    }

    /// Runs `f` against a copy of the state and commits it only if both `f`
    /// and the save succeed. The write lock is held throughout, so
    /// transactions never interleave.
    pub async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<DbError>,
    {
        let mut guard = self.inner.write().await;
        let mut data = guard.data.clone();
        let result = f(&mut data)?;

        if let Some(path) = &guard.path {
            if let Err(e) = Self::save(path, &data).await {
                warn!("Discarding transaction, save failed: {}", e);
                return Err(e.into());
            }
        }

        guard.data = data;
        Ok(result)
    }

    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.inner.read().await;
        f(&guard.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Default, Clone, Debug, Serialize, Deserialize)]
    struct Counters {
        values: HashMap<u64, u32>,
    }

    #[tokio::test]
    async fn committed_transaction_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("counters.db");

        let db: Database<Counters> = Database::new(&path).await.unwrap();
        db.transaction(|data| {
            data.values.insert(7, 3);
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();

        let reopened: Database<Counters> = Database::new(&path).await.unwrap();
        assert_eq!(reopened.read(|d| d.values.get(&7).copied()).await, Some(3));
    }

    #[tokio::test]
    async fn failed_transaction_leaves_state_untouched() {
        #[derive(Debug)]
        enum Rejected {
            No,
            Db,
        }
        impl From<DbError> for Rejected {
            fn from(_: DbError) -> Self {
                Rejected::Db
            }
        }

        let db: Database<Counters> = Database::in_memory();
        let result = db
            .transaction(|data| {
                data.values.insert(1, 1);
                Err::<(), _>(Rejected::No)
            })
            .await;

        assert!(matches!(result, Err(Rejected::No)));
        assert!(db.read(|d| d.values.is_empty()).await);
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.db");
        std::fs::write(&path, b"\xff\xff\xff").unwrap();

        let db: Database<Counters> = Database::new(&path).await.unwrap();
        assert!(db.read(|d| d.values.is_empty()).await);
    }
}
