use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Error types for durable state stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Store quota exceeded: {needed} bytes needed, {available} available")]
	QuotaExceeded { needed: usize, available: usize },

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Key-value store for serialized synchronizer states
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
	async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// File-based implementation of StateStore: one JSON file per key
pub struct FileStateStore {
	data_dir: PathBuf,
}

impl FileStateStore {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_state_filename(&self, key: &str) -> PathBuf {
		self.data_dir
			.join(format!("acs_state_{}.json", hex::encode(key.as_bytes())))
	}
}

#[async_trait::async_trait]
impl StateStore for FileStateStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		let filename = self.get_state_filename(key);
		match tokio::fs::read_to_string(&filename).await {
			Ok(contents) => {
				debug!("Loaded state from {:?}", filename);
				Ok(Some(contents))
			}
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;
		let filename = self.get_state_filename(key);
		tokio::fs::write(&filename, value).await?;
		info!("Saved state to {:?}", filename);
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), StoreError> {
		match tokio::fs::remove_file(self.get_state_filename(key)).await {
			Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
			_ => Ok(()),
		}
	}
}

/// In-memory implementation of StateStore with an optional byte quota
#[derive(Default)]
pub struct MemoryStateStore {
	entries: Mutex<HashMap<String, String>>,
	quota_bytes: Option<usize>,
}

impl MemoryStateStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_quota(quota_bytes: usize) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			quota_bytes: Some(quota_bytes),
		}
	}

	pub fn len(&self) -> usize {
		self.entries
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self
			.entries
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(key)
			.cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
		if let Some(quota) = self.quota_bytes {
			// The entry being replaced frees its space.
			let used: usize = entries
				.iter()
				.filter(|(k, _)| k.as_str() != key)
				.map(|(k, v)| k.len() + v.len())
				.sum();
			let needed = key.len() + value.len();
			let available = quota.saturating_sub(used);
			if needed > available {
				return Err(StoreError::QuotaExceeded { needed, available });
			}
		}
		entries.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.entries
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(key);
		Ok(())
	}
}
