use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::db::StreamerRepository;
use crate::error::{AppError, AppResult};

/// Removes compressed streamer images that no streamer references any more.
pub struct ImageJanitor {
    pool: SqlitePool,
    dir: PathBuf,
}

impl ImageJanitor {
    pub fn new(pool: SqlitePool, dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            dir: dir.into(),
        }
    }

    /// Delete every file in the image directory whose name is not the file
    /// name of some streamer's `compressed_image_url`. Returns the number of
    /// removed files.
    ///
    /// Does nothing while no streamer references an image, so a directory
    /// shared with files this service never wrote is left alone.
    pub async fn cleanup_unused(&self) -> AppResult<usize> {
        let referenced: HashSet<String> = StreamerRepository::list_compressed_image_urls(&self.pool)
            .await?
            .iter()
            .filter_map(|url| file_name(url))
            .collect();
        if referenced.is_empty() {
            debug!("No streamer references a compressed image, skipping cleanup");
            return Ok(0);
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Image directory {:?} does not exist, nothing to clean", self.dir);
                return Ok(0);
            }
            Err(e) => return Err(AppError::Internal(e.into())),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Internal(e.into()))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if referenced.contains(&name) {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove unused image {:?}: {}", entry.path(), e),
            }
        }

        info!("Image cleanup: removed {} unused files", removed);
        Ok(removed)
    }
}

/// Last path segment of a stored image URL or path.
fn file_name(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
