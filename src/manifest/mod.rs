//! Manifest: the authoritative in-memory view of the LSM, periodically
//! snapshotted to `<dir>/manifest/<name>/manifest.json`.

pub mod lsm;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, tick};
use log::error;

use crate::env::file_system::FileManager;
use crate::task::TaskHandle;
use crate::Result;

pub use lsm::{Level, Lsm, LsmView, SstMeta};

const MANIFEST: &str = "manifest";

#[derive(Debug, Clone)]
pub struct ManifestOpts {
    pub dir: PathBuf,
}

/// Cloning a manifest shares the underlying runtime LSM.
#[derive(Clone)]
pub struct Manifest {
    name: String,
    lsm: Arc<Lsm>,
    opts: ManifestOpts,
}

impl Manifest {
    /// Reads the manifest snapshot at `<dir>/manifest/<name>/manifest.json`
    /// and rebuilds the runtime LSM from it (with fresh locks). A missing
    /// snapshot creates an empty tree and persists it right away.
    pub fn load(name: &str, opts: ManifestOpts) -> Result<Manifest> {
        let path = manifest_path(&opts.dir, name);
        match fs::read(&path) {
            Ok(data) => {
                let view: LsmView = serde_json::from_slice(&data)?;
                Ok(Manifest {
                    name: name.to_owned(),
                    lsm: Arc::new(Lsm::from_view(view)),
                    opts,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let manifest = Manifest {
                    name: name.to_owned(),
                    lsm: Arc::new(Lsm::new(name)),
                    opts,
                };
                manifest.snapshot()?;
                Ok(manifest)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Serializes a consistent view of the LSM and writes it out through
    /// the file manager.
    pub fn snapshot(&self) -> Result<()> {
        let view = self.lsm.to_view();
        let data = serde_json::to_vec(&view)?;
        let mut writer = FileManager::global().open_for_write(&self.path())?;
        writer.write(&data)?;
        Ok(())
    }

    /// Starts the background sync loop: one snapshot per tick, plus a
    /// final snapshot on shutdown.
    pub(crate) fn spawn_sync(&self, interval: Duration) -> Result<TaskHandle> {
        let manifest = self.clone();
        let handle = TaskHandle::spawn("manifest-sync", move |shutdown| {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(shutdown) -> _ => break,
                    recv(ticker) -> _ => {
                        if let Err(e) = manifest.snapshot() {
                            error!("manifest sync failed: {}", e);
                        }
                    }
                }
            }
            if let Err(e) = manifest.snapshot() {
                error!("final manifest sync failed: {}", e);
            }
        })?;
        Ok(handle)
    }

    pub fn lsm(&self) -> &Arc<Lsm> {
        &self.lsm
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format_db_path(&self, level: usize, id: u64) -> PathBuf {
        self.format_level_path(level).join(format!("sst-{}.db", id))
    }

    pub fn format_index_path(&self, level: usize, id: u64) -> PathBuf {
        self.format_level_path(level)
            .join(format!("sst-{}.index", id))
    }

    pub fn format_level_path(&self, level: usize) -> PathBuf {
        self.opts
            .dir
            .join(&self.name)
            .join(format!("level-{}", level))
    }

    fn path(&self) -> PathBuf {
        manifest_path(&self.opts.dir, &self.name)
    }
}

fn manifest_path(dir: &std::path::Path, name: &str) -> PathBuf {
    dir.join(MANIFEST).join(name).join("manifest.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_creates_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = Manifest::load(
            "test-db",
            ManifestOpts {
                dir: temp_dir.path().to_path_buf(),
            },
        )
        .unwrap();

        let path = temp_dir
            .path()
            .join("manifest")
            .join("test-db")
            .join("manifest.json");
        assert!(path.exists());
        assert!(manifest.lsm().get_level(0).is_some());
    }

    #[test]
    fn test_load_existing_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let opts = ManifestOpts {
            dir: temp_dir.path().to_path_buf(),
        };

        {
            let manifest = Manifest::load("reload", opts.clone()).unwrap();
            let level0 = manifest.lsm().get_level(0).unwrap();
            let id = level0.next_id();
            level0.set_sstable(
                id,
                SstMeta {
                    db_path: manifest.format_db_path(0, id),
                    index_path: manifest.format_index_path(0, id),
                    size_in_bytes: 512,
                },
            );
            manifest.snapshot().unwrap();
        }

        let manifest = Manifest::load("reload", opts).unwrap();
        let level0 = manifest.lsm().get_level(0).unwrap();
        assert_eq!(512, level0.size_in_bytes());
        assert_eq!(1, level0.tables_count());
        assert_eq!(1, level0.next_id());
    }

    #[test]
    fn test_sync_loop_persists_changes() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = Arc::new(
            Manifest::load(
                "synced",
                ManifestOpts {
                    dir: temp_dir.path().to_path_buf(),
                },
            )
            .unwrap(),
        );

        let task = manifest.spawn_sync(Duration::from_millis(10)).unwrap();
        let level0 = manifest.lsm().get_level(0).unwrap();
        for _ in 0..10 {
            let id = level0.next_id();
            level0.set_sstable(
                id,
                SstMeta {
                    db_path: PathBuf::from("dummy"),
                    index_path: PathBuf::from("dummy"),
                    size_in_bytes: 0,
                },
            );
        }
        task.stop();

        let reloaded = Manifest::load(
            "synced",
            ManifestOpts {
                dir: temp_dir.path().to_path_buf(),
            },
        )
        .unwrap();
        assert_eq!(10, reloaded.lsm().get_level(0).unwrap().tables_count());
    }

    #[test]
    fn test_path_formatters() {
        let manifest = Manifest {
            name: "fmt".to_owned(),
            lsm: Arc::new(Lsm::new("fmt")),
            opts: ManifestOpts {
                dir: PathBuf::from("/data"),
            },
        };
        assert_eq!(
            PathBuf::from("/data/fmt/level-0/sst-7.db"),
            manifest.format_db_path(0, 7)
        );
        assert_eq!(
            PathBuf::from("/data/fmt/level-2/sst-0.index"),
            manifest.format_index_path(2, 0)
        );
        assert_eq!(PathBuf::from("/data/fmt/level-1"), manifest.format_level_path(1));
    }
}
