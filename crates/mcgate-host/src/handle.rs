//! Per-invocation files a handler reads and writes through the sandbox.

use std::fs::{self, File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use crate::cache::HandlerDescriptor;
use crate::error::{GatewayResult, io_error};
use crate::scope::handler_stem;

/// `<object dir>/<handler stem>.md`
pub fn metadata_path(object_dir: &Path, handler: &str) -> PathBuf {
    object_dir.join(format!("{}.md", handler_stem(handler)))
}

/// `<log root>/<main>/<handler stem>.log`
pub fn log_path(log_root: &Path, descriptor: &HandlerDescriptor) -> PathBuf {
    log_root
        .join(&descriptor.main)
        .join(format!("{}.log", handler_stem(&descriptor.name)))
}

/// Metadata and log files of one handler for one invocation.
///
/// Both files are closed when the handle is dropped. A failed `open` drops whatever it
/// had already opened.
#[derive(Debug)]
pub struct HandlerHandle {
    name: String,
    metadata: File,
    log: File,
}

impl HandlerHandle {
    pub fn open(
        object_dir: &Path,
        log_root: &Path,
        descriptor: &HandlerDescriptor,
    ) -> GatewayResult<Self> {
        let metadata_path = metadata_path(object_dir, &descriptor.name);
        let metadata = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&metadata_path)
            .map_err(|e| io_error(&metadata_path, e))?;

        let log_path = log_path(log_root, descriptor);
        if let Some(dir) = log_path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        }
        let log = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .map_err(|e| io_error(&log_path, e))?;

        Ok(Self {
            name: descriptor.name.clone(),
            metadata,
            log,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata_fd(&self) -> BorrowedFd<'_> {
        self.metadata.as_fd()
    }

    pub fn log_fd(&self) -> BorrowedFd<'_> {
        self.log.as_fd()
    }

    pub fn close(self) {
        tracing::trace!(handler = %self.name, "handler files closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn descriptor() -> HandlerDescriptor {
        HandlerDescriptor {
            name: "resize.mc".into(),
            main: "resize".into(),
            dependencies: vec![],
        }
    }

    #[test]
    fn opens_metadata_and_creates_log_dir() {
        let tmp = TempDir::new().unwrap();
        let objects = tmp.path().join("objects");
        fs::create_dir_all(&objects).unwrap();
        fs::write(objects.join("resize.md"), b"width=10\n").unwrap();

        let handle = HandlerHandle::open(&objects, &tmp.path().join("logs"), &descriptor()).unwrap();
        assert_eq!(handle.name(), "resize.mc");

        let mut log = File::from(handle.log_fd().try_clone_to_owned().unwrap());
        log.write_all(b"started\n").unwrap();
        handle.close();

        let log_file = tmp.path().join("logs/resize/resize.log");
        assert_eq!(fs::read_to_string(log_file).unwrap(), "started\n");
        assert_eq!(
            fs::read_to_string(objects.join("resize.md")).unwrap(),
            "width=10\n"
        );
    }

    #[test]
    fn failed_open_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("no-such-dir");
        let err = HandlerHandle::open(&missing, &tmp.path().join("logs"), &descriptor());
        assert!(err.is_err());
        assert!(!tmp.path().join("logs").exists());
    }
}
