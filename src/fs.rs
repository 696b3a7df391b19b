//! File Lifecycle primitives (§4.2): atomic write, locked file access, safe
//! recursive directory creation, transactional batch operations, and an
//! encoding-robust text read. All four are scope-bound — construct, use,
//! and the caller is responsible for `commit`/`rollback` plus `cleanup`.

use std::io::{Read, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ResourceError;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Temp-file-plus-rename(-plus-backup) atomic replacement of a target file.
///
/// `write`/`writelines`/`flush` operate incrementally on the temp file;
/// `commit` is the single atomic step (fsync, then rename over the target).
/// If the rename itself fails and a backup was taken, the backup is
/// restored so the target is never left in a half-written state.
pub struct AtomicFileWriter {
    target: PathBuf,
    backup_enabled: bool,
    temp_path: PathBuf,
    backup_path: Option<PathBuf>,
    file: Option<std::fs::File>,
    committed: bool,
}

impl AtomicFileWriter {
    /// Opens the temp file and takes a backup (if requested and the target
    /// exists). Call `write`/`flush` any number of times, then exactly one
    /// of `commit` or `rollback`.
    pub fn open(target: impl Into<PathBuf>, backup: bool) -> Result<Self, ResourceError> {
        let target = target.into();
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = parent.join(format!(".{file_name}.tmp.{}", std::process::id()));

        let mut backup_path = None;
        if backup && target.exists() {
            let bp = target.with_extension(format!(
                "{}.bak",
                target.extension().and_then(|e| e.to_str()).unwrap_or("")
            ));
            std::fs::copy(&target, &bp).map_err(|e| ResourceError::TempFileCreate(target.clone(), e))?;
            backup_path = Some(bp);
        }

        let file = std::fs::File::create(&temp_path)
            .map_err(|e| ResourceError::TempFileCreate(temp_path.clone(), e))?;

        Ok(Self {
            target,
            backup_enabled: backup,
            temp_path,
            backup_path,
            file: Some(file),
            committed: false,
        })
    }

    pub fn write(&mut self, content: &str) -> std::io::Result<()> {
        self.file_mut()?.write_all(content.as_bytes())
    }

    pub fn writelines<I, S>(&mut self, lines: I) -> std::io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.file_mut()?.write_all(line.as_ref().as_bytes())?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        let file = self.file_mut()?;
        file.flush()?;
        file.sync_all()
    }

    fn file_mut(&mut self) -> std::io::Result<&mut std::fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("AtomicFileWriter already committed"))
    }

    /// Flush, close, and atomically rename the temp file over the target.
    /// On rename failure, restores the backup (if any) and returns the
    /// underlying error.
    pub fn commit(mut self) -> Result<(), ResourceError> {
        self.flush().map_err(ResourceError::Io)?;
        self.file = None; // close before rename

        match std::fs::rename(&self.temp_path, &self.target) {
            Ok(()) => {
                debug!(target = %self.target.display(), "committed atomic write");
                self.committed = true;
                Ok(())
            }
            Err(e) => {
                if let Some(backup) = &self.backup_path {
                    if backup.exists() {
                        if std::fs::rename(backup, &self.target).is_ok() {
                            info!(target = %self.target.display(), "restored from backup after commit failure");
                        } else {
                            warn!(target = %self.target.display(), "failed to restore from backup after commit failure");
                        }
                    }
                }
                Err(ResourceError::AtomicRename(self.target.clone(), e))
            }
        }
    }

    /// Restore the backup over the target, if one was taken. A no-op when
    /// there is no backup (the target is simply left untouched).
    pub fn rollback(&mut self) -> Result<(), ResourceError> {
        self.file = None;
        if let Some(backup) = &self.backup_path {
            if backup.exists() {
                std::fs::rename(backup, &self.target)
                    .map_err(|e| ResourceError::AtomicRename(self.target.clone(), e))?;
                info!(target = %self.target.display(), "rolled back atomic write");
            }
        }
        Ok(())
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        // Cleanup removes temp and backup regardless of outcome (commit,
        // rollback, or neither having been called).
        if self.temp_path.exists() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
        if !self.committed {
            if let Some(backup) = &self.backup_path {
                if backup.exists() {
                    let _ = std::fs::remove_file(backup);
                }
            }
        } else if let Some(backup) = &self.backup_path {
            if backup.exists() {
                let _ = std::fs::remove_file(backup);
            }
        }
        let _ = self.backup_enabled; // documents intent; no further action needed
    }
}

/// A file opened under an exclusive, non-blocking advisory lock, acquired
/// by polling until it succeeds or `timeout` elapses.
///
/// The resource does not buffer: callers must `seek`/`truncate` explicitly
/// when reading and writing through it.
pub struct LockedFile {
    path: PathBuf,
    file: std::fs::File,
}

impl LockedFile {
    pub async fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, ResourceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResourceError::DirCreate(parent.to_path_buf(), e))?;
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(ResourceError::Io)?;

        let start = Instant::now();
        loop {
            match fs2::FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!(path = %path.display(), "acquired advisory lock");
                    return Ok(Self { path, file });
                }
                Err(_) if start.elapsed() < timeout => {
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(_) => {
                    return Err(ResourceError::LockTimeout {
                        path,
                        timeout_secs: timeout.as_secs_f64(),
                    });
                }
            }
        }
    }

    pub fn read(&mut self) -> std::io::Result<String> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = String::new();
        self.file.read_to_string(&mut buf)?;
        Ok(buf)
    }

    pub fn write(&mut self, content: &str) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(content.as_bytes())?;
        let pos = self.file.stream_position()?;
        self.file.set_len(pos)?;
        self.file.flush()?;
        self.file.sync_all()
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release advisory lock");
        }
    }
}

/// Walks upward from `path` collecting the non-existing prefix, then
/// creates each directory in descending order. On `cleanup_on_error`,
/// removes only the directories it created (and only while empty), never
/// touching pre-existing ones.
pub struct SafeDirectoryCreator {
    created: Vec<PathBuf>,
}

impl SafeDirectoryCreator {
    pub fn create(path: &Path, cleanup_on_error: bool) -> Result<Self, ResourceError> {
        let mut to_create = Vec::new();
        let mut current = path;
        while !current.exists() {
            to_create.push(current.to_path_buf());
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        to_create.reverse();

        let mut created = Vec::new();
        for dir in &to_create {
            match std::fs::create_dir(dir) {
                Ok(()) => {
                    created.push(dir.clone());
                    debug!(dir = %dir.display(), "created directory");
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    created.push(dir.clone());
                }
                Err(e) => {
                    let creator = Self { created };
                    if cleanup_on_error {
                        creator.cleanup();
                    }
                    return Err(ResourceError::DirCreate(dir.clone(), e));
                }
            }
        }

        Ok(Self { created })
    }

    /// Remove only the directories this call created, and only while still
    /// empty, in reverse (deepest-first) order.
    pub fn cleanup(&self) {
        for dir in self.created.iter().rev() {
            match std::fs::read_dir(dir) {
                Ok(mut entries) => {
                    if entries.next().is_none() {
                        if let Err(e) = std::fs::remove_dir(dir) {
                            warn!(dir = %dir.display(), error = %e, "failed to remove directory");
                        }
                    }
                }
                Err(_) => continue, // already gone
            }
        }
    }

    pub fn created_dirs(&self) -> &[PathBuf] {
        &self.created
    }
}

/// One reversible step in a [`BatchFileOperations`] transaction.
enum BatchOp {
    Write {
        path: PathBuf,
        content: Vec<u8>,
        backup: bool,
        prior_backup: Option<PathBuf>,
    },
    Copy {
        source: PathBuf,
        dest: PathBuf,
        backup: bool,
        prior_backup: Option<PathBuf>,
    },
    Move {
        source: PathBuf,
        dest: PathBuf,
    },
    Delete {
        path: PathBuf,
        backup_path: PathBuf,
    },
}

/// Accumulates (forward, rollback) file operations and applies them
/// all-or-nothing: if step `k` fails, steps `k-1..0` are rolled back in
/// reverse order before the error is returned.
#[derive(Default)]
pub struct BatchFileOperations {
    ops: Vec<BatchOp>,
}

impl BatchFileOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_write(&mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>, backup: bool) {
        self.ops.push(BatchOp::Write {
            path: path.into(),
            content: content.into(),
            backup,
            prior_backup: None,
        });
    }

    pub fn add_copy(&mut self, source: impl Into<PathBuf>, dest: impl Into<PathBuf>, backup: bool) {
        self.ops.push(BatchOp::Copy {
            source: source.into(),
            dest: dest.into(),
            backup,
            prior_backup: None,
        });
    }

    pub fn add_move(&mut self, source: impl Into<PathBuf>, dest: impl Into<PathBuf>) {
        self.ops.push(BatchOp::Move {
            source: source.into(),
            dest: dest.into(),
        });
    }

    pub fn add_delete(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let backup_path = path.with_extension(format!(
            "{}.bak.{}",
            path.extension().and_then(|e| e.to_str()).unwrap_or(""),
            std::process::id()
        ));
        self.ops.push(BatchOp::Delete { path, backup_path });
    }

    /// Apply every step in order. On failure at step `k`, rolls back steps
    /// `0..k` in reverse and returns the original error wrapped in
    /// [`ResourceError::BatchFailed`]. Any rollback step that itself fails
    /// is logged but does not abort the remaining rollbacks.
    pub fn commit_all(&mut self) -> Result<(), ResourceError> {
        let mut executed = 0;

        for (i, op) in self.ops.iter_mut().enumerate() {
            if let Err(e) = apply(op) {
                executed = i;
                for prior in self.ops[..executed].iter().rev() {
                    if let Err(rollback_err) = rollback(prior) {
                        warn!(error = %rollback_err, "rollback step failed, continuing");
                    }
                }
                return Err(ResourceError::BatchFailed { index: i, source: e });
            }
            executed = i + 1;
        }

        info!(steps = executed, "batch file operations committed");
        Ok(())
    }
}

fn apply(op: &mut BatchOp) -> std::io::Result<()> {
    match op {
        BatchOp::Write { path, content, backup, prior_backup } => {
            if *backup && path.exists() {
                let bp = path.with_extension(format!(
                    "{}.bak",
                    path.extension().and_then(|e| e.to_str()).unwrap_or("")
                ));
                std::fs::copy(&path, &bp)?;
                *prior_backup = Some(bp);
            }
            std::fs::write(&path, &content)
        }
        BatchOp::Copy { source, dest, backup, prior_backup } => {
            if *backup && dest.exists() {
                let bp = dest.with_extension(format!(
                    "{}.bak",
                    dest.extension().and_then(|e| e.to_str()).unwrap_or("")
                ));
                std::fs::copy(&dest, &bp)?;
                *prior_backup = Some(bp);
            }
            std::fs::copy(&source, &dest).map(|_| ())
        }
        BatchOp::Move { source, dest } => std::fs::rename(&source, &dest),
        BatchOp::Delete { path, backup_path } => {
            if path.exists() {
                std::fs::rename(&path, &backup_path)
            } else {
                Ok(())
            }
        }
    }
}

fn rollback(op: &BatchOp) -> std::io::Result<()> {
    match op {
        BatchOp::Write { path, prior_backup, .. } => {
            if let Some(bp) = prior_backup {
                std::fs::rename(bp, path)
            } else {
                match std::fs::remove_file(path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
        BatchOp::Copy { dest, prior_backup, .. } => {
            if let Some(bp) = prior_backup {
                std::fs::rename(bp, dest)
            } else {
                match std::fs::remove_file(dest) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
        BatchOp::Move { source, dest } => std::fs::rename(dest, source),
        BatchOp::Delete { path, backup_path } => {
            if backup_path.exists() {
                std::fs::rename(backup_path, path)
            } else {
                Ok(())
            }
        }
    }
}

/// UTF-8 first, then a bounded list of fallback encodings, surfacing
/// [`ResourceError::UnsupportedEncoding`] only when every encoding fails.
pub fn safe_read_text(path: &Path) -> Result<String, ResourceError> {
    let bytes = std::fs::read(path).map_err(ResourceError::Io)?;

    if let Ok(s) = String::from_utf8(bytes.clone()) {
        return Ok(s);
    }
    // latin-1: every byte maps directly onto the same Unicode code point.
    let latin1: String = bytes.iter().map(|&b| b as char).collect();
    if !latin1.is_empty() {
        return Ok(latin1);
    }
    // cp1252 (Windows-1252): identical to latin-1 outside the 0x80-0x9F
    // control range, which maps to a handful of printable characters.
    let cp1252: String = bytes.iter().map(|&b| decode_cp1252_byte(b)).collect();
    if !cp1252.is_empty() {
        return Ok(cp1252);
    }

    Err(ResourceError::UnsupportedEncoding(path.to_path_buf()))
}

fn decode_cp1252_byte(b: u8) -> char {
    match b {
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        other => other as char,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_commit_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.txt");
        std::fs::write(&target, "A").unwrap();

        let mut writer = AtomicFileWriter::open(&target, true).unwrap();
        writer.write("B").unwrap();
        writer.commit().unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "B");
        assert!(!dir.path().join("file.bak").exists());
    }

    #[test]
    fn atomic_write_rollback_restores_original() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.txt");
        std::fs::write(&target, "A").unwrap();

        let mut writer = AtomicFileWriter::open(&target, true).unwrap();
        writer.write("B").unwrap();
        writer.rollback().unwrap();
        drop(writer);

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "A");
        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 1); // only file.txt remains
    }

    #[test]
    fn atomic_write_idempotent_at_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.txt");

        let mut writer = AtomicFileWriter::open(&target, false).unwrap();
        writer.write("C").unwrap();
        writer.commit().unwrap();

        let mut writer = AtomicFileWriter::open(&target, false).unwrap();
        writer.write("C").unwrap();
        writer.commit().unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "C");
    }

    #[tokio::test]
    async fn locked_file_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.txt");

        let mut locked = LockedFile::acquire(&path, Duration::from_secs(1)).await.unwrap();
        locked.write("hello").unwrap();
        assert_eq!(locked.read().unwrap(), "hello");
    }

    #[test]
    fn safe_directory_creator_tracks_only_new_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("c");

        let creator = SafeDirectoryCreator::create(&nested, true).unwrap();
        assert!(nested.exists());
        assert_eq!(creator.created_dirs().len(), 3);

        creator.cleanup();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn safe_directory_creator_never_removes_preexisting() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("existing");
        std::fs::create_dir(&existing).unwrap();
        let nested = existing.join("new");

        let creator = SafeDirectoryCreator::create(&nested, true).unwrap();
        creator.cleanup();

        assert!(existing.exists());
        assert!(!nested.exists());
    }

    #[test]
    fn batch_operations_roll_back_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let missing_source = dir.path().join("does-not-exist.txt");
        let dest = dir.path().join("dest.txt");

        let mut batch = BatchFileOperations::new();
        batch.add_write(&a, b"hello".to_vec(), false);
        batch.add_move(&missing_source, &dest);

        let err = batch.commit_all().unwrap_err();
        assert!(matches!(err, ResourceError::BatchFailed { index: 1, .. }));
        // first op's effect must have been rolled back
        assert!(!a.exists());
    }

    #[test]
    fn batch_operations_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");

        let mut batch = BatchFileOperations::new();
        batch.add_write(&a, b"one".to_vec(), false);
        batch.add_write(&b, b"two".to_vec(), false);
        batch.commit_all().unwrap();

        assert_eq!(std::fs::read_to_string(&a).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "two");
    }

    #[test]
    fn safe_read_text_handles_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, [0xE9, 0x20, 0x41]).unwrap(); // é A in latin-1
        let text = safe_read_text(&path).unwrap();
        assert!(text.contains('A'));
    }
}
