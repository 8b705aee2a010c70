//! Atomic replace-on-write for the shared knowledge files.
//!
//! The active-model file and the command file are single-writer /
//! single-reader across process boundaries. Writes go to a temp path in
//! the same directory followed by a rename, so a reader never observes a
//! half-written file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = Path::new(&tmp);

    let mut file = File::create(tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp_path, path)
}

/// Read a single-line token file. Returns `None` when the file is absent.
pub fn read_token(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let token = contents.trim().to_string();
            if token.is_empty() {
                Ok(None)
            } else {
                Ok(Some(token))
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read and consume a single-line token file: the file is removed once
/// read, so a command is picked up at most once.
pub fn take_token(path: &Path) -> io::Result<Option<String>> {
    let token = read_token(path)?;
    if token.is_some() {
        match fs::remove_file(path) {
            Ok(()) => {}
            // Writer replaced it between read and remove; next poll gets it.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(token)
}
