use std::io;
use std::path::{Path, PathBuf};

/// `<dir>/<pid>.pid`, the marker `queuectl worker stop` uses to find live
/// workers.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(dir: &Path, pid: u32) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{pid}.pid"));
        std::fs::write(&path, pid.to_string())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Every readable marker in `dir` as `(path, pid)`. Unparsable files are
/// skipped.
pub fn list_pid_files(dir: &Path) -> io::Result<Vec<(PathBuf, i32)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut out = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pid") {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(pid) = raw.trim().parse::<i32>() {
            out.push((path, pid));
        }
    }
    out.sort_by_key(|(_, pid)| *pid);
    Ok(out)
}
