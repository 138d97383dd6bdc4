use std::io;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Append-only per-job text log under a directory, one `<job_id>.log` each.
///
/// Only the worker holding a job in `processing` writes to its log, so there
/// is never more than one writing process per file.
#[derive(Debug, Clone)]
pub struct JobLog {
    dir: PathBuf,
}

impl JobLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        let name: String = job_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = name.trim_start_matches('.');
        self.dir.join(format!("{name}.log"))
    }

    pub async fn append(&self, job_id: &str, bytes: impl AsRef<[u8]>) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(job_id))
            .await?;
        file.write_all(bytes.as_ref()).await?;
        file.flush().await
    }

    /// Whole log, or `None` if the job never wrote anything.
    pub async fn read(&self, job_id: &str) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(job_id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_never_leaves_the_log_dir() {
        let log = JobLog::new("/var/qf/logs");
        assert_eq!(
            log.path_for("../../etc/passwd"),
            PathBuf::from("/var/qf/logs/_.._etc_passwd.log")
        );
        assert_eq!(log.path_for("job-1"), PathBuf::from("/var/qf/logs/job-1.log"));
    }

    #[tokio::test]
    async fn appends_accumulate() {
        let dir = std::env::temp_dir().join(format!("qf-joblog-{}", uuid::Uuid::new_v4()));
        let log = JobLog::new(&dir);

        assert!(log.read("j").await.unwrap().is_none());
        log.append("j", "one\n").await.unwrap();
        log.append("j", b"two\n").await.unwrap();

        let body = log.read("j").await.unwrap().unwrap();
        assert_eq!(String::from_utf8(body).unwrap(), "one\ntwo\n");

        let _ = std::fs::remove_dir_all(dir);
    }
}
