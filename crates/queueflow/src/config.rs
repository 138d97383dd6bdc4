use std::path::PathBuf;

// Process-level configuration, loaded from the environment (and `.env`).
// Queue tunables (retries, backoff, poll interval) live in the settings table
// instead, so every worker sharing the store sees the same values.
#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub database_url: String,
    pub log_dir: PathBuf,
    pub pid_dir: PathBuf,
    pub worker_bin: Option<PathBuf>,
    pub admin_addr: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let data_dir = env_nonempty("QUEUEFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));

        let database_url = env_nonempty("DATABASE_URL")
            .unwrap_or_else(|| format!("sqlite://{}", data_dir.join("queue.db").display()));

        if !database_url.starts_with("sqlite:") {
            anyhow::bail!("DATABASE_URL must be a sqlite: url, got {database_url}");
        }

        let log_dir = env_nonempty("QUEUEFLOW_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));

        let pid_dir = env_nonempty("QUEUEFLOW_PID_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("workers"));

        let worker_bin = env_nonempty("QUEUEFLOW_WORKER_BIN").map(PathBuf::from);

        let admin_addr =
            env_nonempty("QUEUEFLOW_ADMIN_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());

        Ok(Self {
            data_dir,
            database_url,
            log_dir,
            pid_dir,
            worker_bin,
            admin_addr,
        })
    }

    /// Config rooted at `data_dir` with every path derived from it.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_url: format!("sqlite://{}", data_dir.join("queue.db").display()),
            log_dir: data_dir.join("logs"),
            pid_dir: data_dir.join("workers"),
            worker_bin: None,
            admin_addr: "127.0.0.1:8080".to_string(),
            data_dir,
        }
    }

    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        for dir in [&self.data_dir, &self.log_dir, &self.pid_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", dir.display()))?;
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "QUEUEFLOW_DATA_DIR",
            "DATABASE_URL",
            "QUEUEFLOW_LOG_DIR",
            "QUEUEFLOW_PID_DIR",
            "QUEUEFLOW_WORKER_BIN",
            "QUEUEFLOW_ADMIN_ADDR",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn paths_derive_from_data_dir() {
        clear_env();
        std::env::set_var("QUEUEFLOW_DATA_DIR", "/tmp/qf-data");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.database_url, "sqlite:///tmp/qf-data/queue.db");
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp/qf-data/logs"));
        assert_eq!(cfg.pid_dir, PathBuf::from("/tmp/qf-data/workers"));
        assert!(cfg.worker_bin.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn blank_values_count_as_unset() {
        clear_env();
        std::env::set_var("QUEUEFLOW_DATA_DIR", "   ");
        std::env::set_var("QUEUEFLOW_WORKER_BIN", "");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert!(cfg.worker_bin.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_non_sqlite_database_url() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/queue");

        assert!(Config::from_env().is_err());

        clear_env();
    }
}
