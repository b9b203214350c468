//! CPE credential scraper invocation.
//!
//! The scraper is an external process that logs into a customer ONT through
//! its public URL and writes what it finds to a JSON side-file. Invocation
//! is failure-sensitive: the working directory must exist, stale side-files
//! from earlier runs must be gone before the spawn (a leftover file would
//! read as a fresh result), and the run is bounded by a timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use ontconf::ScraperConfig;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::CoreError;

/// Side-files the scraper may produce, read back in priority order.
const RESULT_FILES: &[&str] = &["wifi_credentials.json", "ont_result.json", "scrape_output.json"];

/// What the scraper recovered from the ONT.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WifiCredentials {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub security: String,
    #[serde(default)]
    pub encryption: String,
    #[serde(default)]
    pub authentication: String,
    #[serde(default)]
    pub ont_model: String,
}

pub struct ScraperInvoker {
    config: ScraperConfig,
    /// Debug mode passes `--debug` through, which the scraper maps to a
    /// non-headless browser session.
    debug: bool,
}

impl ScraperInvoker {
    pub fn new(config: ScraperConfig, debug: bool) -> Self {
        Self { config, debug }
    }

    /// Run the scraper against one ONT and read back its result file.
    pub async fn fetch(
        &self,
        ont_url: &str,
        username: &str,
        password: &str,
    ) -> Result<WifiCredentials, CoreError> {
        if ont_url.trim().is_empty() {
            return Err(CoreError::InvalidArgument("ONT URL must not be empty".into()));
        }

        self.prepare_workdir()?;

        let mut command = Command::new(&self.config.binary);
        command
            .arg(ont_url)
            .arg(username)
            .arg(password)
            .current_dir(&self.config.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.debug {
            command.arg("--debug");
        }

        debug!(binary = %self.config.binary.display(), ont_url, "spawning scraper");
        let run = async {
            let output = command.output().await.map_err(|e| {
                CoreError::Internal(format!(
                    "failed to spawn scraper {}: {e}",
                    self.config.binary.display()
                ))
            })?;
            Ok::<_, CoreError>(output)
        };
        let output = timeout(self.timeout(), run).await.map_err(|_| CoreError::Timeout {
            router: ont_url.to_string(),
            message: format!("scraper exceeded {}s", self.timeout().as_secs()),
        })??;

        // Combined output is operator-level debugging material only.
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        debug!(exit = ?output.status.code(), output = %combined.trim(), "scraper finished");
        if !output.status.success() {
            warn!(exit = ?output.status.code(), "scraper exited non-zero");
        }

        self.read_result(ont_url)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Create the working directory and remove side-files from prior runs.
    fn prepare_workdir(&self) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.config.workdir).map_err(|e| {
            CoreError::Internal(format!(
                "failed to create scraper workdir {}: {e}",
                self.config.workdir.display()
            ))
        })?;
        for name in RESULT_FILES {
            let path = self.config.workdir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(file = %path.display(), "removed stale scraper result"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CoreError::Internal(format!(
                        "failed to remove stale result {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Read the first result file present, in priority order.
    fn read_result(&self, ont_url: &str) -> Result<WifiCredentials, CoreError> {
        for name in RESULT_FILES {
            let path: PathBuf = self.config.workdir.join(name);
            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(CoreError::Internal(format!(
                        "failed to read scraper result {}: {e}",
                        path.display()
                    )))
                }
            };
            return serde_json::from_str(&contents).map_err(|e| CoreError::ProtocolError {
                router: ont_url.to_string(),
                message: format!("scraper result {} is not valid JSON: {e}", path.display()),
            });
        }
        Err(CoreError::NotFound(format!(
            "scraper produced no result file for {ont_url}"
        )))
    }
}

impl std::fmt::Debug for ScraperInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperInvoker")
            .field("binary", &self.config.binary)
            .field("debug", &self.debug)
            .finish()
    }
}
