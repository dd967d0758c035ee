//! Launching and stopping a local ChromeDriver process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::{Child, Command};
use url::Url;

use super::error::RemoteError;
use crate::wait::Deadline;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(15);
const STARTUP_POLL: Duration = Duration::from_millis(150);

/// A running ChromeDriver bound to a local port. The child is killed on drop.
#[derive(Debug)]
pub struct ChromeDriver {
    child: Child,
    base: Url,
}

impl ChromeDriver {
    /// Spawn `binary` on a free port and wait until `/status` reports ready.
    pub async fn spawn(binary: &Path) -> Result<Self, RemoteError> {
        let port = free_port()?;
        let child = Command::new(binary)
            .arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RemoteError::Driver(format!("cannot start {}: {}", binary.display(), e))
            })?;
        let base = Url::parse(&format!("http://127.0.0.1:{}/", port))
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;

        let mut driver = Self { child, base };
        driver.wait_ready().await?;
        tracing::debug!(port, "ChromeDriver ready");
        Ok(driver)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn wait_ready(&mut self) -> Result<(), RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        let status = self
            .base
            .join("status")
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let deadline = Deadline::after(STARTUP_TIMEOUT, STARTUP_POLL);
        loop {
            if let Some(exit) = self.child.try_wait()? {
                return Err(RemoteError::Driver(format!(
                    "chromedriver exited during startup ({})",
                    exit
                )));
            }
            if let Ok(resp) = http.get(status.clone()).send().await {
                if let Ok(body) = resp.json::<Value>().await {
                    if body["value"]["ready"].as_bool() == Some(true) {
                        return Ok(());
                    }
                }
            }
            if !deadline.tick().await {
                return Err(RemoteError::Driver(
                    "chromedriver did not become ready in time".into(),
                ));
            }
        }
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Failed to stop chromedriver: {}", e);
        }
    }
}

/// Ask the OS for an unused TCP port.
fn free_port() -> Result<u16, RemoteError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// A fresh Chrome profile directory under `root` for one browser attempt.
pub fn allocate_profile_dir(root: &Path) -> std::io::Result<PathBuf> {
    let stamp = chrono::Utc::now().timestamp_millis();
    let mut dir = root.join(format!("profile_{}", stamp));
    let mut n = 1;
    while dir.exists() {
        dir = root.join(format!("profile_{}_{}", stamp, n));
        n += 1;
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// `alwaysMatch` capabilities for Chrome with an isolated profile.
pub fn chrome_capabilities(profile: &Path, headless: bool) -> Value {
    let mut args = vec![
        "--window-size=1366,900".to_string(),
        "--disable-extensions".to_string(),
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--blink-settings=imagesEnabled=false".to_string(),
        format!("--user-data-dir={}", profile.display()),
    ];
    if headless {
        args.insert(0, "--headless=new".to_string());
    }
    json!({
        "browserName": "chrome",
        "pageLoadStrategy": "normal",
        "goog:chromeOptions": {
            "args": args,
            "excludeSwitches": ["enable-automation"],
        },
    })
}
