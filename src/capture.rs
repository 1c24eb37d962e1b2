//! Screen capture sources
//!
//! Screenshots come from `grim` (wlroots compositors). When a window class is
//! configured the capture is cropped to that window, located through
//! Hyprland's `hyprctl clients -j`.

use crate::error::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;

/// Produces encoded image bytes of the current screen contents
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<Vec<u8>, AppError>;
}

/// A client entry from `hyprctl clients -j`
#[derive(Debug, Clone, Deserialize)]
struct HyprClient {
    #[serde(default)]
    class: String,
    at: [i32; 2],
    size: [i32; 2],
}

impl HyprClient {
    /// Geometry in grim's `-g` syntax: "X,Y WxH"
    fn geometry(&self) -> String {
        format!("{},{} {}x{}", self.at[0], self.at[1], self.size[0], self.size[1])
    }
}

/// Find the first client whose class contains `class` (case-insensitive)
fn find_window_geometry(clients_json: &[u8], class: &str) -> Result<Option<String>, AppError> {
    let clients: Vec<HyprClient> = serde_json::from_slice(clients_json)
        .map_err(|e| AppError::Capture(format!("Unreadable hyprctl output: {}", e)))?;

    let needle = class.to_lowercase();
    Ok(clients
        .iter()
        .find(|c| c.class.to_lowercase().contains(&needle) && c.size[0] > 0 && c.size[1] > 0)
        .map(HyprClient::geometry))
}

/// Run a command to completion before `deadline`, returning stdout
async fn run_bounded(command: &mut Command, deadline: Instant) -> Result<Vec<u8>, AppError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout_at(deadline, command.output())
        .await
        .map_err(|_| AppError::Capture(format!("{:?} missed the capture deadline", command)))?
        .map_err(|e| AppError::Capture(format!("Failed to run {:?}: {}", command, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Capture(format!(
            "{:?} exited with {}: {}",
            command,
            output.status,
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}

/// Screenshots via `grim -t png -`
pub struct GrimFrameSource {
    grim_path: String,
    window_class: Option<String>,
    timeout: Duration,
}

impl GrimFrameSource {
    pub fn new(grim_path: String, window_class: Option<String>, timeout: Duration) -> Self {
        Self {
            grim_path,
            window_class,
            timeout,
        }
    }

    async fn window_geometry(&self, class: &str, deadline: Instant) -> Result<String, AppError> {
        let mut command = Command::new("hyprctl");
        command.args(["clients", "-j"]);
        let clients = run_bounded(&mut command, deadline).await?;

        find_window_geometry(&clients, class)?
            .ok_or_else(|| AppError::Capture(format!("no window with class matching {:?}", class)))
    }
}

#[async_trait]
impl FrameSource for GrimFrameSource {
    async fn capture(&self) -> Result<Vec<u8>, AppError> {
        let deadline = Instant::now() + self.timeout;
        let mut command = Command::new(&self.grim_path);

        if let Some(class) = &self.window_class {
            let geometry = self.window_geometry(class, deadline).await?;
            command.arg("-g").arg(geometry);
        }

        command.args(["-t", "png", "-"]);

        let bytes = run_bounded(&mut command, deadline).await?;
        if bytes.is_empty() {
            return Err(AppError::Capture("grim produced no output".into()));
        }

        Ok(bytes)
    }
}
