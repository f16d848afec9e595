//! Login environment probe and shell resolution.
//!
//! Commands spawned into a PTY need the user's full login environment so
//! that tools installed via shell profiles are resolvable. The probe runs
//! the user's shell as an interactive login shell printing `env`, once per
//! process, with a bounded timeout; on failure it falls back to the
//! ambient environment with `PATH` augmented by common install locations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::OnceCell;

/// How long the login-shell probe may run before falling back.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Common installation directories appended to `PATH` when the probe
/// fails. Relative entries are resolved against the home directory.
const FALLBACK_PATH_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/opt/homebrew/bin",
    "/usr/bin",
    "/bin",
    "~/.local/bin",
    "~/.cargo/bin",
];

/// Lazily-computed, cached login environment.
#[derive(Default)]
pub struct EnvironmentProbe {
    login_env: OnceCell<HashMap<String, String>>,
}

impl EnvironmentProbe {
    /// Creates a new probe with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the full login environment, probing on first use.
    ///
    /// Probe failures are recovered locally via the fallback path list and
    /// never surfaced to the caller.
    pub async fn login_environment(&self) -> &HashMap<String, String> {
        self.login_env
            .get_or_init(|| async {
                match probe_login_environment().await {
                    Ok(env) => {
                        tracing::info!(vars = env.len(), "captured login environment");
                        env
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "login environment probe failed, using fallback");
                        fallback_environment()
                    }
                }
            })
            .await
    }

    /// Builds the environment for a session: the login environment with
    /// per-session overrides (`PWD`, `HOME`) applied on top.
    pub async fn session_environment(&self, cwd: &Path) -> Vec<(String, String)> {
        let mut env: HashMap<String, String> = self.login_environment().await.clone();

        env.insert("PWD".to_string(), cwd.to_string_lossy().into_owned());
        if let Some(home) = dirs::home_dir() {
            env.insert("HOME".to_string(), home.to_string_lossy().into_owned());
        }

        env.into_iter().collect()
    }
}

/// Runs the user's shell as an interactive login shell and captures its
/// environment.
async fn probe_login_environment() -> anyhow::Result<HashMap<String, String>> {
    let shell = default_shell();

    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        tokio::process::Command::new(&shell)
            .args(["-i", "-l", "-c", "env"])
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("probe timed out after {PROBE_TIMEOUT:?}"))??;

    if !output.status.success() {
        anyhow::bail!("{shell} exited with {:?}", output.status.code());
    }

    let env = parse_env_output(&String::from_utf8_lossy(&output.stdout));
    if env.is_empty() {
        anyhow::bail!("{shell} produced no environment entries");
    }

    Ok(env)
}

/// Parses `KEY=VALUE` lines. Continuation lines of multi-line values are
/// skipped; sessions never depend on those.
fn parse_env_output(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// The ambient environment with `PATH` augmented by common installation
/// directories, deduplicated in order.
fn fallback_environment() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    let home = dirs::home_dir();
    let existing = env.get("PATH").cloned().unwrap_or_default();

    let mut entries: Vec<String> = Vec::new();
    for dir in existing.split(':').filter(|d| !d.is_empty()) {
        entries.push(dir.to_string());
    }
    for dir in FALLBACK_PATH_DIRS {
        let resolved = match (dir.strip_prefix("~/"), &home) {
            (Some(rest), Some(home)) => home.join(rest).to_string_lossy().into_owned(),
            (Some(_), None) => continue,
            (None, _) => (*dir).to_string(),
        };
        entries.push(resolved);
    }
    // Order-preserving dedup.
    let mut seen = std::collections::HashSet::new();
    entries.retain(|entry| seen.insert(entry.clone()));

    env.insert("PATH".to_string(), entries.join(":"));
    env
}

/// Resolves a requested working directory, substituting the home
/// directory when the request is missing, does not exist, or is not a
/// directory.
pub fn resolve_cwd(requested: Option<&Path>) -> PathBuf {
    match requested {
        Some(path) if path.is_dir() => path.to_path_buf(),
        Some(path) => {
            tracing::debug!(requested = %path.display(), "cwd invalid, falling back to home");
            home_or_root()
        }
        None => home_or_root(),
    }
}

fn home_or_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

/// Resolves the user's preferred interactive shell.
///
/// Preference order: `$SHELL`, the passwd entry, `/bin/sh`. Candidates
/// that do not resolve to an executable are skipped.
#[cfg(unix)]
pub fn default_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() && which::which(&shell).is_ok() {
            return shell;
        }
    }

    if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::getuid()) {
        let shell = user.shell.to_string_lossy().into_owned();
        if !shell.is_empty() && which::which(&shell).is_ok() {
            return shell;
        }
    }

    "/bin/sh".to_string()
}

/// Resolves the default command interpreter on Windows.
#[cfg(windows)]
pub fn default_shell() -> String {
    std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
}
