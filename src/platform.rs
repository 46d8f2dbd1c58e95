//! Thin OS helpers around search results: MIME lookup, open/reveal with the
//! desktop's default handler, and file details.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::mapper::classify;
use crate::models::Classification;

/// MIME type assumed when `file` cannot tell.
pub const FALLBACK_MIME: &str = "text/plain";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Opening files is not supported on {0}")]
    Unsupported(&'static str),

    #[error("Failed to run `{program}`: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}")]
    Failed {
        program: &'static str,
        status: std::process::ExitStatus,
    },

    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// MIME type of a single path, falling back to [`FALLBACK_MIME`].
pub async fn mime_type(path: &str) -> String {
    mime_types(&[path])
        .await
        .pop()
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

/// MIME types for several paths with a single `file --mime-type -b` call.
///
/// Always returns one entry per input path, in order.
pub async fn mime_types(paths: &[&str]) -> Vec<String> {
    if paths.is_empty() {
        return Vec::new();
    }

    let output = Command::new("file")
        .args(["--mime-type", "-b", "--"])
        .args(paths)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    let stdout = match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
        Err(e) => {
            debug!("`file` unavailable, assuming {}: {}", FALLBACK_MIME, e);
            String::new()
        }
    };

    let mut lines = stdout.lines().map(str::trim);
    paths
        .iter()
        .map(|_| match lines.next() {
            Some(mime) if is_mime(mime) => mime.to_string(),
            _ => FALLBACK_MIME.to_string(),
        })
        .collect()
}

/// `file` prints `cannot open ...` style diagnostics on stdout.
fn is_mime(s: &str) -> bool {
    !s.is_empty() && !s.contains(' ') && s.contains('/')
}

/// Command that opens a path or URL with the default handler.
fn opener() -> Result<&'static str, PlatformError> {
    match std::env::consts::OS {
        "linux" | "freebsd" | "openbsd" | "netbsd" => Ok("xdg-open"),
        "macos" => Ok("open"),
        "windows" => Ok("explorer"),
        other => Err(PlatformError::Unsupported(other)),
    }
}

/// Open `target` with the desktop's default application.
pub async fn open_target(target: &str) -> Result<(), PlatformError> {
    let program = opener()?;
    debug!("Opening {} with {}", target, program);

    let status = Command::new(program)
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| PlatformError::Spawn { program, source })?;

    // explorer reports failure even when it opened the window
    if !status.success() && program != "explorer" {
        return Err(PlatformError::Failed { program, status });
    }
    Ok(())
}

/// Directory to show for a result: the entry itself if it is a directory,
/// otherwise its parent.
pub fn reveal_dir(path: &str, mime: Option<&str>) -> String {
    if classify(mime) == Classification::Directory {
        return path.to_string();
    }
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => path.to_string(),
    }
}

/// Show `path` in the file manager.
pub async fn reveal_target(path: &str, mime: Option<&str>) -> Result<(), PlatformError> {
    open_target(&reveal_dir(path, mime)).await
}

/// Expand a leading `~` or `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => Some(""),
        Some(rest) if rest.starts_with('/') => Some(&rest[1..]),
        _ => None,
    };
    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Metadata shown for a file result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDetails {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<DateTime<Local>>,
    pub created: Option<DateTime<Local>>,
    /// Unix permission bits, if the platform has them.
    pub mode: Option<u32>,
}

impl FileDetails {
    /// Stat `path` without following a final symlink.
    pub async fn stat(path: &Path) -> Result<Self, PlatformError> {
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|source| PlatformError::Stat {
                path: path.to_path_buf(),
                source,
            })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        // Not every filesystem records a birth time
        let created = match meta.created() {
            Ok(time) => Some(DateTime::<Local>::from(time)),
            Err(e) => {
                debug!("No creation time for {}: {}", path.display(), e);
                None
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified: meta.modified().ok().map(DateTime::<Local>::from),
            created,
            mode: unix_mode(&meta),
        })
    }

    pub fn size_display(&self) -> String {
        format_size(self.size)
    }

    pub fn permissions_display(&self) -> String {
        match self.mode {
            Some(mode) => format_permissions(mode),
            None => "Unknown".to_string(),
        }
    }
}

#[cfg(unix)]
fn unix_mode(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode())
}

#[cfg(not(unix))]
fn unix_mode(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

/// Human-readable size with one decimal, e.g. `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// `rwxr-x---` rendering of the low nine permission bits.
pub fn format_permissions(mode: u32) -> String {
    [6u32, 3, 0]
        .into_iter()
        .flat_map(|shift| {
            let triad = (mode >> shift) & 0o7;
            [(4, 'r'), (2, 'w'), (1, 'x')]
                .into_iter()
                .map(move |(bit, c)| if triad & bit != 0 { c } else { '-' })
        })
        .collect()
}
