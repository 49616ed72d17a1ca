use std::io::Write;
use std::path::{Path, PathBuf};

/// Root directory for dayglance state (`$DAYGLANCE_HOME`, else `~/.dayglance`).
pub fn app_dir() -> PathBuf {
    if let Some(custom) = std::env::var_os("DAYGLANCE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(custom);
    }
    dirs::home_dir().unwrap_or_default().join(".dayglance")
}

/// Write `content` to `path` atomically: temp file in the same directory,
/// fsync, then rename over the target.
pub fn atomic_write_str(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.exists() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Escape text for interpolation into HTML bodies.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
