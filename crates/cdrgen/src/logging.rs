//! Log subscriber setup
//!
//! Console text when `logging.base_path` is empty, JSON lines written to
//! `<base_path>/<filename>` otherwise. The file rotates once it passes
//! `max_size_mb`, keeping `max_backups` numbered backups (`.1` newest),
//! gzipped when `compress` is set. `RUST_LOG` wins over both the
//! configured level and `--debug`.

use cdrgen_core::config::LoggingConfig;
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const BYTES_PER_MB: usize = 1024 * 1024;

fn level_name(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Size-rotated log file for the configured path and limits
fn rotating_writer(cfg: &LoggingConfig) -> FileRotate<AppendCount> {
    let path = Path::new(&cfg.base_path).join(&cfg.filename);
    // 0 keeps every backup
    let backups = match cfg.max_backups {
        0 => usize::MAX,
        n => n as usize,
    };
    let compression = if cfg.compress {
        Compression::OnRotate(0)
    } else {
        Compression::None
    };

    FileRotate::new(
        path,
        AppendCount::new(backups),
        ContentLimit::BytesSurpassed(cfg.max_size_mb.max(1) as usize * BYTES_PER_MB),
        compression,
        #[cfg(unix)]
        None,
    )
}

pub fn init(cfg: &LoggingConfig, debug: bool) -> io::Result<()> {
    let level = if debug { "debug" } else { level_name(&cfg.level) };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = if cfg.base_path.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .with_writer(Mutex::new(rotating_writer(cfg)))
            .try_init()
    };

    result.map_err(|e| io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("cdrgen-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(dir: &Path, max_backups: u32, compress: bool) -> LoggingConfig {
        LoggingConfig {
            base_path: dir.to_string_lossy().into_owned(),
            filename: "cdrgen.log".to_string(),
            max_size_mb: 1,
            max_backups,
            compress,
            ..LoggingConfig::default()
        }
    }

    /// Write a little over `mb` megabytes of JSON-sized lines
    fn fill(writer: &mut impl Write, mb: usize) {
        let line = format!("{{\"level\":\"INFO\",\"message\":\"{}\"}}\n", "x".repeat(200));
        let mut written = 0;
        while written <= mb * BYTES_PER_MB {
            writer.write_all(line.as_bytes()).unwrap();
            written += line.len();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn test_level_names() {
        assert_eq!(level_name("DEBUG"), "debug");
        assert_eq!(level_name("warning"), "warn");
        assert_eq!(level_name("error"), "error");
        assert_eq!(level_name("verbose"), "info");
    }

    #[test]
    fn test_log_rotates_past_size_limit() {
        let dir = scratch_dir("rotate");
        let mut writer = rotating_writer(&config(&dir, 2, false));

        fill(&mut writer, 1);
        fill(&mut writer, 1);
        drop(writer);

        assert!(dir.join("cdrgen.log").exists());
        assert!(dir.join("cdrgen.log.1").exists());
        // Backups are whole lines
        let backup = std::fs::read_to_string(dir.join("cdrgen.log.1")).unwrap();
        assert!(backup.ends_with("}\n"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_backups_are_capped() {
        let dir = scratch_dir("backups");
        let mut writer = rotating_writer(&config(&dir, 1, false));

        for _ in 0..4 {
            fill(&mut writer, 1);
        }
        drop(writer);

        assert!(dir.join("cdrgen.log.1").exists());
        assert!(!dir.join("cdrgen.log.2").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_compressed_backups() {
        let dir = scratch_dir("compress");
        let mut writer = rotating_writer(&config(&dir, 3, true));

        fill(&mut writer, 1);
        fill(&mut writer, 1);
        drop(writer);

        assert!(dir.join("cdrgen.log.1.gz").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
