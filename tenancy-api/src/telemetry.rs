//! Global tracing subscriber setup.
//!
//! Driven by `RUST_LOG` (falling back to `LOG_LEVEL`), `LOG_FORMAT`
//! (`human` or `json`), `LOG_OUTPUT` (`console`, `file` or `both`) and
//! `LOG_FILE_PATH`. File output rotates daily.

use std::env;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    prelude::*,
    registry, EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from any variable source. Unknown values fall back to
    /// the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };
        let output = match lookup("LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Console,
        };

        Self {
            level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format,
            output,
            file_path: lookup("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("tenancy-api.log")),
        }
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process or buffered file output is lost.
pub fn init_tracing(settings: &LogSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))?
        .add_directive("hyper=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    let (writer, guard) = match settings.output {
        LogOutput::Console => (BoxMakeWriter::new(std::io::stdout), None),
        LogOutput::File => {
            let (file, guard) = rolling_file(&settings.file_path);
            (BoxMakeWriter::new(file), Some(guard))
        }
        LogOutput::Both => {
            let (file, guard) = rolling_file(&settings.file_path);
            (BoxMakeWriter::new(std::io::stdout.and(file)), Some(guard))
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(writer);
    let fmt_layer = match settings.format {
        LogFormat::Json => fmt_layer.json().boxed(),
        LogFormat::Human => fmt_layer.boxed(),
    };

    registry().with(env_filter).with(fmt_layer).try_init()?;

    Ok(guard)
}

fn rolling_file(path: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| "tenancy-api.log".as_ref());

    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_environment() {
        let settings = LogSettings::from_lookup(|_| None);

        assert_eq!(settings.level, "info");
        assert_eq!(settings.format, LogFormat::Human);
        assert_eq!(settings.output, LogOutput::Console);
        assert!(settings.file_path.ends_with("tenancy-api.log"));
    }

    #[test]
    fn test_reads_format_output_and_path() {
        let vars: HashMap<&str, &str> = [
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "json"),
            ("LOG_OUTPUT", "both"),
            ("LOG_FILE_PATH", "/var/log/tenancy/api.log"),
        ]
        .into_iter()
        .collect();

        let settings = LogSettings::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(settings.level, "debug");
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.output, LogOutput::Both);
        assert_eq!(settings.file_path, PathBuf::from("/var/log/tenancy/api.log"));
    }
}
