//! Report serialization to disk.

use std::path::Path;

use thiserror::Error;

use super::Report;

/// Errors raised while writing or reading a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// On-disk report encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Yaml,
}

impl ReportFormat {
    /// YAML for `.yaml`/`.yml` paths, JSON otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => ReportFormat::Yaml,
            _ => ReportFormat::Json,
        }
    }
}

impl Report {
    /// Encodes the report in `format`.
    pub fn render(&self, format: ReportFormat) -> Result<String, ReportError> {
        Ok(match format {
            ReportFormat::Json => serde_json::to_string_pretty(self)?,
            ReportFormat::Yaml => serde_yaml::to_string(self)?,
        })
    }

    /// Writes the report, choosing the encoding from the file extension.
    ///
    /// Parent directories are created as needed.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let contents = self.render(ReportFormat::from_path(path))?;
        std::fs::write(path, contents)?;
        tracing::info!(path = %path.display(), "Report written");
        Ok(())
    }

    /// Reads a report written by [`Report::write`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Ok(match ReportFormat::from_path(path) {
            ReportFormat::Json => serde_json::from_str(&contents)?,
            ReportFormat::Yaml => serde_yaml::from_str(&contents)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample_report;
    use tempfile::TempDir;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ReportFormat::from_path(Path::new("out.yaml")), ReportFormat::Yaml);
        assert_eq!(ReportFormat::from_path(Path::new("out.YML")), ReportFormat::Yaml);
        assert_eq!(ReportFormat::from_path(Path::new("out.json")), ReportFormat::Json);
        assert_eq!(ReportFormat::from_path(Path::new("report")), ReportFormat::Json);
    }

    #[test]
    fn test_write_and_read_both_formats() {
        let dir = TempDir::new().expect("tempdir");
        let report = sample_report();

        for name in ["nested/report.json", "report.yaml"] {
            let path = dir.path().join(name);
            report.write(&path).expect("write");
            let loaded = Report::read(&path).expect("read");
            assert_eq!(loaded, report, "{}", name);
        }

        let json = std::fs::read_to_string(dir.path().join("nested/report.json")).expect("read");
        assert!(json.contains("\"kind\": \"data_unavailable\""));
    }
}
