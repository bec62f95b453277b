//! CSV-to-payload conversion.
//!
//! Maps detection-export CSV rows onto API payload entries. Conversion
//! failures carry the offending file path and, when determinable, the
//! 1-based row number.

use crate::error::{RelayError, Result};
use crate::payload::{DataEntry, Detection, Incident, Ioc, Payload};
use crate::validate::validate_payload;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Converts CSV detection exports into API payloads.
#[derive(Debug, Clone)]
pub struct CsvConverter {
    input_dir: PathBuf,
    output_dir: Option<PathBuf>,
    pattern: String,
}

impl CsvConverter {
    /// Converter over the current directory with the default `*.csv` pattern.
    pub fn new() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: None,
            pattern: "*.csv".to_string(),
        }
    }

    /// Set the directory scanned by [`find_csv_files`](Self::find_csv_files).
    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = dir.into();
        self
    }

    /// Set the directory converted JSON files are written to. Defaults to
    /// each source file's own directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set the file-name pattern used when scanning the input directory.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Read a CSV file and build a validated payload from its rows.
    pub fn csv_to_payload(&self, csv_path: &Path) -> Result<Payload> {
        let mut reader = csv::Reader::from_path(csv_path).map_err(|e| RelayError::CsvConversion {
            path: csv_path.to_path_buf(),
            row: None,
            message: format!("failed to read CSV file: {e}"),
        })?;

        let headers = reader
            .headers()
            .map_err(|e| RelayError::CsvConversion {
                path: csv_path.to_path_buf(),
                row: None,
                message: format!("failed to read CSV headers: {e}"),
            })?
            .clone();

        let mut entries = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let row_number = index + 1;
            let record = record.map_err(|e| RelayError::CsvConversion {
                path: csv_path.to_path_buf(),
                row: Some(row_number),
                message: format!("error in row {row_number}: {e}"),
            })?;

            let row = Row {
                headers: &headers,
                record: &record,
            };
            let entry = row_to_entry(&row).map_err(|reason| RelayError::CsvConversion {
                path: csv_path.to_path_buf(),
                row: Some(row_number),
                message: format!("error in row {row_number}: {reason}"),
            })?;
            entries.push(entry);
        }

        let payload = Payload::new(entries);
        let raw = serde_json::to_value(&payload)?;
        if let Some(reason) = validate_payload(&raw) {
            return Err(RelayError::CsvConversion {
                path: csv_path.to_path_buf(),
                row: None,
                message: format!("payload validation failed: {reason}"),
            });
        }

        Ok(payload)
    }

    /// Convert a single CSV file to a JSON payload file.
    ///
    /// The output path defaults to the source name with a `.json` extension,
    /// placed in the configured output directory (or beside the source).
    pub fn convert_file(&self, csv_path: &Path, json_path: Option<PathBuf>) -> Result<PathBuf> {
        let json_path = json_path.unwrap_or_else(|| {
            let name = csv_path.with_extension("json");
            match (&self.output_dir, name.file_name()) {
                (Some(dir), Some(file)) => dir.join(file),
                _ => name,
            }
        });

        let payload = self.csv_to_payload(csv_path)?;

        if let Some(parent) = json_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RelayError::OutputFileWrite {
                    path: json_path.clone(),
                    source: e,
                })?;
            }
        }

        let rendered = serde_json::to_string_pretty(&payload)?;
        std::fs::write(&json_path, rendered).map_err(|e| RelayError::OutputFileWrite {
            path: json_path.clone(),
            source: e,
        })?;

        info!(from = %csv_path.display(), to = %json_path.display(), "converted CSV file");
        Ok(json_path)
    }

    /// Find CSV files matching the configured pattern in the input directory.
    pub fn find_csv_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let dir = std::fs::read_dir(&self.input_dir).map_err(|e| RelayError::InputFileRead {
            path: self.input_dir.clone(),
            source: e,
        })?;
        for entry in dir {
            let entry = entry.map_err(|e| RelayError::InputFileRead {
                path: self.input_dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| wildcard_match(&self.pattern, name))
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Convert every matching CSV in the input directory, logging and
    /// skipping files that fail.
    pub fn convert_all(&self) -> Result<Vec<PathBuf>> {
        let csv_files = self.find_csv_files()?;
        if csv_files.is_empty() {
            warn!(
                pattern = %self.pattern,
                dir = %self.input_dir.display(),
                "no CSV files matched"
            );
            return Ok(Vec::new());
        }

        let mut json_files = Vec::new();
        for csv_file in &csv_files {
            match self.convert_file(csv_file, None) {
                Ok(json_path) => json_files.push(json_path),
                Err(e) => error!(file = %csv_file.display(), error = %e, "conversion failed"),
            }
        }
        Ok(json_files)
    }
}

impl Default for CsvConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// A CSV record paired with its header row for name-based access.
struct Row<'a> {
    headers: &'a csv::StringRecord,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    /// Value of the named column, or "" when the column is absent.
    fn get(&self, name: &str) -> &str {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| self.record.get(i))
            .unwrap_or("")
            .trim()
    }
}

/// Map one CSV row to a payload entry.
fn row_to_entry(row: &Row<'_>) -> std::result::Result<DataEntry, String> {
    let entity_id = row.get("Entity ID");
    let source = row.get("Source");

    // "type:value" in Entity ID wins; otherwise fall back to the Entity
    // column and infer the type from the Source column.
    let (ioc_type, ioc_value) = match entity_id.split_once(':') {
        Some((kind, value)) => (kind.to_string(), value.to_string()),
        None => {
            let value = match row.get("Entity") {
                "" => entity_id,
                entity => entity,
            };
            let lowered = source.to_lowercase();
            let kind = if lowered.contains("ip") {
                "ip"
            } else if lowered.contains("domain") {
                "domain"
            } else if lowered.contains("hash") {
                "hash"
            } else if lowered.contains("url") {
                "url"
            } else if lowered.contains("vuln") {
                "vulnerability"
            } else {
                ""
            };
            (kind.to_string(), value.to_string())
        }
    };

    if ioc_type.is_empty() {
        return Err("IoC type is required but could not be determined".to_string());
    }
    if ioc_value.is_empty() {
        return Err("IoC value is required but missing".to_string());
    }

    let detector_type = row.get("Detectors");
    if detector_type.is_empty() {
        return Err("detection type ('Detectors' column) is required but missing".to_string());
    }

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    let comma_list = |s: &str| {
        let items: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        (!items.is_empty()).then_some(items)
    };

    let incident = {
        let incident = Incident {
            kind: non_empty(row.get("Event Source")),
            id: non_empty(row.get("Event ID")),
            name: non_empty(row.get("Event Name")),
        };
        (incident.kind.is_some() || incident.id.is_some() || incident.name.is_some())
            .then_some(incident)
    };

    Ok(DataEntry {
        ioc: Ioc {
            kind: ioc_type,
            value: ioc_value,
            source_type: non_empty(row.get("Source Type")),
            field: non_empty(row.get("Field")),
        },
        detection: Detection {
            kind: detector_type.to_string(),
            id: non_empty(row.get("Detection ID")),
            name: non_empty(row.get("Description")),
            sub_type: non_empty(row.get("Sub Type")),
        },
        timestamp: non_empty(row.get("Detection Time")),
        incident,
        mitre_codes: comma_list(row.get("Mitre Codes")),
        malwares: comma_list(row.get("Malware")),
    })
}

/// Match a file name against a `*`/`?` wildcard pattern.
pub(crate) fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((star_pi, star_ni)) = star {
            pi = star_pi + 1;
            ni = star_ni + 1;
            star = Some((star_pi, star_ni + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
