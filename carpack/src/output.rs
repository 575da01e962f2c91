//! Output formatting for CLI commands.
//!
//! Provides abstraction layer for outputting results in text or JSON format.
//! CIDs are rendered in their string form in both.

use anyhow::Result;
use carpack_core::{Cid, DagEntry, EntryKind, PackSummary, UnpackSummary};
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Writer for command output with format abstraction.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    /// Create a new OutputWriter.
    pub fn new(json: bool) -> Self {
        Self {
            format: if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            },
        }
    }

    /// Check if JSON mode is enabled.
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Write output to stdout using the configured format.
    ///
    /// The `data` parameter must be a serializable struct that includes
    /// `success: bool` and `result_code: u8` fields.
    ///
    /// The `text_fn` closure is called only in text mode to generate the
    /// human-readable output.
    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        self.write_to(&mut io::stdout().lock(), data, text_fn)
    }

    /// Same as [`write`](Self::write), but to stderr.
    ///
    /// Used when stdout carries binary data (an archive or file content).
    pub fn write_status<T: Serialize>(
        &self,
        data: &T,
        text_fn: impl FnOnce() -> String,
    ) -> Result<()> {
        self.write_to(&mut io::stderr().lock(), data, text_fn)
    }

    fn write_to<T: Serialize>(
        &self,
        out: &mut dyn Write,
        data: &T,
        text_fn: impl FnOnce() -> String,
    ) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                writeln!(out, "{}", json)?;
            }
            OutputFormat::Text => {
                let text = text_fn();
                if !text.is_empty() {
                    write!(out, "{}", text)?;
                }
            }
        }
        Ok(())
    }

    /// Write an error message to stderr.
    ///
    /// In JSON mode, writes a JSON error object with success=false.
    /// In text mode, writes the error message directly.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        match self.format {
            OutputFormat::Json => {
                let error_output = ErrorOutput {
                    success: false,
                    result_code,
                    error: format!("{:#}", error),
                };
                if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                    let _ = writeln!(io::stderr(), "{}", json);
                }
            }
            OutputFormat::Text => {
                let _ = writeln!(io::stderr(), "Error: {:#}", error);
            }
        }
    }
}

// ============================================================================
// Data Transfer Objects (DTOs) for JSON output
// ============================================================================

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `pack` command.
#[derive(Debug, Serialize)]
pub struct PackOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub size: u64,
    pub blocks: u64,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PackOutput {
    pub fn new(summary: &PackSummary, output: Option<String>) -> Self {
        Self {
            success: true,
            result_code: 0,
            root: summary.root.to_string(),
            size: summary.size,
            blocks: summary.blocks,
            bytes: summary.bytes,
            output,
        }
    }
}

/// Output for `unpack` command.
#[derive(Debug, Serialize)]
pub struct UnpackOutput {
    pub success: bool,
    pub result_code: u8,
    pub roots: Vec<String>,
    pub destination: String,
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<EntryInfo>,
}

impl UnpackOutput {
    pub fn new(summary: UnpackSummary, destination: String) -> Self {
        Self {
            success: true,
            result_code: 0,
            roots: summary.roots.iter().map(Cid::to_string).collect(),
            destination,
            files: summary.files,
            directories: summary.directories,
            bytes: summary.bytes,
            missing: summary.missing.into_iter().map(EntryInfo::from).collect(),
        }
    }
}

/// Output for `roots` command.
#[derive(Debug, Serialize)]
pub struct RootsOutput {
    pub success: bool,
    pub result_code: u8,
    pub implicit: bool,
    pub roots: Vec<String>,
}

/// Entry information for `ls` and `unpack`.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub cid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl EntryInfo {
    /// `path`, or `cid \t size \t path` when verbose.
    ///
    /// Directories show `-` for size and missing entries `?`.
    pub fn to_line(&self, verbose: bool) -> String {
        let suffix = if self.kind == EntryKind::Missing {
            "\t(missing)"
        } else {
            ""
        };
        if !verbose {
            return format!("{}{}", self.path, suffix);
        }
        let size = match (self.kind, self.size) {
            (EntryKind::Directory, _) => "-".to_string(),
            (EntryKind::Missing, _) | (_, None) => "?".to_string(),
            (_, Some(size)) => size.to_string(),
        };
        format!("{}\t{}\t{}{}", self.cid, size, self.path, suffix)
    }
}

impl From<DagEntry> for EntryInfo {
    fn from(entry: DagEntry) -> Self {
        Self {
            path: entry.path_string(),
            kind: entry.kind,
            cid: entry.cid.to_string(),
            size: entry.size,
        }
    }
}

/// Output for `ls` command.
#[derive(Debug, Serialize)]
pub struct LsOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub entries: Vec<EntryInfo>,
}

/// Output for `blocks` command.
#[derive(Debug, Serialize)]
pub struct BlocksOutput {
    pub success: bool,
    pub result_code: u8,
    pub blocks: Vec<String>,
}

/// Output for `hash` command.
#[derive(Debug, Serialize)]
pub struct HashOutput {
    pub success: bool,
    pub result_code: u8,
    pub cid: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use carpack_core::{HashAlgorithm, compute_cid, hash::codec};

    fn entry(kind: EntryKind, size: Option<u64>) -> EntryInfo {
        EntryInfo {
            path: "./docs/a.txt".to_string(),
            kind,
            cid: compute_cid(b"a", HashAlgorithm::Sha2_256, codec::RAW).to_string(),
            size,
        }
    }

    #[test]
    fn test_plain_lines() {
        assert_eq!(entry(EntryKind::File, Some(3)).to_line(false), "./docs/a.txt");
        assert_eq!(
            entry(EntryKind::Missing, Some(3)).to_line(false),
            "./docs/a.txt\t(missing)"
        );
    }

    #[test]
    fn test_verbose_lines() {
        let file = entry(EntryKind::File, Some(3));
        assert_eq!(file.to_line(true), format!("{}\t3\t./docs/a.txt", file.cid));

        let dir = entry(EntryKind::Directory, Some(10));
        assert_eq!(dir.to_line(true), format!("{}\t-\t./docs/a.txt", dir.cid));

        let missing = entry(EntryKind::Missing, Some(3));
        assert_eq!(
            missing.to_line(true),
            format!("{}\t?\t./docs/a.txt\t(missing)", missing.cid)
        );
    }

    #[test]
    fn test_entry_json_shape() {
        let json = serde_json::to_value(entry(EntryKind::Raw, Some(1))).unwrap();
        assert_eq!(json["type"], "raw");
        assert_eq!(json["size"], 1);
        assert!(json["cid"].is_string());
    }
}
