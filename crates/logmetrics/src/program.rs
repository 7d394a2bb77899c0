//! Metric programs.
//!
//! A program is a JSON file in the program directory:
//!
//! ```json
//! {
//!   "metrics": [
//!     {
//!       "name": "caching_requests_total",
//!       "kind": "counter",
//!       "pattern": "Request by (?P<client>\\S+)",
//!       "labels": ["client"]
//!     },
//!     {
//!       "name": "caching_last_request_bytes",
//!       "kind": "gauge",
//!       "pattern": "served (?P<bytes>\\d+) bytes",
//!       "value": "bytes"
//!     }
//!   ]
//! }
//! ```
//!
//! Labels and the optional value name capture groups of the pattern. A
//! counter adds the captured value (1 when no value capture is given) for
//! every matching line; a gauge is set to it.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metric::MetricKind;

const PROGRAM_EXTENSION: &str = "json";

#[derive(Debug, Deserialize)]
struct ProgramFile {
    metrics: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    name: String,
    kind: MetricKind,
    pattern: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    value: Option<String>,
}

/// One metric update rule.
#[derive(Debug)]
pub struct Rule {
    pub name: String,
    pub kind: MetricKind,
    pub labels: Vec<String>,
    regex: Regex,
    value: Option<String>,
}

/// Result of applying a rule to a line.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    /// Label values, in the rule's label order.
    pub values: Vec<String>,
    pub amount: f64,
}

impl Rule {
    fn compile(program: &str, spec: RuleSpec) -> Result<Self> {
        if matches!(spec.kind, MetricKind::Other(_)) {
            return Err(Error::program(
                program,
                format!("metric {} has unsupported kind {}", spec.name, spec.kind),
            ));
        }

        let regex = Regex::new(&spec.pattern).map_err(|source| Error::Pattern {
            program: program.to_string(),
            metric: spec.name.clone(),
            source,
        })?;

        let captures: Vec<&str> = regex.capture_names().flatten().collect();
        for name in spec.labels.iter().chain(spec.value.iter()) {
            if !captures.contains(&name.as_str()) {
                return Err(Error::program(
                    program,
                    format!("metric {} references unknown capture {}", spec.name, name),
                ));
            }
        }

        if spec.kind == MetricKind::Gauge && spec.value.is_none() {
            return Err(Error::program(
                program,
                format!("gauge {} needs a value capture", spec.name),
            ));
        }

        Ok(Self {
            name: spec.name,
            kind: spec.kind,
            labels: spec.labels,
            regex,
            value: spec.value,
        })
    }

    /// Match a line. Lines whose value capture is not a finite number do not
    /// match.
    pub fn apply(&self, line: &str) -> Option<RuleMatch> {
        let caps = self.regex.captures(line)?;

        let values = self
            .labels
            .iter()
            .map(|label| {
                caps.name(label)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            })
            .collect();

        let amount = match &self.value {
            Some(capture) => {
                let raw = caps.name(capture)?.as_str();
                match raw.parse::<f64>() {
                    Ok(v) if v.is_finite() => v,
                    _ => {
                        debug!(metric = %self.name, value = raw, "Ignoring non-numeric capture");
                        return None;
                    }
                }
            }
            None => 1.0,
        };

        Some(RuleMatch { values, amount })
    }
}

/// A loaded program file.
#[derive(Debug)]
pub struct Program {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl Program {
    /// Parse a program from its JSON source.
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let file: ProgramFile = serde_json::from_str(source)
            .map_err(|e| Error::program(&name, format!("invalid program: {}", e)))?;

        let rules = file
            .metrics
            .into_iter()
            .map(|spec| Rule::compile(&name, spec))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { name, rules })
    }
}

/// Load every `*.json` program in `dir`, ordered by file name.
pub fn load_programs(dir: &Path) -> Result<Vec<Program>> {
    let entries = std::fs::read_dir(dir).map_err(|source| Error::ProgramDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == PROGRAM_EXTENSION)
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(Error::NoPrograms(dir.to_path_buf()));
    }

    paths
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = std::fs::read_to_string(path)?;
            Program::parse(name, &source)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = r#"{
        "metrics": [
            {"name": "requests_total", "kind": "counter",
             "pattern": "GET (?P<path>\\S+) (?P<status>\\d{3})",
             "labels": ["path", "status"]},
            {"name": "bytes_total", "kind": "counter",
             "pattern": "sent (?P<bytes>[0-9.]+) bytes", "value": "bytes"},
            {"name": "queue_depth", "kind": "gauge",
             "pattern": "queue=(?P<depth>\\S+)", "value": "depth"}
        ]
    }"#;

    #[test]
    fn test_parse_and_apply() {
        let program = Program::parse("web.json", PROGRAM).unwrap();
        assert_eq!(program.rules.len(), 3);

        let hit = program.rules[0].apply("GET /index.html 200").unwrap();
        assert_eq!(hit.values, vec!["/index.html", "200"]);
        assert_eq!(hit.amount, 1.0);

        let sent = program.rules[1].apply("sent 512.5 bytes").unwrap();
        assert!(sent.values.is_empty());
        assert_eq!(sent.amount, 512.5);

        assert!(program.rules[0].apply("POST /x 200").is_none());
    }

    #[test]
    fn test_non_numeric_value_does_not_match() {
        let program = Program::parse("web.json", PROGRAM).unwrap();
        assert!(program.rules[2].apply("queue=full").is_none());
        assert!(program.rules[2].apply("queue=inf").is_none());
        assert_eq!(program.rules[2].apply("queue=7").unwrap().amount, 7.0);
    }

    #[test]
    fn test_rejects_bad_programs() {
        let unknown_capture = r#"{"metrics": [{"name": "x", "kind": "counter",
            "pattern": "a(?P<b>.)", "labels": ["c"]}]}"#;
        assert!(matches!(
            Program::parse("p", unknown_capture),
            Err(Error::Program { .. })
        ));

        let bad_regex = r#"{"metrics": [{"name": "x", "kind": "counter", "pattern": "("}]}"#;
        assert!(matches!(
            Program::parse("p", bad_regex),
            Err(Error::Pattern { .. })
        ));

        let bad_kind = r#"{"metrics": [{"name": "x", "kind": "histogram", "pattern": "a"}]}"#;
        assert!(matches!(
            Program::parse("p", bad_kind),
            Err(Error::Program { .. })
        ));

        let gauge_without_value = r#"{"metrics": [{"name": "x", "kind": "gauge", "pattern": "a"}]}"#;
        assert!(Program::parse("p", gauge_without_value).is_err());

        assert!(Program::parse("p", "not json").is_err());
    }

    #[test]
    fn test_load_programs_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), PROGRAM).unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"metrics": [{"name": "lines_total", "kind": "counter", "pattern": ""}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let programs = load_programs(dir.path()).unwrap();
        let names: Vec<_> = programs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_load_programs_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_programs(dir.path()),
            Err(Error::NoPrograms(_))
        ));
        assert!(matches!(
            load_programs(&dir.path().join("missing")),
            Err(Error::ProgramDir { .. })
        ));
    }
}
