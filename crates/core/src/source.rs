//! Reading task payloads from a file.

use std::path::Path;
use serde_json::Value;

/// Errors raised while loading a task source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// I/O error
    #[error("cannot read task file {path}: {source}")]
    Io {
        /// File that failed to read
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Structured file did not hold a list
    #[error("task file {path} must contain a list: {source}")]
    Format {
        /// Offending file
        path: String,
        /// Parser error
        source: serde_yaml::Error,
    },
}

/// Parse newline-delimited literal values, one payload per line.
///
/// Each line is read as a YAML flow value, so `1` becomes a number and
/// `[1, 2]` a list. Lines that do not parse are kept as strings. Blank
/// lines are skipped.
pub fn parse_task_lines(text: &str) -> Vec<Value> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_yaml::from_str::<Value>(line).unwrap_or_else(|_| Value::String(line.to_string()))
        })
        .collect()
}

/// Load task payloads from a file.
///
/// `.yaml`, `.yml` and `.json` files hold a top-level list; anything else
/// is read line by line with [`parse_task_lines`].
pub fn load_tasks(path: impl AsRef<Path>) -> Result<Vec<Value>, SourceError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let structured = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    );
    if structured {
        serde_yaml::from_str::<Vec<Value>>(&text).map_err(|source| SourceError::Format {
            path: path.display().to_string(),
            source,
        })
    } else {
        Ok(parse_task_lines(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_literal_lines() {
        let tasks = parse_task_lines("1\n2\n\n3\n");
        assert_eq!(tasks, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_parse_mixed_literals() {
        let tasks = parse_task_lines("0.5\nresnet\n[1, 2]\n{lr: 0.1}\n");
        assert_eq!(
            tasks,
            vec![json!(0.5), json!("resnet"), json!([1, 2]), json!({"lr": 0.1})]
        );
    }

    #[test]
    fn test_load_txt_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let txt = dir.path().join("tasks.txt");
        std::fs::write(&txt, "task1\ntask2\ntask3").unwrap();
        assert_eq!(
            load_tasks(&txt).unwrap(),
            vec![json!("task1"), json!("task2"), json!("task3")]
        );

        let yaml = dir.path().join("tasks.yaml");
        std::fs::write(&yaml, "- id: 1\n  param: a\n- id: 2\n  param: b\n").unwrap();
        assert_eq!(
            load_tasks(&yaml).unwrap(),
            vec![json!({"id": 1, "param": "a"}), json!({"id": 2, "param": "b"})]
        );
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_tasks(dir.path().join("missing.txt")),
            Err(SourceError::Io { .. })
        ));

        let bad = dir.path().join("tasks.json");
        std::fs::write(&bad, "{\"not\": \"a list\"}").unwrap();
        assert!(matches!(load_tasks(&bad), Err(SourceError::Format { .. })));
    }
}
