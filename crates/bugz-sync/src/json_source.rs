use bugz_core::{BugSource, RemoteBug, SourceError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Bug source backed by a directory of tracker dumps, one `<id>.json` per bug.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dump_path(&self, bug_id: &str) -> Result<PathBuf, SourceError> {
        if bug_id.is_empty() || !bug_id.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(SourceError::Malformed {
                bug_id: bug_id.to_string(),
                reason: "bug ids are alphanumeric".to_string(),
            });
        }
        Ok(self.root.join(format!("{bug_id}.json")))
    }
}

impl BugSource for JsonDirSource {
    fn fetch(&self, bug_id: &str) -> Result<RemoteBug, SourceError> {
        let path = self.dump_path(bug_id)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound(bug_id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        let bug: RemoteBug =
            serde_json::from_str(&text).map_err(|err| SourceError::Malformed {
                bug_id: bug_id.to_string(),
                reason: err.to_string(),
            })?;
        if bug.id != bug_id {
            return Err(SourceError::Malformed {
                bug_id: bug_id.to_string(),
                reason: format!("dump {} holds bug {}", path.display(), bug.id),
            });
        }
        Ok(bug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"{
        "id": "2060010",
        "title": "jammy/linux: 5.15.0-105.115 -proposed tracker",
        "owner": { "name": "ubuntu-kernel-bot" },
        "tags": ["kernel-sru-cycle-2024.03.25-2"],
        "activity": [
            {
                "what_changed": "kernel-sru-workflow/prepare-package: status",
                "new_value": "In Progress",
                "date_changed": "2024-03-26T08:00:00Z"
            }
        ]
    }"#;

    #[test]
    fn reads_a_dump_by_bug_id() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("2060010.json"), MINIMAL).expect("write dump");

        let source = JsonDirSource::new(dir.path());
        let bug = source.fetch("2060010").expect("fetch");
        assert_eq!(bug.owner.name, "ubuntu-kernel-bot");
        assert_eq!(bug.owner.display_name, "");
        assert_eq!(bug.tags.len(), 1);
        assert_eq!(bug.activity.len(), 1);
        assert!(bug.tasks.is_empty());
        assert_eq!(bug.date_created, None);
    }

    #[test]
    fn missing_dump_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let source = JsonDirSource::new(dir.path());
        assert!(matches!(
            source.fetch("42"),
            Err(SourceError::NotFound(id)) if id == "42"
        ));
    }

    #[test]
    fn broken_or_mismatched_dumps_are_malformed() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("1.json"), "{ not json").expect("write dump");
        fs::write(dir.path().join("2.json"), MINIMAL).expect("write dump");

        let source = JsonDirSource::new(dir.path());
        assert!(matches!(
            source.fetch("1"),
            Err(SourceError::Malformed { .. })
        ));
        assert!(matches!(
            source.fetch("2"),
            Err(SourceError::Malformed { .. })
        ));
        assert!(matches!(
            source.fetch("../1"),
            Err(SourceError::Malformed { .. })
        ));
    }
}
