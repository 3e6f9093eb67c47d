//! step engine
//!
//! Steps are filesystem side effects that run alongside a rule pipeline,
//! for example cleaning up files a previous configuration layout left
//! behind. They share the rule document form:
//!
//! ```yaml
//! - delete_file:
//!     path: state/old.sock
//!     fail_on_missing: false
//! - move_file:
//!     path: state/current.yml
//!     target: state/previous.yml
//! ```
//!
//! Every path resolves against a root directory and must stay inside it.
//! Containment is checked lexically, before any filesystem access, so a
//! `../..` escape fails even when the file does not exist.
use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Component, Path, PathBuf};

/// An ordered list of filesystem steps.
#[derive(Debug, Clone, Default)]
pub struct StepList {
    steps: Vec<Step>,
}

/// One step on the wire: a single-key map keyed by the step name, not a
/// YAML tag.
#[derive(Deserialize)]
struct TaggedStep(#[serde(with = "serde_yaml::with::singleton_map")] Step);

impl Serialize for StepList {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct Tagged<'a>(&'a Step);
        impl Serialize for Tagged<'_> {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serde_yaml::with::singleton_map::serialize(self.0, serializer)
            }
        }
        serializer.collect_seq(self.steps.iter().map(Tagged))
    }
}

impl<'de> Deserialize<'de> for StepList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<TaggedStep>::deserialize(deserializer)?;
        Ok(StepList {
            steps: entries.into_iter().map(|TaggedStep(step)| step).collect(),
        })
    }
}

impl StepList {
    pub fn new(steps: Vec<Step>) -> StepList {
        StepList { steps }
    }

    /// Executes every step in order against `root_dir`, failing fast.
    pub fn execute(&self, root_dir: &Path) -> Result<(), Error> {
        for step in &self.steps {
            tracing::debug!(step = step.name(), "executing step");
            step.execute(root_dir).map_err(|source| Error::Step {
                name: step.name(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }
}

impl From<Vec<Step>> for StepList {
    fn from(steps: Vec<Step>) -> Self {
        StepList { steps }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DeleteFile(DeleteFileStep),
    MoveFile(MoveFileStep),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::DeleteFile(_) => "delete_file",
            Step::MoveFile(_) => "move_file",
        }
    }

    pub fn execute(&self, root_dir: &Path) -> Result<(), Error> {
        match self {
            Step::DeleteFile(step) => step.execute(root_dir),
            Step::MoveFile(step) => step.execute(root_dir),
        }
    }
}

/// Deletes a single file inside the root directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFileStep {
    pub path: String,
    #[serde(default)]
    pub fail_on_missing: bool,
}

impl DeleteFileStep {
    fn execute(&self, root_dir: &Path) -> Result<(), Error> {
        let path = resolve_contained(root_dir, Path::new(&self.path))?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !self.fail_on_missing => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Moves a single file to a new location, both inside the root directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveFileStep {
    pub path: String,
    pub target: String,
    #[serde(default)]
    pub fail_on_missing: bool,
}

impl MoveFileStep {
    fn execute(&self, root_dir: &Path) -> Result<(), Error> {
        let path = resolve_contained(root_dir, Path::new(&self.path))?;
        let target = resolve_contained(root_dir, Path::new(&self.target))?;
        match std::fs::rename(&path, &target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !self.fail_on_missing => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Resolves `path` against `root` and proves the result stays inside
/// `root`. Purely lexical so the check holds for paths that do not exist
/// yet.
fn resolve_contained(root: &Path, path: &Path) -> Result<PathBuf, Error> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let normalized = normalize(&absolute);
    if is_subpath(&normalize(root), &normalized) {
        Ok(normalized)
    } else {
        Err(Error::PathOutsideRoot {
            path: normalized,
            root: root.to_path_buf(),
        })
    }
}

/// Lexical normalization: `.` components drop, `..` pops the previous
/// component.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(windows)]
fn is_subpath(root: &Path, path: &Path) -> bool {
    // case-insensitive filesystem
    let lower = |p: &Path| PathBuf::from(p.to_string_lossy().to_lowercase());
    lower(path).starts_with(lower(root))
}

#[cfg(not(windows))]
fn is_subpath(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delete(path: &str, fail_on_missing: bool) -> Step {
        Step::DeleteFile(DeleteFileStep {
            path: path.to_string(),
            fail_on_missing,
        })
    }

    #[test]
    fn decode_step_documents() {
        let doc = "\
- delete_file:
    path: state/old.sock
- move_file:
    path: a.yml
    target: b.yml
    fail_on_missing: true
";
        let steps: StepList = serde_yaml::from_str(doc).unwrap();
        let encoded = serde_yaml::to_string(&steps).unwrap();
        // single-key maps, not YAML tags
        assert!(!encoded.contains('!'), "{encoded}");
        assert_eq!(encoded.matches("path:").count(), 2);
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doomed.txt");
        std::fs::write(&file, "x").unwrap();

        delete("doomed.txt", false).execute(dir.path()).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn delete_missing_is_swallowed_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        delete("missing.txt", false).execute(dir.path()).unwrap();

        let err = delete("missing.txt", true).execute(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn move_renames_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("from.yml"), "content").unwrap();

        let step = Step::MoveFile(MoveFileStep {
            path: "from.yml".to_string(),
            target: "to.yml".to_string(),
            fail_on_missing: false,
        });
        step.execute(dir.path()).unwrap();

        assert!(!dir.path().join("from.yml").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("to.yml")).unwrap(),
            "content"
        );
    }

    #[test]
    fn escaping_the_root_is_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = delete("../outside.txt", true)
            .execute(dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::PathOutsideRoot { .. }));

        let err = delete("sub/../../outside.txt", false)
            .execute(dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::PathOutsideRoot { .. }));
    }

    #[test]
    fn dot_segments_inside_root_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("keep.txt"), "x").unwrap();

        delete("sub/../keep.txt", true).execute(dir.path()).unwrap();
        assert!(!dir.path().join("keep.txt").exists());
    }

    #[test]
    fn step_list_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("second.txt"), "x").unwrap();

        let steps = StepList::new(vec![
            delete("first.txt", true),
            delete("second.txt", false),
        ]);
        let err = steps.execute(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Step { name: "delete_file", .. }));
        // second step never ran
        assert!(dir.path().join("second.txt").exists());
    }
}
