// ── Watched locations ──
//
// Filesystem events are taken per directory (editors and credential
// refreshers replace files by rename, which a per-file watch misses).
// Each directory is either unfiltered or limited to named files.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use kubedeck_kube::default_kubeconfig_paths;

const ARTIFACT_SUFFIXES: &[&str] = &[
    "~", ".swp", ".swx", ".swo", ".tmp", ".bak", ".orig", ".lock", ".part",
];

/// Directories to watch and, per directory, which file names count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    /// `None` = every file not excluded by [`is_editor_artifact`].
    dirs: BTreeMap<PathBuf, Option<BTreeSet<OsString>>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `$KUBECONFIG` entries, or `~/.kube/config`.
    pub fn from_default_locations() -> Self {
        let mut set = Self::new();
        for path in default_kubeconfig_paths() {
            set.watch_file(&path);
        }
        set
    }

    /// Watch every kubeconfig in `dir`. Replaces any filter for it.
    pub fn watch_directory(&mut self, dir: impl AsRef<Path>) {
        self.dirs.insert(normalize_dir(dir.as_ref()), None);
    }

    /// Watch one file. Filters for the same directory merge; an
    /// unfiltered directory stays unfiltered.
    pub fn watch_file(&mut self, file: impl AsRef<Path>) {
        let file = file.as_ref();
        let Some(name) = file.file_name() else {
            return;
        };
        let dir = normalize_dir(parent_of(file));
        self.dirs
            .entry(dir)
            .and_modify(|filter| {
                if let Some(names) = filter {
                    names.insert(name.to_os_string());
                }
            })
            .or_insert_with(|| Some(BTreeSet::from([name.to_os_string()])));
    }

    pub fn merge(&mut self, other: &Self) {
        for (dir, filter) in &other.dirs {
            match filter {
                None => self.watch_directory(dir),
                Some(names) => {
                    for name in names {
                        self.watch_file(dir.join(name));
                    }
                }
            }
        }
    }

    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.dirs.keys().map(PathBuf::as_path)
    }

    /// `(directory, filter)` pairs; a `None` filter means unfiltered.
    pub fn entries(&self) -> impl Iterator<Item = (&Path, Option<&BTreeSet<OsString>>)> {
        self.dirs
            .iter()
            .map(|(dir, filter)| (dir.as_path(), filter.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Whether a change to `path` belongs to this set.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let parent = parent_of(path);
        let filter = self
            .dirs
            .get(parent)
            .or_else(|| self.dirs.get(&normalize_dir(parent)));

        match filter {
            Some(None) => !is_editor_artifact(name),
            Some(Some(names)) => names.contains(name),
            None => false,
        }
    }
}

/// Swap files, backups, lock files and other names editors and
/// downloaders leave next to the real file.
pub fn is_editor_artifact(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.')
        || name.starts_with('#')
        || name == "4913"
        || ARTIFACT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Comparable form of a file path: canonical parent plus file name. The
/// file itself may already be gone.
pub(crate) fn path_key(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => normalize_dir(parent_of(path)).join(name),
        None => path.to_path_buf(),
    }
}

fn parent_of(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn normalize_dir(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}
