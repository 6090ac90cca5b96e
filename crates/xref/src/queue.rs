//! Staleness-aware discovery of source files.
//!
//! Directories are walked with an explicit stack of open handles instead of
//! recursion, so pathological trees cannot exhaust the call stack.
//! Subdirectories are opened when they are reached, which means files added
//! or removed while a scan is running may or may not be seen.

use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::fs::{self, Metadata, ReadDir};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::parse::{asm, extension_key, generic, ParserRegistry};
use crate::Result;

/// Returned by [`FileQueue::pop`] once every root has been exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no more entries")]
pub struct NoMoreEntries;

/// A lazy, finite sequence of files newer than `era_start` with a
/// recognized extension.
pub struct FileQueue {
    era_start: SystemTime,
    extensions: HashSet<String>,
    exclude_dirs: HashSet<OsString>,
    /// Directories currently being read, innermost last
    stack: Vec<(PathBuf, ReadDir)>,
    roots: VecDeque<PathBuf>,
    files: VecDeque<PathBuf>,
    /// Paths already yielded during this scan
    seen: HashSet<PathBuf>,
}

impl FileQueue {
    /// Queue over `root` using the built-in parsers' extensions.
    pub fn new(root: impl Into<PathBuf>, era_start: SystemTime) -> Self {
        let extensions = generic::DEFAULT_EXTENSIONS
            .iter()
            .chain(asm::DEFAULT_EXTENSIONS)
            .map(|e| e.to_string())
            .collect();

        let mut queue = Self {
            era_start,
            extensions,
            exclude_dirs: HashSet::new(),
            stack: Vec::new(),
            roots: VecDeque::new(),
            files: VecDeque::new(),
            seen: HashSet::new(),
        };
        queue.push_root(root);
        queue
    }

    /// Only yield files some parser in `registry` handles.
    pub fn with_registry(mut self, registry: &ParserRegistry) -> Self {
        self.extensions = registry.extensions().map(str::to_string).collect();
        self
    }

    /// Never descend into directories with any of these names.
    pub fn with_excluded_dirs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.exclude_dirs.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add another directory tree to scan after the current ones.
    pub fn push_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push_back(root.into());
    }

    /// Add an individual file. It is subject to the same eligibility rules
    /// as discovered files and is yielded at most once.
    pub fn push_file(&mut self, path: impl Into<PathBuf>) {
        self.files.push_back(path.into());
    }

    /// Queue every path listed in a name file. Returns how many were added.
    pub fn extend_from_namefile(&mut self, namefile: &Path) -> Result<usize> {
        let paths = crate::namefile::read_namefile(namefile)?;
        let base = namefile.parent().unwrap_or(Path::new(""));
        let count = paths.len();
        for path in paths {
            // `./src/a.c` and `src/a.c` must produce the same key
            let path: PathBuf = path
                .components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect();
            self.push_file(base.join(path));
        }
        Ok(count)
    }

    pub fn era_start(&self) -> SystemTime {
        self.era_start
    }

    /// Next eligible path, or [`NoMoreEntries`] once the scan is complete.
    pub fn pop(&mut self) -> std::result::Result<PathBuf, NoMoreEntries> {
        loop {
            if let Some(path) = self.files.pop_front() {
                match fs::metadata(&path) {
                    Ok(metadata) if metadata.is_file() => {
                        if self.admit(&path, &metadata) {
                            return Ok(path);
                        }
                    }
                    Ok(_) => debug!("Skipping non-regular file {:?}", path),
                    Err(e) => warn!("Cannot stat {:?}: {}", path, e),
                }
                continue;
            }

            let Some((prefix, dir)) = self.stack.last_mut() else {
                match self.roots.pop_front() {
                    Some(root) => {
                        self.open_dir(root);
                        continue;
                    }
                    None => return Err(NoMoreEntries),
                }
            };

            let entry = match dir.next() {
                None => {
                    self.stack.pop();
                    continue;
                }
                Some(Err(e)) => {
                    warn!("Error reading directory {:?}: {}", prefix, e);
                    continue;
                }
                Some(Ok(entry)) => entry,
            };
            let path = prefix.join(entry.file_name());

            // symlinks are neither followed nor indexed
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    warn!("Cannot stat {:?}: {}", path, e);
                    continue;
                }
            };

            if file_type.is_dir() {
                if self.exclude_dirs.contains(&entry.file_name()) {
                    debug!("Skipping excluded directory {:?}", path);
                } else {
                    self.open_dir(path);
                }
            } else if file_type.is_file() {
                if !self.has_recognized_extension(&path) {
                    continue;
                }
                match entry.metadata() {
                    Ok(metadata) => {
                        if self.admit(&path, &metadata) {
                            return Ok(path);
                        }
                    }
                    Err(e) => warn!("Cannot stat {:?}: {}", path, e),
                }
            }
        }
    }

    fn open_dir(&mut self, path: PathBuf) {
        match fs::read_dir(&path) {
            Ok(handle) => self.stack.push((path, handle)),
            Err(e) => warn!("Skipping unreadable directory {:?}: {}", path, e),
        }
    }

    fn has_recognized_extension(&self, path: &Path) -> bool {
        extension_key(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Recognized, newer than the era start, and not yet yielded.
    fn admit(&mut self, path: &Path, metadata: &Metadata) -> bool {
        if !self.has_recognized_extension(path) {
            return false;
        }
        let fresh = match metadata.modified() {
            Ok(mtime) => mtime > self.era_start,
            Err(e) => {
                debug!("No modification time for {:?}: {}", path, e);
                false
            }
        };
        fresh && self.seen.insert(path.to_path_buf())
    }
}

impl Iterator for FileQueue {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        self.pop().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, "int x;\n").unwrap();
        path
    }

    fn set_mtime(path: &Path, mtime: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    fn drain(queue: FileQueue) -> Vec<PathBuf> {
        let mut paths: Vec<_> = queue.collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_discovers_recognized_files() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "a.c");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "Makefile");
        let c = touch(dir.path(), "sub/start.S");
        let d = touch(dir.path(), "sub/deeper/util.hpp");

        let paths = drain(FileQueue::new(dir.path(), UNIX_EPOCH));
        let mut expected = vec![a, c, d];
        expected.sort();
        assert_eq!(paths, expected);
    }

    #[test]
    fn test_era_start_is_strict() {
        let dir = TempDir::new().unwrap();
        // whole seconds so the equal-mtime case survives coarse filesystems
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let era = UNIX_EPOCH + Duration::from_secs(now - 3600);

        let old = touch(dir.path(), "old.c");
        set_mtime(&old, era - Duration::from_secs(60));
        let same = touch(dir.path(), "same.c");
        set_mtime(&same, era);
        let new = touch(dir.path(), "new.c");

        assert_eq!(drain(FileQueue::new(dir.path(), era)), vec![new]);
    }

    #[test]
    fn test_excluded_dirs_not_descended() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".git/hooks/x.c");
        touch(dir.path(), "build/gen.c");
        let kept = touch(dir.path(), "src/main.c");

        let queue = FileQueue::new(dir.path(), UNIX_EPOCH).with_excluded_dirs([".git", "build"]);
        assert_eq!(drain(queue), vec![kept]);
    }

    #[test]
    fn test_pushed_files_yielded_once() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "a.c");
        let readme = touch(dir.path(), "README");

        let mut queue = FileQueue::new(dir.path(), UNIX_EPOCH);
        queue.push_file(&a);
        queue.push_file(&a);
        queue.push_file(&readme);
        queue.push_file(dir.path().join("missing.c"));

        assert_eq!(queue.pop(), Ok(a));
        assert_eq!(queue.pop(), Err(NoMoreEntries));
        assert_eq!(queue.pop(), Err(NoMoreEntries));
    }

    #[test]
    fn test_multiple_roots() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        let a = touch(one.path(), "a.c");
        let b = touch(two.path(), "b.s");

        let mut queue = FileQueue::new(one.path(), UNIX_EPOCH);
        queue.push_root(two.path());
        // overlapping roots do not duplicate results
        queue.push_root(one.path());
        assert_eq!(queue.collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut queue = FileQueue::new(dir.path().join("nope"), UNIX_EPOCH);
        assert_eq!(queue.pop(), Err(NoMoreEntries));
    }

    #[test]
    fn test_registry_controls_extensions() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.c");
        let s = touch(dir.path(), "b.s");

        let mut registry = ParserRegistry::new();
        registry.register(asm::DEFAULT_EXTENSIONS, std::sync::Arc::new(asm::AsmParser::new().unwrap()));

        let queue = FileQueue::new(dir.path(), UNIX_EPOCH).with_registry(&registry);
        assert_eq!(drain(queue), vec![s]);
    }

    #[test]
    fn test_deep_tree() {
        let dir = TempDir::new().unwrap();
        let relative: PathBuf = (0..200).map(|i| format!("d{i}")).collect();
        let leaf = touch(dir.path(), &relative.join("leaf.c").to_string_lossy());

        assert_eq!(drain(FileQueue::new(dir.path(), UNIX_EPOCH)), vec![leaf]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed() {
        let dir = TempDir::new().unwrap();
        let target = touch(dir.path(), "real/a.c");
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("alias.c")).unwrap();

        assert_eq!(drain(FileQueue::new(dir.path(), UNIX_EPOCH)), vec![target]);
    }

    #[test]
    fn test_seed_from_namefile() {
        let dir = TempDir::new().unwrap();
        let a = touch(dir.path(), "src/a.c");
        let b = touch(dir.path(), "src/with space.h");
        fs::write(dir.path().join("cscope.files"), "./src/a.c\n\"src/with space.h\"\n").unwrap();

        let mut queue = FileQueue::new(dir.path().join("nothing-here"), UNIX_EPOCH);
        let added = queue
            .extend_from_namefile(&dir.path().join("cscope.files"))
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(queue.collect::<Vec<_>>(), vec![a, b]);
    }
}
