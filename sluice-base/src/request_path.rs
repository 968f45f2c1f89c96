use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Normalized identity of a file a request targets. Cheap to clone and compare, two requests
/// target the same file if and only if their request paths are equal. Normalization is purely
/// lexical, nothing is resolved against the file system.
#[derive(Clone)]
pub struct RequestPath {
    path: Arc<PathBuf>,
    hash: u64,
}

impl RequestPath {
    pub fn new<T: AsRef<Path>>(path: T) -> Self {
        let path = normalize(path.as_ref());
        let mut hasher = ahash::AHasher::default();
        path.hash(&mut hasher);
        RequestPath {
            path: Arc::new(path),
            hash: hasher.finish(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// True if this path is located under the given directory
    pub fn starts_with(
        &self,
        directory: &Path,
    ) -> bool {
        self.path.starts_with(normalize(directory))
    }
}

// Collapses `.`, resolves `..` lexically and unifies separators
fn normalize(path: &Path) -> PathBuf {
    let unified;
    let path = if cfg!(windows) {
        path
    } else {
        let lossy = path.to_string_lossy();
        if lossy.contains('\\') {
            unified = PathBuf::from(lossy.replace('\\', "/"));
            unified.as_path()
        } else {
            path
        }
    };

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}

impl PartialEq for RequestPath {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.hash == other.hash && self.path == other.path
    }
}

impl Eq for RequestPath {}

impl Hash for RequestPath {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        state.write_u64(self.hash);
    }
}

impl Debug for RequestPath {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_tuple("RequestPath").field(&*self.path).finish()
    }
}

impl Display for RequestPath {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.path.display(), f)
    }
}

impl From<&str> for RequestPath {
    fn from(path: &str) -> Self {
        RequestPath::new(path)
    }
}

impl From<String> for RequestPath {
    fn from(path: String) -> Self {
        RequestPath::new(path)
    }
}

impl From<&Path> for RequestPath {
    fn from(path: &Path) -> Self {
        RequestPath::new(path)
    }
}

impl From<PathBuf> for RequestPath {
    fn from(path: PathBuf) -> Self {
        RequestPath::new(path)
    }
}

impl From<&PathBuf> for RequestPath {
    fn from(path: &PathBuf) -> Self {
        RequestPath::new(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equivalent_spellings_are_equal() {
        let a = RequestPath::new("assets/textures/../meshes/./rock.bin");
        let b = RequestPath::new("assets/meshes/rock.bin");
        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    fn different_files_are_not_equal() {
        assert_ne!(RequestPath::new("a/b.bin"), RequestPath::new("a/c.bin"));
    }

    #[test]
    fn leading_parent_dirs_are_kept() {
        let path = RequestPath::new("../data/file.bin");
        assert_eq!(path.path(), Path::new("../data/file.bin"));
    }

    #[test]
    fn empty_path() {
        assert!(RequestPath::new("").is_empty());
        assert!(!RequestPath::new("TestPath").is_empty());
    }

    #[test]
    fn starts_with_directory() {
        let path = RequestPath::new("/drive/data/../data/file.bin");
        assert!(path.starts_with(Path::new("/drive/data")));
        assert!(!path.starts_with(Path::new("/other")));
    }

    #[test]
    fn displays_the_normalized_path() {
        let path = RequestPath::new("data/./file.bin");
        assert_eq!(path.to_string(), Path::new("data/file.bin").display().to_string());
    }
}
