//! Path handling
//!
//! Paths are `/`-separated and rooted at the `root` marker. All of these
//! name the same directory: `root/docs`, `/docs`, `/root/docs`, `docs`.
//! Empty segments (doubled or trailing separators) are ignored.

/// Name of the root directory, and the first segment of every full path
pub const ROOT_MARKER: &str = "root";

/// Path separator
pub const SEPARATOR: char = '/';

/// Split a path into the segments below the root.
pub fn segments(path: &str) -> Vec<&str> {
    let mut parts = path
        .split(SEPARATOR)
        .filter(|s| !s.is_empty())
        .peekable();
    if parts.peek() == Some(&ROOT_MARKER) {
        parts.next();
    }
    parts.collect()
}

/// True if the path names the root itself
pub fn is_root(path: &str) -> bool {
    segments(path).is_empty()
}

/// Build a full path from segments below the root
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::from(ROOT_MARKER);
    for seg in segments {
        path.push(SEPARATOR);
        path.push_str(seg.as_ref());
    }
    path
}

/// Resolve `path` against a working directory.
///
/// Paths starting with `/` or the root marker are absolute. `.` and `..`
/// are applied lexically; `..` at the root stays at the root.
pub fn resolve(cwd: &str, path: &str) -> String {
    let absolute = path.starts_with(SEPARATOR)
        || path.split(SEPARATOR).next() == Some(ROOT_MARKER);

    let mut stack: Vec<&str> = if absolute { Vec::new() } else { segments(cwd) };

    let rest: Vec<&str> = if absolute {
        segments(path)
    } else {
        path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
    };

    for seg in rest {
        match seg {
            "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    join(&stack)
}

/// Split a full path into its parent path and final segment
pub fn split_last(path: &str) -> Option<(String, String)> {
    let mut segs = segments(path);
    let last = segs.pop()?;
    Some((join(&segs), last.to_string()))
}
