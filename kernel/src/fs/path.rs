//! Path handling. Paths are slash-separated; a leading `/` makes them
//! absolute, otherwise they resolve against the calling thread's current
//! directory. There is no `..`: the directory tree is a strict hierarchy.

/// Split a path into the directory part and the final component.
///
/// A single trailing slash is ignored (`"a/b/"` names `b` inside `a`). An
/// empty directory part means "the current directory".
pub fn split_path(path: &str) -> (&str, &str) {
    let path = match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    };
    match path.rfind('/') {
        None => ("", path),
        Some(0) => ("/", &path[1..]),
        Some(at) => (&path[..at], &path[at + 1..]),
    }
}

/// The components of a directory path, in walk order.
pub fn components(dir_path: &str) -> impl Iterator<Item = &str> {
    dir_path.split('/').filter(|part| !part.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_cases() {
        assert_eq!(split_path("foo"), ("", "foo"));
        assert_eq!(split_path("/foo"), ("/", "foo"));
        assert_eq!(split_path("/a/b"), ("/a", "b"));
        assert_eq!(split_path("a/b"), ("a", "b"));
        assert_eq!(split_path("/a/b/c"), ("/a/b", "c"));
        assert_eq!(split_path("a/b/"), ("a", "b"));
        assert_eq!(split_path("/"), ("/", ""));
    }

    #[test]
    fn components_skip_empty() {
        assert_eq!(components("/a/b").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(components("a/b").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(components("/").count(), 0);
        assert_eq!(components("").count(), 0);
    }
}
