//! Path handling.
//!
//! Paths are tokenized with a small lexer ([`Token`]) into separators and components,
//! which are then folded into a canonical absolute path by [`normalise`].
//!
//! ```
//! use bytekernel::fs::path;
//!
//! assert_eq!(path::normalise("/bin//./ls"), "/bin/ls");
//! assert_eq!(path::join("/home/user", "../tmp"), "/home/tmp");
//! assert_eq!(path::split("/bin/ls"), ("/bin".to_string(), "ls".to_string()));
//! ```

use logos::Logos;

/// Longest path (in bytes, excluding the NUL terminator) a process can hand to the kernel.
pub const PATH_MAX: usize = 63;

/// A unit of a path.
#[derive(Debug, Logos, PartialEq, Eq, Clone, Copy)]
pub enum Token<'s> {
    /// One or more consecutive `/`.
    #[regex(r"/+")]
    Sep,

    /// The current directory (`.`).
    #[token(".")]
    Current,

    /// The parent directory (`..`).
    #[token("..")]
    Parent,

    /// Any other component.
    #[regex(r"[^/]+", |lx| lx.slice(), priority = 1)]
    Name(&'s str),
}

/// Collapses a path into its canonical absolute form.
///
/// Relative paths are treated as relative to the root.
/// `..` at the root stays at the root.
pub fn normalise(path: &str) -> String {
    let mut parts: Vec<&str> = vec![];

    for token in Token::lexer(path).flatten() {
        match token {
            Token::Sep | Token::Current => {},
            Token::Parent => { parts.pop(); },
            Token::Name(name) => parts.push(name),
        }
    }

    let mut out = String::with_capacity(path.len() + 1);
    for part in &parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Resolves `path` against the directory `base`.
///
/// Absolute paths ignore `base`.
pub fn join(base: &str, path: &str) -> String {
    match path.starts_with('/') {
        true  => normalise(path),
        false => normalise(&format!("{base}/{path}")),
    }
}

/// Splits a path into its (normalised) parent directory and base name.
///
/// The root splits into `("/", "")`.
pub fn split(path: &str) -> (String, String) {
    let norm = normalise(path);
    match norm.rsplit_once('/') {
        Some(("", base)) => ("/".to_string(), base.to_string()),
        Some((dir, base)) => (dir.to_string(), base.to_string()),
        None => ("/".to_string(), norm),
    }
}

/// Checks whether a path is acceptable to hand to the file system.
pub fn is_valid(path: &str) -> bool {
    !path.is_empty() && path.len() <= PATH_MAX && !path.contains('\0')
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::{is_valid, join, normalise, split, Token};

    #[test]
    fn test_lex() {
        let tokens: Vec<_> = Token::lexer("/a/./..//b...").collect();
        assert_eq!(tokens, [
            Ok(Token::Sep),
            Ok(Token::Name("a")),
            Ok(Token::Sep),
            Ok(Token::Current),
            Ok(Token::Sep),
            Ok(Token::Parent),
            Ok(Token::Sep),
            Ok(Token::Name("b...")),
        ]);

        let tokens: Vec<_> = Token::lexer("..x").collect();
        assert_eq!(tokens, [Ok(Token::Name("..x"))]);
    }

    #[test]
    fn test_normalise() {
        assert_eq!(normalise(""), "/");
        assert_eq!(normalise("/"), "/");
        assert_eq!(normalise("///"), "/");
        assert_eq!(normalise("bin"), "/bin");
        assert_eq!(normalise("/bin/"), "/bin");
        assert_eq!(normalise("/a/b/../c"), "/a/c");
        assert_eq!(normalise("/../../a"), "/a");
        assert_eq!(normalise("/a/./b/."), "/a/b");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/home", "file"), "/home/file");
        assert_eq!(join("/home", "/etc/file"), "/etc/file");
        assert_eq!(join("/", "a/../b"), "/b");
    }

    #[test]
    fn test_split() {
        assert_eq!(split("/"), ("/".to_string(), "".to_string()));
        assert_eq!(split("/ls"), ("/".to_string(), "ls".to_string()));
        assert_eq!(split("/usr/bin/ls"), ("/usr/bin".to_string(), "ls".to_string()));
    }

    #[test]
    fn test_valid() {
        assert!(is_valid("/bin/ls"));
        assert!(!is_valid(""));
        assert!(!is_valid(&"a".repeat(64)));
        assert!(!is_valid("a\0b"));
    }
}
