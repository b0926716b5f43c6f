//! Executable discovery for CLI backends.
//!
//! Lookups go through [`Environment`] and [`FileProbe`] so tests can describe
//! a machine instead of touching the real one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Read access to environment variables.
pub trait Environment: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Filesystem checks used while probing for executables.
pub trait FileProbe: Send + Sync {
    fn is_executable(&self, path: &Path) -> bool;
}

/// The real filesystem.
pub struct RealFs;

impl FileProbe for RealFs {
    #[cfg(unix)]
    fn is_executable(&self, path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
    }

    #[cfg(not(unix))]
    fn is_executable(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Common install locations checked after `PATH`.
pub const FALLBACK_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/bin"];

/// Per-user install locations, relative to `$HOME`.
pub const HOME_FALLBACK_DIRS: &[&str] = &[
    ".local/bin",
    ".npm-global/bin",
    ".volta/bin",
    ".bun/bin",
];

/// Locate `program`. Names containing a path separator are checked as
/// given; bare names are searched in `PATH`, then the fallback directories.
pub fn resolve_executable(
    program: &str,
    env: &dyn Environment,
    fs: &dyn FileProbe,
) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains('/') || program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return fs.is_executable(&path).then_some(path);
    }

    let mut dirs: Vec<PathBuf> = env
        .var("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();
    dirs.extend(FALLBACK_DIRS.iter().map(PathBuf::from));
    if let Some(home) = env.var("HOME").filter(|h| !h.is_empty()) {
        dirs.extend(HOME_FALLBACK_DIRS.iter().map(|d| Path::new(&home).join(d)));
    }

    dirs.into_iter()
        .filter(|d| !d.as_os_str().is_empty())
        .map(|d| d.join(program))
        .find(|candidate| fs.is_executable(candidate))
}

/// Split a command line into words, honouring single and double quotes and
/// backslash escapes. Returns `None` on an unterminated quote.
pub fn split_command(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        other => current.push(other),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => current.push(chars.next()?),
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                in_word = true;
                current.push(chars.next()?);
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeFs(HashSet<PathBuf>);

    impl FileProbe for FakeFs {
        fn is_executable(&self, path: &Path) -> bool {
            self.0.contains(path)
        }
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn fs(paths: &[&str]) -> FakeFs {
        FakeFs(paths.iter().map(PathBuf::from).collect())
    }

    #[test]
    fn searches_path_first() {
        let found = resolve_executable(
            "codex",
            &env(&[("PATH", "/a:/b")]),
            &fs(&["/b/codex", "/usr/local/bin/codex"]),
        );
        assert_eq!(found, Some(PathBuf::from("/b/codex")));
    }

    #[test]
    fn falls_back_to_common_dirs() {
        let found = resolve_executable(
            "codex",
            &env(&[("PATH", "/usr/sbin:/sbin")]),
            &fs(&["/opt/homebrew/bin/codex"]),
        );
        assert_eq!(found, Some(PathBuf::from("/opt/homebrew/bin/codex")));
    }

    #[test]
    fn falls_back_to_home_dirs() {
        let found = resolve_executable(
            "codex",
            &env(&[("HOME", "/home/dj")]),
            &fs(&["/home/dj/.npm-global/bin/codex"]),
        );
        assert_eq!(found, Some(PathBuf::from("/home/dj/.npm-global/bin/codex")));
    }

    #[test]
    fn explicit_paths_are_checked_directly() {
        let probe = fs(&["/tools/codex"]);
        assert_eq!(
            resolve_executable("/tools/codex", &env(&[]), &probe),
            Some(PathBuf::from("/tools/codex"))
        );
        assert_eq!(resolve_executable("/other/codex", &env(&[]), &probe), None);
        assert_eq!(resolve_executable("", &env(&[]), &probe), None);
    }

    #[test]
    fn splits_quoted_words() {
        assert_eq!(
            split_command("codex exec  --flag 'a b' \"c \\\" d\" e\\ f").unwrap_or_default(),
            ["codex", "exec", "--flag", "a b", "c \" d", "e f"]
        );
        assert_eq!(split_command("").unwrap_or_default(), Vec::<String>::new());
        assert_eq!(split_command("''").unwrap_or_default(), [""]);
        assert_eq!(split_command("codex 'open"), None);
    }
}
