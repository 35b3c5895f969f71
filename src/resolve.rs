//! Finds the image a free-text request refers to, e.g. "what is wrong with
//! R1xC22-4 ?" resolves to `R1xC22-4.png` in the target directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Words must be longer than this to match part of a file name
pub const MIN_PARTIAL_MATCH_LEN: usize = 4;

/// Inputs that end an interactive session
pub const QUIT_PHRASES: [&str; 4] = ["exit", "quit", "종료", "꺼져"];

pub fn is_quit(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    QUIT_PHRASES.contains(&input.as_str())
}

/// Split an utterance into words after dropping quotes, `?` and `!`.
pub fn clean_words(utterance: &str) -> Vec<String> {
    utterance
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '?' | '!'))
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Pick the first name, in the given order, that one of `words` refers to.
///
/// A name matches when a word equals the full name, equals the name without
/// its extension, or is longer than [`MIN_PARTIAL_MATCH_LEN`] and occurs
/// inside the name without its extension.
pub fn match_file_name<'a, S: AsRef<str>>(words: &[S], names: &'a [String]) -> Option<&'a str> {
    names.iter().map(String::as_str).find(|name| {
        if words.iter().any(|w| w.as_ref() == *name) {
            return true;
        }
        let stem = Path::new(name).file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        words.iter().any(|w| {
            let word = w.as_ref();
            word == stem || (word.chars().count() > MIN_PARTIAL_MATCH_LEN && stem.contains(word))
        })
    })
}

/// Resolve `utterance` to a file directly inside `dir`.
pub fn resolve_file(utterance: &str, dir: impl AsRef<Path>) -> io::Result<Option<PathBuf>> {
    let dir = dir.as_ref();
    let mut names = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();

    let words = clean_words(utterance);
    Ok(match_file_name(&words, &names).map(|name| dir.join(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_clean_words() {
        assert_eq!(clean_words("what's 'img_01.png' ?!"), vec!["whats", "img_01.png"]);
        assert!(clean_words("   ").is_empty());
    }

    #[test]
    fn test_exact_and_stem_match() {
        let files = names(&["img_01.png", "img_02.png"]);
        assert_eq!(match_file_name(&clean_words("check img_02.png please"), &files), Some("img_02.png"));
        assert_eq!(match_file_name(&clean_words("what about img_01?"), &files), Some("img_01.png"));
    }

    #[test]
    fn test_partial_match_needs_long_word() {
        let files = names(&["[00001]TestImage.png"]);
        assert_eq!(match_file_name(&["TestImage"], &files), Some("[00001]TestImage.png"));
        // four characters is not enough
        assert_eq!(match_file_name(&["Test"], &files), None);
        assert_eq!(match_file_name(&["Image"], &files), Some("[00001]TestImage.png"));
    }

    #[test]
    fn test_first_file_wins() {
        let files = names(&["R1xC22-4-82pxl.png", "R1xC22-5-90pxl.png"]);
        assert_eq!(match_file_name(&["R1xC22"], &files), Some("R1xC22-4-82pxl.png"));
        assert_eq!(match_file_name(&["nothing", "here"], &files), None);
    }

    #[test]
    fn test_quit_phrases() {
        assert!(is_quit("exit"));
        assert!(is_quit("  QUIT \n"));
        assert!(is_quit("종료"));
        assert!(!is_quit("exit now"));
    }

    #[test]
    fn test_resolve_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_sample.png"), b"").unwrap();
        fs::write(dir.path().join("a_sample.png"), b"").unwrap();
        fs::create_dir(dir.path().join("sample_dir")).unwrap();

        let found = resolve_file("look at sample please", dir.path()).unwrap();
        assert_eq!(found, Some(dir.path().join("a_sample.png")));
        assert_eq!(resolve_file("sample_dir", dir.path()).unwrap(), None);
        assert!(resolve_file("x", dir.path().join("missing")).is_err());
    }
}
