//! Name handling shared by the store, the catalog parsers and the update scanner.
//!
//! - [`sort_key`]: locale-aware ordering key (CJK names sort by pinyin)
//! - [`trainer_key`]: normalized identity used to match local files against catalog entries
//! - [`trainer_file_name`]: file name a download is installed under

use camino::Utf8Path;
use pinyin::ToPinyin;
use regex::Regex;
use std::sync::LazyLock;

/// File extension every trainer carries.
pub const TRAINER_EXTENSION: &str = "exe";

/// Version tags, option counts and site boilerplate that vary between releases
/// of the same trainer.
static NAME_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:v\d[\w.\-]*|plus\s+\d+|\d+\s+options?|trainers?|fling)\b")
        .expect("Invalid name noise regex")
});

/// Characters Windows refuses in file names.
static INVALID_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("Invalid file char regex"));

/// True when the text contains CJK unified ideographs.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Ordering key for trainer names.
///
/// Names containing CJK characters are transliterated to toneless pinyin,
/// one syllable per character and separated by spaces; runs of other
/// characters are kept as they are. Everything else sorts by the name itself.
pub fn sort_key(name: &str) -> String {
    if !contains_cjk(name) {
        return name.to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    let mut run = String::new();

    for c in name.chars() {
        match c.to_pinyin() {
            Some(syllable) => {
                if !run.is_empty() {
                    parts.push(std::mem::take(&mut run));
                }
                parts.push(syllable.plain().to_string());
            }
            None => run.push(c),
        }
    }
    if !run.is_empty() {
        parts.push(run);
    }

    parts.join(" ")
}

/// Normalized identity for matching an installed trainer with catalog entries.
///
/// "Elden Ring Trainer" and "Elden Ring v1.02-v1.10 Plus 35 Trainer" both map
/// to `eldenring`.
pub fn trainer_key(name: &str) -> String {
    NAME_NOISE
        .replace_all(name, " ")
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// File name a trainer with this display name is installed under.
pub fn trainer_file_name(display_name: &str) -> String {
    let cleaned = INVALID_FILE_CHARS.replace_all(display_name, "");
    let cleaned = cleaned.trim().trim_end_matches('.');
    let stem = if cleaned.is_empty() { "Trainer" } else { cleaned };
    format!("{}.{}", stem, TRAINER_EXTENSION)
}

/// True when the path carries the trainer extension (case-insensitive).
pub fn has_trainer_extension(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(TRAINER_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sort_key_plain_names() {
        assert_eq!(sort_key("Elden Ring"), "Elden Ring");
    }

    #[test]
    fn test_sort_key_cjk_names() {
        assert_eq!(sort_key("中国"), "zhong guo");
        assert_eq!(sort_key("黑神话 Trainer"), "hei shen hua  Trainer");
    }

    #[test]
    fn test_cjk_sorts_among_latin() {
        let mut names = vec!["Zelda", "艾尔登法环", "Baldur's Gate 3"];
        names.sort_by_key(|n| sort_key(n));
        // "ai er deng fa huan" sorts after the uppercase Latin names
        assert_eq!(names, vec!["Baldur's Gate 3", "Zelda", "艾尔登法环"]);
    }

    #[test]
    fn test_trainer_key_strips_versions() {
        assert_eq!(trainer_key("Elden Ring Trainer"), "eldenring");
        assert_eq!(trainer_key("Elden Ring v1.02-v1.10 Plus 35 Trainer"), "eldenring");
        assert_eq!(trainer_key("Hades II 24 Options Trainer"), "hadesii");
        assert_eq!(trainer_key("FLiNG Trainer"), "");
    }

    #[test]
    fn test_trainer_key_keeps_cjk() {
        assert_eq!(trainer_key("艾尔登法环 修改器"), "艾尔登法环修改器");
    }

    #[test]
    fn test_trainer_file_name() {
        assert_eq!(trainer_file_name("Elden Ring Trainer"), "Elden Ring Trainer.exe");
        assert_eq!(trainer_file_name("What: The/Game?"), "What TheGame.exe");
        assert_eq!(trainer_file_name("  ..."), "Trainer.exe");
    }

    #[test]
    fn test_has_trainer_extension() {
        assert!(has_trainer_extension(Utf8Path::new("a/Foo.exe")));
        assert!(has_trainer_extension(Utf8Path::new("a/Foo.EXE")));
        assert!(!has_trainer_extension(Utf8Path::new("a/Foo.zip")));
        assert!(!has_trainer_extension(Utf8Path::new("a/exe")));
    }

    proptest! {
        #[test]
        fn prop_sort_key_is_deterministic(name in "\\PC{0,24}") {
            prop_assert_eq!(sort_key(&name), sort_key(&name));
        }

        #[test]
        fn prop_trainer_key_is_lowercase_alphanumeric(name in "\\PC{0,32}") {
            let key = trainer_key(&name);
            prop_assert!(key.chars().all(|c| c.is_alphanumeric()));
            prop_assert!(!key.chars().any(char::is_uppercase));
        }
    }
}
