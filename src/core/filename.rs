use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

use urlrelay_core::models::transfer::FileName;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Longest file name most filesystems accept, in bytes.
const MAX_NAME_BYTES: usize = 255;
const FALLBACK_BASE: &str = "file";

pub fn sanitize_path_component(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name = name.trim().replace(['\t', '\n', '\r'], "");
    let name = WS_RE.replace_all(&name, " ");

    let name = name.trim_end_matches([' ', '-', '.', ';']);

    let forbidden: &[(char, char)] = &[
        ('<', '＜'),
        ('>', '＞'),
        (':', '꞉'),
        ('"', '＂'),
        ('/', '⧸'),
        ('\\', '＼'),
        ('|', '｜'),
        ('?', '？'),
        ('*', ' '),
    ];

    let mut result = name.to_string();
    for (from, to) in forbidden {
        result = result.replace(*from, &to.to_string());
    }

    let result = sanitize_filename::sanitize(result.trim());
    result.trim_start_matches('.').trim().to_string()
}

/// Makes a user-supplied name safe to use inside the scratch directory,
/// keeping the extension intact when the name has to be shortened.
pub fn safe_file_name(name: &FileName) -> FileName {
    let extension = sanitize_path_component(name.extension());
    let mut base = sanitize_path_component(name.base());
    if base.is_empty() {
        base = FALLBACK_BASE.to_string();
    }
    let budget = MAX_NAME_BYTES.saturating_sub(extension.len() + 1);
    FileName::new(truncate_to_bytes(&base, budget), extension)
}

fn truncate_to_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_basic_forbidden_chars() {
        assert_eq!(sanitize_path_component("a:b?c"), "a꞉b？c");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_path_component("holiday   video"), "holiday video");
    }

    #[test]
    fn sanitize_trims_trailing_punctuation() {
        assert_eq!(sanitize_path_component("report - "), "report");
    }

    #[test]
    fn sanitize_unicode_nfc_normalization() {
        let decomposed = "e\u{0301}";
        assert_eq!(sanitize_path_component(decomposed), "\u{00e9}");
    }

    #[test]
    fn path_traversal_is_neutralised() {
        let name = sanitize_path_component("../../etc/passwd");
        assert!(!name.contains('/'));
        assert!(!name.starts_with('.'));
    }

    #[test]
    fn separators_never_survive() {
        for c in ['<', '>', ':', '"', '/', '\\', '|', '?', '*'] {
            let result = sanitize_path_component(&format!("clip{}final", c));
            assert!(!result.contains(c), "char '{}' should be replaced", c);
        }
    }

    #[test]
    fn safe_name_keeps_extension() {
        let long = FileName::new("x".repeat(400), "mp4");
        let safe = safe_file_name(&long);
        assert_eq!(safe.extension(), "mp4");
        assert!(safe.to_string().len() <= MAX_NAME_BYTES);
    }

    #[test]
    fn safe_name_truncates_on_char_boundary() {
        let long = FileName::new("é".repeat(200), "mkv");
        let safe = safe_file_name(&long);
        assert!(safe.to_string().len() <= MAX_NAME_BYTES);
        assert!(safe.base().chars().all(|c| c == 'é'));
    }

    #[test]
    fn empty_base_gets_a_fallback() {
        let safe = safe_file_name(&FileName::new("...", "zip"));
        assert_eq!(safe.to_string(), "file.zip");
    }
}
