//! Small shared helpers.

/// Fold full-width (zenkaku) ASCII digits to their half-width forms.
/// Users on Japanese keyboards routinely type "完了１" for "完了1".
pub fn fold_zenkaku_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            other => other,
        })
        .collect()
}

/// Clamp a string for log output, respecting char boundaries.
pub fn truncate_for_log(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_zenkaku_digits() {
        assert_eq!(fold_zenkaku_digits("完了１２３"), "完了123");
        assert_eq!(fold_zenkaku_digits("no digits"), "no digits");
        assert_eq!(fold_zenkaku_digits("０"), "0");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_for_log("短い", 10), "短い");
        let out = truncate_for_log("あいうえおかきくけこさ", 5);
        assert_eq!(out, "あいうえお…");
    }
}
