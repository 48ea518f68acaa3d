/// Drop a leading ```lang line and a trailing ``` line if the model wrapped
/// its answer in a markdown block. Anything else passes through.
pub fn strip_code_fences(text: &str) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.first().is_some_and(|l| l.trim().starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_is_unwrapped() {
        assert_eq!(strip_code_fences("```python\nx = 1\n```"), "x = 1");
        assert_eq!(strip_code_fences("```\nlevel = 'INFO'\n```"), "level = 'INFO'");
    }

    #[test]
    fn unfenced_text_is_untouched() {
        assert_eq!(strip_code_fences("x = 1\ny = 2"), "x = 1\ny = 2");
    }

    #[test]
    fn only_enclosing_lines_are_removed() {
        assert_eq!(
            strip_code_fences("x = 1\ns = \"```\"\n"),
            "x = 1\ns = \"```\"\n"
        );
        assert_eq!(strip_code_fences("```rust\nfn main() {}"), "fn main() {}");
    }
}
