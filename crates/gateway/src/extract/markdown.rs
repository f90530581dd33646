//! Markdown line-range extraction. A node's range is
//! `[line_num, next_sibling.line_num - 1]`; when there is no next sibling
//! `end_line` is `None` and the range runs to end of file. Lines are
//! 1-based and the range is clamped to `[1, line_count]`.

use std::path::Path;

pub fn extract_line_range(path: &Path, start_line: i64, end_line: Option<i64>) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    if total == 0 {
        return String::new();
    }
    let total_i = total as i64;
    let start = start_line.clamp(1, total_i);
    let end = end_line.unwrap_or(total_i).clamp(1, total_i);
    let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
    lines[(lo - 1) as usize..hi as usize].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn extracts_inclusive_line_range() {
        let f = write_temp("a\nb\nc\nd\ne\n");
        assert_eq!(extract_line_range(f.path(), 2, Some(4)), "b\nc\nd");
    }

    #[test]
    fn no_end_line_runs_to_end_of_file() {
        let f = write_temp("a\nb\nc\n");
        assert_eq!(extract_line_range(f.path(), 2, None), "b\nc");
    }

    #[test]
    fn out_of_range_start_clamps_instead_of_panicking() {
        let f = write_temp("a\nb\n");
        assert_eq!(extract_line_range(f.path(), 100, Some(200)), "b");
    }

    #[test]
    fn missing_file_returns_empty_string() {
        assert_eq!(extract_line_range(Path::new("/nonexistent/path.md"), 1, None), "");
    }
}
