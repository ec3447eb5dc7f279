//! Size-bounded truncation of captured process output.
//!
//! Small outputs pass through verbatim. Oversized outputs keep the first
//! 500 lines, a marker naming the original size, and as many trailing
//! lines as still fit, so both the start and the end of a long log
//! survive.

/// Byte cap applied to stdout and stderr independently (1 MiB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Lines kept from the start of an oversized output.
const HEAD_LINES: usize = 500;

/// Truncate `output` to at most [`MAX_OUTPUT_SIZE`] bytes.
///
/// Truncation is idempotent: a truncated output is within the cap and
/// passes through unchanged on a second call.
pub fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_SIZE {
        return output.to_string();
    }

    let lines: Vec<&str> = output.lines().collect();

    // Few but huge lines: a plain byte cut loses nothing structural.
    if lines.len() <= HEAD_LINES {
        return cut_at_char_boundary(output, MAX_OUTPUT_SIZE).to_string();
    }

    let marker = format!(
        "\n... [OUTPUT TRUNCATED - Total {} bytes, {} lines] ...\n",
        output.len(),
        lines.len()
    );

    let mut head = lines[..HEAD_LINES].join("\n");
    if head.len() + marker.len() > MAX_OUTPUT_SIZE {
        let budget = MAX_OUTPUT_SIZE.saturating_sub(marker.len());
        head = cut_at_char_boundary(&head, budget).to_string();
    }

    // Fill the remaining budget with trailing lines, scanning backward.
    let mut budget = MAX_OUTPUT_SIZE - head.len() - marker.len();
    let mut tail_start = lines.len();
    for (idx, line) in lines.iter().enumerate().skip(HEAD_LINES).rev() {
        let cost = line.len() + 1;
        if cost > budget {
            break;
        }
        budget -= cost;
        tail_start = idx;
    }

    let mut result = head;
    result.push_str(&marker);
    for line in &lines[tail_start..] {
        result.push_str(line);
        result.push('\n');
    }
    result
}

/// Cut `s` to at most `max` bytes without splitting a UTF-8 character.
fn cut_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(count: usize, width: usize) -> String {
        (0..count)
            .map(|i| format!("line {:05} {}", i, "x".repeat(width)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn small_output_untouched() {
        let s = "hello\nworld\n";
        assert_eq!(truncate_output(s), s);
    }

    #[test]
    fn output_at_cap_untouched() {
        let s = "x".repeat(MAX_OUTPUT_SIZE);
        assert_eq!(truncate_output(&s), s);
    }

    #[test]
    fn few_huge_lines_cut_by_bytes() {
        let s = "y".repeat(MAX_OUTPUT_SIZE + 100);
        let out = truncate_output(&s);
        assert_eq!(out.len(), MAX_OUTPUT_SIZE);
        assert!(!out.contains("OUTPUT TRUNCATED"));
    }

    #[test]
    fn many_lines_keep_head_marker_and_tail() {
        let s = lines(10_000, 200);
        assert!(s.len() > MAX_OUTPUT_SIZE);

        let out = truncate_output(&s);
        assert!(out.len() <= MAX_OUTPUT_SIZE);
        assert!(out.starts_with("line 00000"));
        assert!(out.contains("OUTPUT TRUNCATED"));
        assert!(out.contains(&format!("Total {} bytes, 10000 lines", s.len())));
        // The last line survives.
        assert!(out.contains("line 09999"));
    }

    #[test]
    fn head_is_exactly_five_hundred_lines() {
        let s = lines(10_000, 200);
        let out = truncate_output(&s);
        let marker_pos = out.find("\n... [OUTPUT TRUNCATED").unwrap();
        let head = &out[..marker_pos];
        assert_eq!(head.lines().count(), 500);
        assert!(head.contains("line 00499"));
        assert!(!head.contains("line 00500"));
    }

    #[test]
    fn truncation_is_idempotent() {
        for input in [
            lines(10_000, 200),
            lines(300, 10_000),
            "short".to_string(),
        ] {
            let once = truncate_output(&input);
            let twice = truncate_output(&once);
            assert_eq!(once, twice);
            assert!(once.len() <= MAX_OUTPUT_SIZE);
        }
    }

    #[test]
    fn multibyte_output_not_split_mid_char() {
        let s = "é".repeat(MAX_OUTPUT_SIZE);
        let out = truncate_output(&s);
        assert!(out.len() <= MAX_OUTPUT_SIZE);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
