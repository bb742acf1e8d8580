//! Default token lines: the prompt echoed back, then a counting sequence.

use bytes::Bytes;

const PREAMBLE: &[&str] = &["An", "increasing", "sequence:"];

const NUMBERS: &[&str] = &[
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven",
    "twelve",
];

/// Generated tokens, cycling through the number words if `count` is large.
pub fn counting_tokens(count: usize) -> impl Iterator<Item = String> {
    let numbers = NUMBERS.iter().cycle().map(|word| format!("{},", word));
    PREAMBLE
        .iter()
        .map(|word| word.to_string())
        .chain(numbers)
        .take(count)
}

/// One token per line, `\n` terminated. The first line echoes the prompt.
///
/// Line breaks inside the prompt are flattened so the echo stays one token.
pub fn default_lines(prompt: &str, count: usize) -> Vec<Bytes> {
    let echo: String = prompt
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();

    std::iter::once(echo)
        .filter(|line| !line.trim().is_empty())
        .chain(counting_tokens(count))
        .map(line)
        .collect()
}

/// Terminate a token with `\n`.
pub fn line(token: impl Into<String>) -> Bytes {
    let mut s = token.into();
    s.push('\n');
    Bytes::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_tokens() {
        let tokens: Vec<String> = counting_tokens(5).collect();
        assert_eq!(tokens, ["An", "increasing", "sequence:", "one,", "two,"]);
    }

    #[test]
    fn test_counting_tokens_cycle() {
        let tokens: Vec<String> = counting_tokens(3 + NUMBERS.len() + 1).collect();
        assert_eq!(tokens.last().map(String::as_str), Some("one,"));
    }

    #[test]
    fn test_default_lines_echo_prompt() {
        let lines = default_lines("hi\nthere", 2);
        assert_eq!(lines[0], Bytes::from("hi there\n"));
        assert_eq!(lines[1], Bytes::from("An\n"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_default_lines_without_prompt() {
        let lines = default_lines("", 1);
        assert_eq!(lines, vec![Bytes::from("An\n")]);
    }
}
