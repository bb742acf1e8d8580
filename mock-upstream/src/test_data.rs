//! Content for the `unicode` and `padded` test patterns.

/// Emoji, CJK, 4-byte UTF-8 and mixed-script tokens.
pub const UNICODE_TOKENS: &[&str] = &[
    "\u{1F600}", // Grinning Face
    "\u{1F680}", // Rocket
    "\u{2764}",  // Red Heart (3-byte)
    "\u{4E2D}\u{6587}", // 中文
    "\u{65E5}\u{672C}\u{8A9E}", // 日本語
    "\u{1D400}\u{1D401}\u{1D402}", // Mathematical Bold A B C
    "\u{10348}", // Gothic Letter Hwair
    "Hello 世界! 🌍",
    "한국어 테스트 🇰🇷",
    "Emoji mix: 🚀✨🔥",
];

/// Raw lines with surrounding whitespace and mixed terminators.
///
/// Paired with [`PADDED_TRIMMED`], the tokens a client should see.
pub const PADDED_LINES: &[&str] = &[
    "  hello \n",
    "\tworld\t\r\n",
    "   spaced   out   \n",
    " \u{1F600} \r\n",
    "last\n",
];

pub const PADDED_TRIMMED: &[&str] = &["hello", "world", "spaced   out", "\u{1F600}", "last"];
