//! Name encoding between standard and provider-restricted forms
//!
//! The provider rejects a handful of characters in file and directory
//! names (`"*:<>?|\`, control characters) and mangles leading or trailing
//! spaces, dots, and tildes. Every name crossing the wire boundary is
//! encoded on the way out and decoded on the way back, so the core's
//! caches and handles only ever hold standard names.
//!
//! The escape scheme uses the fullwidth percent sign `％` (U+FF05) as an
//! introducer: a restricted ASCII character `c` becomes `％XX` with `XX`
//! the uppercase hex of `c`, and a literal `％` becomes `％％`. The
//! scheme is self-inverse, so `decode(encode(name)) == name` for every
//! input.

/// Escape introducer: fullwidth percent sign
const ESCAPE: char = '％';

/// Characters the provider rejects anywhere in a name
const RESTRICTED: &[char] = &['"', '*', ':', '<', '>', '?', '|', '\\'];

/// Which positional rules to apply in addition to the restricted set
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncodingFlags {
    /// Escape a leading space, dot, or tilde
    #[serde(default = "default_true")]
    pub escape_leading: bool,
    /// Escape a trailing space or dot
    #[serde(default = "default_true")]
    pub escape_trailing: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EncodingFlags {
    fn default() -> Self {
        Self {
            escape_leading: true,
            escape_trailing: true,
        }
    }
}

/// Encoder applied to every name crossing the provider boundary
#[derive(Debug, Clone, Copy, Default)]
pub struct NameEncoder {
    flags: EncodingFlags,
}

impl NameEncoder {
    /// Create an encoder with the given positional flags
    #[must_use]
    pub fn new(flags: EncodingFlags) -> Self {
        Self { flags }
    }

    /// Returns true if the character must be escaped wherever it appears
    fn is_restricted(c: char) -> bool {
        RESTRICTED.contains(&c) || c.is_control()
    }

    /// Push the escaped form of an ASCII character
    fn push_escaped(out: &mut String, c: char) {
        out.push(ESCAPE);
        out.push_str(&format!("{:02X}", c as u32));
    }

    /// Encode a standard name into the provider-restricted form
    #[must_use]
    pub fn encode(&self, name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        let last_index = name.chars().count().saturating_sub(1);

        for (i, c) in name.chars().enumerate() {
            let leading_hit = self.flags.escape_leading
                && i == 0
                && matches!(c, ' ' | '.' | '~');
            let trailing_hit = self.flags.escape_trailing
                && i == last_index
                && matches!(c, ' ' | '.');

            if c == ESCAPE {
                out.push(ESCAPE);
                out.push(ESCAPE);
            } else if Self::is_restricted(c) || leading_hit || trailing_hit {
                Self::push_escaped(&mut out, c);
            } else {
                out.push(c);
            }
        }

        out
    }

    /// Decode a provider-form name back into the standard form
    ///
    /// Malformed escapes (a `％` not followed by `％` or two hex digits)
    /// are passed through literally rather than failing, since they can
    /// only come from names created outside this client.
    #[must_use]
    pub fn decode(&self, name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        let mut chars = name.chars().peekable();

        while let Some(c) = chars.next() {
            if c != ESCAPE {
                out.push(c);
                continue;
            }

            if chars.peek() == Some(&ESCAPE) {
                chars.next();
                out.push(ESCAPE);
                continue;
            }

            let hi_char = chars.peek().copied();
            let Some(hi) = hi_char.and_then(|h| h.to_digit(16)) else {
                out.push(c);
                continue;
            };
            chars.next();
            let Some(lo) = chars.peek().copied().and_then(|l| l.to_digit(16)) else {
                // Lone high digit: emit what we consumed
                out.push(c);
                if let Some(h) = hi_char {
                    out.push(h);
                }
                continue;
            };
            chars.next();

            match char::from_u32(hi * 16 + lo) {
                Some(decoded) => out.push(decoded),
                None => out.push(c),
            }
        }

        out
    }
}
