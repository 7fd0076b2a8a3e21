//! Fixed character vocabulary shared with the recognition model.
//!
//! Token ids must match the model bit-for-bit: four reserved control tokens
//! first, then every remaining character of the alphabet in listed order.

use std::collections::HashMap;

pub type Token = u32;

pub const PAD_TOKEN: Token = 0;
pub const START_TOKEN: Token = 1;
pub const END_TOKEN: Token = 2;
pub const SPACE_TOKEN: Token = 3;

/// Glyph rendered for token ids the vocabulary does not know.
pub const PLACEHOLDER: char = '?';

/// Ordered alphabet the bundled model was trained on (109 entries, the
/// leading space collapses into [`SPACE_TOKEN`]).
pub const ALPHABET: [char; 109] = [
    ' ', '!', '"', '%', '(', ')', '*', ',', '-', '.', '/', '6',
    ':', '=', '?', '[', ']', '{', '}', '\u{a0}', '\u{ab}', '\u{bb}', '\u{60c}', '\u{61b}',
    '\u{61f}', '\u{621}', '\u{622}', '\u{623}', '\u{624}', '\u{625}', '\u{626}', '\u{627}',
    '\u{628}', '\u{629}', '\u{62a}', '\u{62b}', '\u{62c}', '\u{62d}', '\u{62e}', '\u{62f}',
    '\u{630}', '\u{631}', '\u{632}', '\u{633}', '\u{634}', '\u{635}', '\u{636}', '\u{637}',
    '\u{638}', '\u{639}', '\u{63a}', '\u{640}', '\u{641}', '\u{642}', '\u{643}', '\u{644}',
    '\u{645}', '\u{646}', '\u{647}', '\u{648}', '\u{649}', '\u{64a}', '\u{64b}', '\u{64d}',
    '\u{64e}', '\u{64f}', '\u{651}', '\u{654}', '\u{660}', '\u{661}', '\u{662}', '\u{663}',
    '\u{664}', '\u{665}', '\u{666}', '\u{667}', '\u{668}', '\u{669}', '\u{66a}', '\u{66b}',
    '\u{66c}', '\u{671}', '\u{672}', '\u{67e}', '\u{686}', '\u{68c}', '\u{698}', '\u{69a}',
    '\u{6a4}', '\u{6a8}', '\u{6a9}', '\u{6af}', '\u{6be}', '\u{6c1}', '\u{6c6}', '\u{6c7}',
    '\u{6cc}', '\u{6d4}', '\u{6d5}', '\u{6dd}', '\u{6f2}', '\u{6f9}', '\u{200d}', '\u{2010}',
    '\u{2013}', '\u{2018}', '\u{201c}', '\u{201d}', '\u{2026}',
];

/// Bidirectional char/token table, immutable once built.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// Indexed by token id; `None` for pad/start/end.
    glyphs: Vec<Option<char>>,
    tokens: HashMap<char, Token>,
}

impl Vocabulary {
    /// Build the table from an ordered character list. Duplicates and the
    /// space character keep their first assignment.
    pub fn new(characters: &[char]) -> Self {
        let mut glyphs = vec![None, None, None, Some(' ')];
        let mut tokens = HashMap::with_capacity(characters.len() + 1);
        tokens.insert(' ', SPACE_TOKEN);

        for &ch in characters {
            if tokens.contains_key(&ch) {
                continue;
            }
            tokens.insert(ch, glyphs.len() as Token);
            glyphs.push(Some(ch));
        }

        Self { glyphs, tokens }
    }

    /// Number of token ids, control tokens included.
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn encode(&self, ch: char) -> Option<Token> {
        self.tokens.get(&ch).copied()
    }

    /// Never fails: control tokens and out-of-range ids render as [`PLACEHOLDER`].
    pub fn decode(&self, token: Token) -> char {
        self.glyphs
            .get(token as usize)
            .copied()
            .flatten()
            .unwrap_or(PLACEHOLDER)
    }

    /// Detokenize a generated sequence. Stops at the end token and skips
    /// start/pad tokens wherever they appear.
    pub fn decode_sequence(&self, tokens: &[Token]) -> String {
        let mut text = String::with_capacity(tokens.len());
        for &token in tokens {
            match token {
                END_TOKEN => break,
                START_TOKEN | PAD_TOKEN => continue,
                other => text.push(self.decode(other)),
            }
        }
        text
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(&ALPHABET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_layout() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.len(), 112);
        assert_eq!(vocab.encode(' '), Some(SPACE_TOKEN));
        assert_eq!(vocab.encode('!'), Some(4));
        assert_eq!(vocab.encode('\u{622}'), Some(29));
        assert_eq!(vocab.encode('\u{64a}'), Some(64));
        assert_eq!(vocab.encode('\u{2013}'), Some(107));
        assert_eq!(vocab.encode('\u{2026}'), Some(111));
    }

    #[test]
    fn test_roundtrip_whole_alphabet() {
        let vocab = Vocabulary::default();
        for ch in ALPHABET {
            let token = vocab.encode(ch).unwrap();
            assert_eq!(vocab.decode(token), ch);
        }
    }

    #[test]
    fn test_unknown_tokens_render_placeholder() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.decode(112), PLACEHOLDER);
        assert_eq!(vocab.decode(Token::MAX), PLACEHOLDER);
        assert_eq!(vocab.decode(PAD_TOKEN), PLACEHOLDER);
        assert_eq!(vocab.encode('x'), None);
    }

    #[test]
    fn test_decode_sequence_skips_control_tokens() {
        let vocab = Vocabulary::new(&['a', 'b']);
        let tokens = [START_TOKEN, 4, PAD_TOKEN, SPACE_TOKEN, 5, 99, END_TOKEN, 4];
        assert_eq!(vocab.decode_sequence(&tokens), "a b?");
    }

    #[test]
    fn test_duplicates_keep_first_id() {
        let vocab = Vocabulary::new(&['a', ' ', 'b', 'a']);
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.encode('b'), Some(5));
    }
}
