//! Tokenizer for the filter sub-language.
//!
//! Only what the whitelist check needs is surfaced: identifier-shaped words
//! and quoted identifiers. String and numeric literals are consumed whole so
//! their contents never reach the identifier check.

use warden_types::Rejection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WordKind {
    /// Bare `[A-Za-z_][A-Za-z0-9_]*` word.
    Bare,
    /// `"name"` or `` `name` ``; always a field reference.
    Quoted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub kind: WordKind,
    /// Byte offset of the word (or its opening quote) in the clause.
    pub offset: usize,
}

/// Split `clause` into words, skipping literals, numbers and punctuation.
pub fn words(clause: &str) -> Result<Vec<Word>, Rejection> {
    let mut out = Vec::new();
    let mut chars = clause.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        if c == '\'' {
            // 'it''s' is one literal
            read_quoted(&mut chars, '\'', offset)?;
        } else if c == '"' || c == '`' {
            let text = read_quoted(&mut chars, c, offset)?;
            out.push(Word {
                text,
                kind: WordKind::Quoted,
                offset,
            });
        } else if c.is_ascii_digit() {
            while let Some(&(_, n)) = chars.peek() {
                if is_word_char(n) || n == '.' {
                    chars.next();
                } else {
                    break;
                }
            }
        } else if c.is_alphabetic() || c == '_' {
            let mut text = String::from(c);
            while let Some(&(_, n)) = chars.peek() {
                if is_word_char(n) {
                    text.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push(Word {
                text,
                kind: WordKind::Bare,
                offset,
            });
        }
    }

    Ok(out)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Consume up to the closing `quote`, treating a doubled quote as an escape.
fn read_quoted<I>(
    chars: &mut std::iter::Peekable<I>,
    quote: char,
    start: usize,
) -> Result<String, Rejection>
where
    I: Iterator<Item = (usize, char)>,
{
    let mut text = String::new();
    loop {
        match chars.next() {
            Some((_, c)) if c == quote => {
                if matches!(chars.peek(), Some(&(_, n)) if n == quote) {
                    chars.next();
                    text.push(quote);
                } else {
                    return Ok(text);
                }
            }
            Some((_, c)) => text.push(c),
            None => return Err(Rejection::UnterminatedLiteral { offset: start }),
        }
    }
}
