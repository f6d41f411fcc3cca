// SPDX-License-Identifier: Apache-2.0

//! Byte-offset view over the `sqlparser` tokenizer.
//!
//! The tokenizer reports 1-based line/column positions counted in characters.
//! Normalization slices the original text, so positions are converted to byte
//! offsets here.

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};

pub(crate) struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { text, starts }
    }

    /// Byte offset of a tokenizer location, `None` for the empty location.
    pub(crate) fn offset(&self, location: Location) -> Option<usize> {
        if location.line == 0 || location.column == 0 {
            return None;
        }
        let line = usize::try_from(location.line - 1).ok()?;
        let column = usize::try_from(location.column - 1).ok()?;
        let start = *self.starts.get(line)?;
        self.text[start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| start + i)
    }
}

/// One token with its byte range. `end` is the start of the next token, so
/// ranges tile the text.
pub(crate) struct Lexeme {
    pub start: usize,
    pub end: usize,
    pub token: Token,
}

impl Lexeme {
    pub(crate) fn is_whitespace(&self) -> bool {
        matches!(self.token, Token::Whitespace(_))
    }
}

pub(crate) fn lex(text: &str) -> Result<Vec<Lexeme>, String> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, text)
        .tokenize_with_location()
        .map_err(|e| e.to_string())?;
    let index = LineIndex::new(text);

    let mut positioned = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.token == Token::EOF {
            break;
        }
        let start = index
            .offset(token.span.start)
            .ok_or_else(|| format!("token {} has no position", token.token))?;
        positioned.push((start, token.token));
    }

    let mut lexemes = Vec::with_capacity(positioned.len());
    let mut iter = positioned.into_iter().peekable();
    while let Some((start, token)) = iter.next() {
        let end = iter.peek().map_or(text.len(), |(next, _)| *next);
        lexemes.push(Lexeme { start, end, token });
    }
    Ok(lexemes)
}
