// SPDX-License-Identifier: Apache-2.0

//! Query text normalization: every recorded literal becomes `?`.

use sqlparser::tokenizer::Token;
use tracing::debug;

use crate::jumble::ConstLocation;
use crate::lexer::lex;

/// Fills in the length of each literal by lexing the source text.
///
/// Locations are sorted and duplicates dropped. A `-` or `+` token at a
/// literal's location is taken together with the token after it. If the text
/// runs out of tokens before a location, that location and all later ones are
/// left out of the result.
pub fn measure(raw: &str, constants: &[ConstLocation]) -> Vec<ConstLocation> {
    let mut sorted = constants.to_vec();
    sorted.sort_by_key(|c| c.offset);

    let lexemes = match lex(raw) {
        Ok(lexemes) => lexemes,
        Err(message) => {
            debug!("Query text could not be lexed for normalization: {}", message);
            return Vec::new();
        }
    };

    let mut measured = Vec::with_capacity(sorted.len());
    let mut last: Option<usize> = None;
    let mut cursor = 0;

    for constant in sorted {
        if last.is_some_and(|l| constant.offset <= l) || !raw.is_char_boundary(constant.offset) {
            continue;
        }
        while cursor < lexemes.len() && lexemes[cursor].start < constant.offset {
            cursor += 1;
        }
        let Some(first) = lexemes.get(cursor) else {
            debug!(offset = constant.offset, "Ran out of tokens while locating a literal");
            break;
        };

        let mut end = first.end;
        if matches!(first.token, Token::Minus | Token::Plus) {
            if let Some(next) = lexemes[cursor + 1..].iter().find(|l| !l.is_whitespace()) {
                end = next.end;
            }
        }

        measured.push(ConstLocation {
            offset: constant.offset,
            length: Some(end - constant.offset),
        });
        last = Some(constant.offset);
    }

    measured
}

/// Rewrites `raw` with each literal replaced by `?`.
pub fn normalize(raw: &str, constants: &[ConstLocation]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut copied = 0;

    for constant in measure(raw, constants) {
        let Some(length) = constant.length else {
            continue;
        };
        if constant.offset < copied {
            debug!(offset = constant.offset, "Skipping literal overlapping the previous one");
            continue;
        }
        out.push_str(&raw[copied..constant.offset]);
        out.push('?');
        copied = constant.offset + length;
    }

    out.push_str(&raw[copied..]);
    out
}
