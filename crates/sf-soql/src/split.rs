//! Lexical passes over SOQL text.
//!
//! Splitting works on text in which every quoted literal has been replaced by
//! [`LITERAL_MARKER`], so that parentheses and keywords inside strings never
//! affect the scan. Each `(SELECT ...)` span is then cut out, leaving
//! `(&)` in the parent, and split again recursively.

use crate::error::{Error, ErrorKind, Result};

/// Stands for one quoted string literal in marked text.
pub const LITERAL_MARKER: char = '@';

/// Stands for one nested subquery in split text.
pub const SUBQUERY_MARKER: char = '&';

/// A positional bind parameter placeholder.
pub const PARAM_PLACEHOLDER: &str = "%s";

/// Words that are never used as column aliases and that are followed by a
/// space when directly followed by `(`.
pub const RESERVED_WORDS: &[&str] = &[
    "AND", "ASC", "DESC", "EXCLUDES", "FIRST", "FROM", "GROUP", "HAVING", "IN", "INCLUDES", "LAST",
    "LIKE", "LIMIT", "NOT", "NULL", "NULLS", "OR", "SELECT", "WHERE", "WITH",
];

pub(crate) fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_allowed_outside_literal(c: char) -> bool {
    is_word_char(c) || c.is_whitespace() || "-!()*+,.:<=>|%".contains(c)
}

/// Quote and escape a string as a SOQL literal.
pub fn quote_literal(text: &str) -> String {
    busbar_sf_client::security::soql::quote_string(text)
}

/// Replace every quoted string literal by [`LITERAL_MARKER`].
///
/// Returns the marked text and the unescaped literal values in order. Only
/// `\\` and `\'` escapes are accepted inside literals. Any character outside
/// a literal that cannot appear in plain SOQL (a stray quote, a backslash,
/// the marker characters themselves) is rejected, so that a broken escape
/// fails loudly instead of shifting the literal boundaries.
pub fn mark_quoted_strings(soql: &str) -> Result<(String, Vec<String>)> {
    let mut marked = String::with_capacity(soql.len());
    let mut literals = Vec::new();
    let mut chars = soql.chars();

    while let Some(c) = chars.next() {
        if c != '\'' {
            if !is_allowed_outside_literal(c) {
                return Err(Error::parse(
                    format!("Character {c:?} is not allowed outside quoted strings"),
                    soql,
                ));
            }
            marked.push(c);
            continue;
        }

        let mut literal = String::new();
        loop {
            match chars.next() {
                Some('\'') => break,
                Some('\\') => match chars.next() {
                    Some(escaped @ ('\\' | '\'')) => literal.push(escaped),
                    _ => return Err(Error::parse("Invalid escape in string literal", soql)),
                },
                Some(other) => literal.push(other),
                None => return Err(Error::parse("Unterminated string literal", soql)),
            }
        }
        literals.push(literal);
        marked.push(LITERAL_MARKER);
    }

    Ok((marked, literals))
}

/// Reverse of [`mark_quoted_strings`]: put the quoted literals back.
pub fn subst_quoted_strings(marked: &str, literals: &[String]) -> Result<String> {
    let markers = marked.matches(LITERAL_MARKER).count();
    if markers != literals.len() {
        return Err(Error::parse(
            format!(
                "Text has {markers} literal markers but {} literals were given",
                literals.len()
            ),
            marked,
        ));
    }

    let mut out = String::with_capacity(marked.len());
    let mut literals = literals.iter();
    for c in marked.chars() {
        if c != LITERAL_MARKER {
            out.push(c);
        } else if let Some(literal) = literals.next() {
            out.push_str(&quote_literal(literal));
        }
    }
    Ok(out)
}

/// Normalize whitespace so that later passes can rely on fixed spellings.
///
/// Whitespace next to punctuation is removed, other whitespace runs become
/// one space, and a space is put between `,` or a reserved word and a
/// following `(`, and between `)` and a following word.
pub fn simplify_expression(text: &str) -> String {
    let chars: Vec<char> = text.trim().chars().collect();

    let mut after_punct: Vec<char> = Vec::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        if c.is_whitespace() && i > 0 && !is_word_char(chars[i - 1]) {
            continue;
        }
        after_punct.push(c);
    }

    let mut minimal: Vec<char> = Vec::with_capacity(after_punct.len());
    for (i, &c) in after_punct.iter().enumerate() {
        if c.is_whitespace() {
            if after_punct.get(i + 1).is_some_and(|&next| !is_word_char(next)) {
                continue;
            }
            minimal.push(' ');
        } else {
            minimal.push(c);
        }
    }

    let mut out = String::with_capacity(minimal.len() + 8);
    for (i, &c) in minimal.iter().enumerate() {
        if c == '(' && needs_space_before_paren(&out) {
            out.push(' ');
        }
        out.push(c);
        if c == ')' && minimal.get(i + 1).is_some_and(|&next| is_word_char(next)) {
            out.push(' ');
        }
    }
    out
}

fn needs_space_before_paren(preceding: &str) -> bool {
    if preceding.ends_with(',') {
        return true;
    }
    let word_start = preceding
        .char_indices()
        .rev()
        .take_while(|&(_, c)| is_word_char(c))
        .last()
        .map(|(i, _)| i);
    match word_start {
        Some(start) => RESERVED_WORDS.contains(&&preceding[start..]),
        None => false,
    }
}

/// Find the outermost parenthesis pair at or after byte offset `start`.
///
/// Returns `(opening, closing)` where `closing` is one past the `)`, or
/// `None` when no pair is closed before the end of the text. A `)` met before
/// any `(` is an error.
pub fn find_closing_parenthesis(text: &str, start: usize) -> Result<Option<(usize, usize)>> {
    let mut level = 0usize;
    let mut opening = 0usize;
    for (offset, byte) in text.bytes().enumerate().skip(start) {
        match byte {
            b'(' => {
                if level == 0 {
                    opening = offset;
                }
                level += 1;
            }
            b')' => {
                if level == 0 {
                    return Err(Error::new(ErrorKind::UnbalancedParenthesis { position: offset }));
                }
                level -= 1;
                if level == 0 {
                    return Ok(Some((opening, offset + 1)));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Apply `transform` to every part of `soql` outside `(SELECT ...)` spans.
///
/// The subqueries themselves are copied unchanged.
pub fn transform_except_subquery<F>(soql: &str, mut transform: F) -> Result<String>
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(soql.len());
    let mut start = 0;
    while let Some(found) = soql[start..].find("(SELECT") {
        let pos = start + found;
        out.push_str(&transform(&soql[start..pos]));
        let (open, close) = find_closing_parenthesis(soql, pos)?
            .ok_or_else(|| Error::parse("Unterminated subquery", soql))?;
        out.push_str(&soql[open..close]);
        start = close;
    }
    out.push_str(&transform(&soql[start..]));
    Ok(out)
}

/// A query with its subqueries cut out.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitQuery<P> {
    /// Normalized text with `@` for literals and `(&)` for subqueries.
    pub soql: String,
    /// Bind parameters that belong to this level, in order.
    pub params: Vec<P>,
    /// Literal values that belong to this level, in order.
    pub literals: Vec<String>,
    /// Subqueries in the order of their `&` placeholders.
    pub subqueries: Vec<SplitQuery<P>>,
}

impl<P: Clone> SplitQuery<P> {
    /// Marked text with every subquery put back, and all literals in order.
    pub fn marked(&self) -> (String, Vec<String>) {
        let children: Vec<(String, Vec<String>)> =
            self.subqueries.iter().map(SplitQuery::marked).collect();
        interleave(&self.soql, &self.literals, &children)
    }

    /// All bind parameters in textual order, including those of subqueries.
    pub fn all_params(&self) -> Vec<P> {
        let mut params = Vec::with_capacity(self.params.len());
        let mut own = self.params.iter();
        let mut children = self.subqueries.iter();
        let mut rest = self.soql.as_str();
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix(PARAM_PLACEHOLDER) {
                params.extend(own.next().cloned());
                rest = tail;
            } else {
                let mut chars = rest.chars();
                if chars.next() == Some(SUBQUERY_MARKER) {
                    if let Some(child) = children.next() {
                        params.extend(child.all_params());
                    }
                }
                rest = chars.as_str();
            }
        }
        params
    }

    /// The normalized query text with subqueries and literals put back.
    pub fn reassemble(&self) -> Result<String> {
        let (marked, literals) = self.marked();
        subst_quoted_strings(&marked, &literals)
    }
}

/// Rebuild marked text from a template containing `@` and `&` markers.
pub(crate) fn interleave(
    template: &str,
    literals: &[String],
    children: &[(String, Vec<String>)],
) -> (String, Vec<String>) {
    let mut out = String::with_capacity(template.len());
    let mut all_literals = Vec::with_capacity(literals.len());
    let mut own = literals.iter();
    let mut nested = children.iter();
    for c in template.chars() {
        if c == LITERAL_MARKER {
            all_literals.extend(own.next().cloned());
            out.push(c);
        } else if c == SUBQUERY_MARKER {
            if let Some((text, child_literals)) = nested.next() {
                out.push_str(text);
                all_literals.extend(child_literals.iter().cloned());
            }
        } else {
            out.push(c);
        }
    }
    (out, all_literals)
}

/// Split `soql` into top-level text and nested subqueries.
///
/// `params` are the positional bind parameters for the `%s` placeholders
/// of the whole text; each level of the result receives its own slice.
pub fn split_subquery<P: Clone>(soql: &str, params: &[P]) -> Result<SplitQuery<P>> {
    let (marked, literals) = mark_quoted_strings(soql)?;
    let placeholders = marked.matches(PARAM_PLACEHOLDER).count();
    if placeholders != params.len() {
        return Err(Error::new(ErrorKind::ParamCount {
            placeholders,
            params: params.len(),
        }));
    }
    split_marked(&simplify_expression(&marked), params.to_vec(), literals)
}

/// Split already marked and simplified text.
pub(crate) fn split_marked<P: Clone>(
    text: &str,
    params: Vec<P>,
    literals: Vec<String>,
) -> Result<SplitQuery<P>> {
    struct Cursor<'a, P> {
        text: &'a str,
        params: &'a [P],
        literals: &'a [String],
        start: usize,
        param: usize,
        literal: usize,
    }

    impl<P: Clone> Cursor<'_, P> {
        fn take(&mut self, end: usize) -> (String, Vec<P>, Vec<String>) {
            let fragment = &self.text[self.start..end];
            let n_params = fragment.matches(PARAM_PLACEHOLDER).count();
            let n_literals = fragment.matches(LITERAL_MARKER).count();
            let out = (
                fragment.to_string(),
                slice_of(self.params, self.param, n_params),
                slice_of(self.literals, self.literal, n_literals),
            );
            self.start = end;
            self.param += n_params;
            self.literal += n_literals;
            out
        }
    }

    if text.matches(LITERAL_MARKER).count() != literals.len() {
        return Err(Error::parse("Literal count does not match the marked text", text));
    }

    let mut cursor = Cursor {
        text,
        params: &params,
        literals: &literals,
        start: 0,
        param: 0,
        literal: 0,
    };
    let mut soql = String::with_capacity(text.len());
    let mut own_params = Vec::new();
    let mut own_literals = Vec::new();
    let mut subqueries = Vec::new();

    while let Some(pos) = find_subquery(text, cursor.start) {
        let (fragment, frag_params, frag_literals) = cursor.take(pos + 1);
        soql.push_str(&fragment);
        soql.push(SUBQUERY_MARKER);
        own_params.extend(frag_params);
        own_literals.extend(frag_literals);

        let (_, close) = find_closing_parenthesis(text, pos)?
            .ok_or_else(|| Error::parse("Unterminated subquery", text))?;
        let (inner, inner_params, inner_literals) = cursor.take(close - 1);
        subqueries.push(split_marked(&inner, inner_params, inner_literals)?);
    }

    let (fragment, frag_params, frag_literals) = cursor.take(text.len());
    soql.push_str(&fragment);
    own_params.extend(frag_params);
    own_literals.extend(frag_literals);

    Ok(SplitQuery {
        soql,
        params: own_params,
        literals: own_literals,
        subqueries,
    })
}

fn slice_of<T: Clone>(items: &[T], start: usize, len: usize) -> Vec<T> {
    items.iter().skip(start).take(len).cloned().collect()
}

/// Byte offset of the next `(SELECT` followed by a word boundary.
fn find_subquery(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    (from..bytes.len()).find(|&pos| {
        bytes[pos] == b'('
            && bytes
                .get(pos + 1..pos + 7)
                .is_some_and(|word| word.eq_ignore_ascii_case(b"SELECT"))
            && bytes
                .get(pos + 7)
                .is_none_or(|&next| !(next.is_ascii_alphanumeric() || next == b'_' || next >= 0x80))
    })
}
