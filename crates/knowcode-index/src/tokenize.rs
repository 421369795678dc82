//! Identifier-aware tokenization for the lexical index.

/// Tokenize code or a query for BM25.
///
/// Splits on non-identifier characters, lowercases, keeps whole identifiers
/// (`parse_config`), and additionally emits camelCase / snake_case
/// subtokens (`parse`, `config`) so both exact-symbol and concept queries
/// match. Whole identifiers survive even at one character (a method named
/// `f` must stay searchable); one-character subtokens are dropped.
pub fn tokenize_code(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        if raw.is_empty() {
            continue;
        }
        let whole = raw.to_ascii_lowercase();
        let subtokens = split_identifier(raw);
        tokens.push(whole.clone());
        for sub in subtokens {
            if sub.len() > 1 && sub != whole {
                tokens.push(sub);
            }
        }
    }
    tokens
}

/// Split an identifier on underscores and camelCase boundaries.
fn split_identifier(identifier: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for piece in identifier.split('_') {
        if piece.is_empty() {
            continue;
        }
        let mut current = String::new();
        let chars: Vec<char> = piece.chars().collect();
        for (i, &c) in chars.iter().enumerate() {
            let boundary = i > 0
                && c.is_ascii_uppercase()
                && (chars[i - 1].is_ascii_lowercase()
                    || chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase()));
            if boundary && !current.is_empty() {
                parts.push(current.to_ascii_lowercase());
                current = String::new();
            }
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_ascii_lowercase());
        }
    }
    parts
}
