//! Lexical analysis: comment stripping, tokenization, signature-comment
//! removal and pair balancing.

use super::SourceError;

/// Cut every line at the first `/`; the rest of the line is a comment.
fn strip_comments(source: &str) -> String {
    source
        .lines()
        .map(|line| line.split('/').next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split the source into tokens.
///
/// Tokens are whitespace-separated except for string literals: a token
/// starting with `."` runs to the next unescaped `"` and keeps its inner
/// spaces. Signature comments between `(` and `)` are removed here as well.
pub fn tokenize(source: &str) -> Result<Vec<String>, SourceError> {
    let text = strip_comments(source);
    let mut tokens = Vec::new();

    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        token.push(chars.next().unwrap());

        if token == "." && chars.peek() == Some(&'"') {
            // string literal: consume up to the next unescaped quote
            token.push(chars.next().unwrap());
            let mut closed = false;
            while let Some(c) = chars.next() {
                token.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        token.push(escaped);
                    }
                    continue;
                }
                if c == '"' {
                    closed = true;
                    break;
                }
            }
            if !closed {
                return Err(SourceError::UnterminatedString(token));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(chars.next().unwrap());
            }
        }

        tokens.push(token);
    }

    strip_signatures(tokens)
}

/// Drop everything between `(` and `)`. Nesting must balance.
fn strip_signatures(tokens: Vec<String>) -> Result<Vec<String>, SourceError> {
    let mut kept = Vec::new();
    let mut depth = 0usize;
    for token in tokens {
        match token.as_str() {
            "(" => depth += 1,
            ")" => {
                if depth == 0 {
                    return Err(SourceError::UnbalancedComment);
                }
                depth -= 1;
            }
            _ if depth == 0 => kept.push(token),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SourceError::UnbalancedComment);
    }
    Ok(kept)
}

/// Check that every `begin`/`until`, `if`/`then` and `:`/`;` pair balances,
/// and that no definition opens inside another.
pub fn check_balance(tokens: &[String]) -> Result<(), SourceError> {
    let mut depth: i32 = 0;
    for token in tokens {
        match token.as_str() {
            "begin" => depth += 1,
            "until" => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(SourceError::UnbalancedLoop);
        }
    }
    if depth != 0 {
        return Err(SourceError::UnbalancedLoop);
    }

    depth = 0;
    for token in tokens {
        match token.as_str() {
            "if" => depth += 1,
            "then" => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(SourceError::UnbalancedConditional);
        }
    }
    if depth != 0 {
        return Err(SourceError::UnbalancedConditional);
    }

    let mut in_definition = false;
    for token in tokens {
        match token.as_str() {
            ":" => {
                if in_definition {
                    return Err(SourceError::NestedDefinition);
                }
                in_definition = true;
            }
            ";" => {
                if !in_definition {
                    return Err(SourceError::UnbalancedDefinition);
                }
                in_definition = false;
            }
            _ => {}
        }
    }
    if in_definition {
        return Err(SourceError::UnbalancedDefinition);
    }

    Ok(())
}

/// The characters of a string-literal token, escapes resolved.
///
/// The token shape is `." <content>"`; the single space after `."` is the
/// delimiter and is not part of the content.
pub fn string_contents(token: &str) -> String {
    let body = token
        .strip_prefix(".\"")
        .unwrap_or(token)
        .strip_suffix('"')
        .unwrap_or(token);
    let body = body.strip_prefix(' ').unwrap_or(body);

    let mut contents = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => contents.push(escaped),
                None => contents.push('\\'),
            }
        } else {
            contents.push(c);
        }
    }
    contents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<String> {
        tokenize(source).unwrap()
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(toks("1 2 +\n dup"), vec!["1", "2", "+", "dup"]);
    }

    #[test]
    fn line_comments_vanish() {
        assert_eq!(toks("1 / one\n2 / two"), vec!["1", "2"]);
        assert_eq!(toks("/ only a comment"), Vec::<String>::new());
    }

    #[test]
    fn string_literals_keep_their_spaces() {
        assert_eq!(
            toks(".\" Hello, World!\" dup"),
            vec![".\" Hello, World!\"", "dup"]
        );
    }

    #[test]
    fn escaped_quotes_stay_inside() {
        assert_eq!(toks(r#"." a\"b""#), vec![r#"." a\"b""#]);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(
            tokenize(".\" oops"),
            Err(SourceError::UnterminatedString(_))
        ));
    }

    #[test]
    fn signature_comments_vanish() {
        assert_eq!(toks(": sq ( n -- n*n ) dup ;"), vec![":", "sq", "dup", ";"]);
        assert_eq!(toks("( a ( nested ) b ) 1"), vec!["1"]);
    }

    #[test]
    fn signature_comments_must_balance() {
        assert_eq!(tokenize("( a").unwrap_err(), SourceError::UnbalancedComment);
        assert_eq!(tokenize(") a").unwrap_err(), SourceError::UnbalancedComment);
    }

    #[test]
    fn balance_accepts_proper_nesting() {
        let tokens = toks(": f begin if then until ; begin until");
        assert!(check_balance(&tokens).is_ok());
    }

    #[test]
    fn balance_rejects_leftovers() {
        assert_eq!(
            check_balance(&toks("begin begin until")).unwrap_err(),
            SourceError::UnbalancedLoop
        );
        assert_eq!(
            check_balance(&toks("if")).unwrap_err(),
            SourceError::UnbalancedConditional
        );
        assert_eq!(
            check_balance(&toks("; ")).unwrap_err(),
            SourceError::UnbalancedDefinition
        );
    }

    #[test]
    fn nested_definitions_are_rejected() {
        assert_eq!(
            check_balance(&toks(": outer : inner ; ;")).unwrap_err(),
            SourceError::NestedDefinition
        );
    }

    #[test]
    fn string_contents_strips_the_delimiter_space() {
        assert_eq!(string_contents(".\" Hello\""), "Hello");
        assert_eq!(string_contents(".\"  two\""), " two");
        assert_eq!(string_contents(r#"." a\"b""#), "a\"b");
        assert_eq!(string_contents(".\"\""), "");
    }
}
