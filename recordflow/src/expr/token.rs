//! Tokenizer for the expression language.

use super::EvalError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal.
    Number(f64),
    /// String literal (single or double quoted).
    Str(String),
    /// Identifier or keyword-adjacent name.
    Ident(String),
    /// `true` literal.
    True,
    /// `false` literal.
    False,
    /// `null` literal.
    Null,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Not,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `?`
    Question,
    /// `:`
    Colon,
}

/// Tokenizes an expression string.
///
/// # Errors
///
/// Returns [`EvalError::Syntax`] on unterminated strings, malformed numbers
/// or unexpected characters.
pub fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                // A leading dot on a digit is part of a number literal.
                if chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                    let (tok, next) = lex_number(&chars, i)?;
                    tokens.push(tok);
                    i = next;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(EvalError::Syntax(
                        "single '=' is not an operator; use '=='".to_string(),
                    ));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Lte);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Gte);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(EvalError::Syntax("expected '&&'".to_string()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(EvalError::Syntax("expected '||'".to_string()));
                }
            }
            '\'' | '"' => {
                let (tok, next) = lex_string(&chars, i)?;
                tokens.push(tok);
                i = next;
            }
            _ if c.is_ascii_digit() => {
                let (tok, next) = lex_number(&chars, i)?;
                tokens.push(tok);
                i = next;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            _ => {
                return Err(EvalError::Syntax(format!("unexpected character '{c}'")));
            }
        }
    }

    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> Result<(Token, usize), EvalError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((Token::Str(out), i + 1));
        }
        if c == '\\' {
            let escaped = chars
                .get(i + 1)
                .ok_or_else(|| EvalError::Syntax("unterminated escape".to_string()))?;
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '\\' => '\\',
                '\'' => '\'',
                '"' => '"',
                other => {
                    return Err(EvalError::Syntax(format!("invalid escape '\\{other}'")));
                }
            });
            i += 2;
        } else {
            out.push(c);
            i += 1;
        }
    }

    Err(EvalError::Syntax("unterminated string literal".to_string()))
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), EvalError> {
    let mut i = start;
    let mut seen_dot = false;

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !seen_dot && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }

    let text: String = chars[start..i].iter().collect();
    let value: f64 = text
        .parse()
        .map_err(|_| EvalError::Syntax(format!("invalid number '{text}'")))?;
    Ok((Token::Number(value), i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tokenize_arithmetic() {
        let tokens = tokenize("1 + 2 * 3").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(1.0),
                Token::Plus,
                Token::Number(2.0),
                Token::Star,
                Token::Number(3.0),
            ]
        );
    }

    #[test]
    fn test_tokenize_field_access() {
        let tokens = tokenize("input.price").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("input".to_string()),
                Token::Dot,
                Token::Ident("price".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_decimal_vs_dot() {
        assert_eq!(tokenize("1.5").unwrap(), vec![Token::Number(1.5)]);
        assert_eq!(tokenize(".5").unwrap(), vec![Token::Number(0.5)]);
    }

    #[test]
    fn test_tokenize_strings_both_quotes() {
        assert_eq!(
            tokenize("'abc'").unwrap(),
            vec![Token::Str("abc".to_string())]
        );
        assert_eq!(
            tokenize("\"a\\nb\"").unwrap(),
            vec![Token::Str("a\nb".to_string())]
        );
    }

    #[test]
    fn test_tokenize_comparison_operators() {
        let tokens = tokenize("a >= 1 && b != 2").unwrap();
        assert!(tokens.contains(&Token::Gte));
        assert!(tokens.contains(&Token::AndAnd));
        assert!(tokens.contains(&Token::NotEq));
    }

    #[test]
    fn test_tokenize_keywords() {
        assert_eq!(
            tokenize("true false null").unwrap(),
            vec![Token::True, Token::False, Token::Null]
        );
    }

    #[test]
    fn test_tokenize_rejects_garbage() {
        assert!(tokenize("1 @ 2").is_err());
        assert!(tokenize("'unterminated").is_err());
        assert!(tokenize("a = b").is_err());
    }
}
