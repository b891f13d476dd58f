//! Tokenizer for the formula language.

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    OpenPlaceholder,  // {{
    ClosePlaceholder, // }}
    Bang,
    Dot,
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let pos = i;
        let peek = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, width) = match c {
            '{' if peek == Some('{') => (Token::OpenPlaceholder, 2),
            '}' if peek == Some('}') => (Token::ClosePlaceholder, 2),
            '!' if peek == Some('=') => (Token::Ne, 2),
            '!' => (Token::Bang, 1),
            '.' if !peek.is_some_and(|p| p.is_ascii_digit()) => (Token::Dot, 1),
            ',' => (Token::Comma, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '^' => (Token::Caret, 1),
            '=' if peek == Some('=') => (Token::Eq, 2),
            '=' => (Token::Eq, 1),
            '<' if peek == Some('>') => (Token::Ne, 2),
            '<' if peek == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if peek == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '"' | '\'' => {
                let (text, end) = lex_string(&chars, i, c)?;
                out.push(Spanned { token: Token::Str(text), pos });
                i = end;
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (n, end) = lex_number(&chars, i)?;
                out.push(Spanned { token: Token::Number(n), pos });
                i = end;
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let ident: String = chars[i..end].iter().collect();
                out.push(Spanned { token: Token::Ident(ident), pos });
                i = end;
                continue;
            }
            other => return Err(ParseError::new(pos, format!("unexpected character '{}'", other))),
        };

        out.push(Spanned { token, pos });
        i += width;
    }

    Ok(out)
}

fn lex_string(chars: &[char], start: usize, quote: char) -> Result<(String, usize), ParseError> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            // A doubled quote is an escaped quote.
            if chars.get(i + 1) == Some(&quote) {
                text.push(quote);
                i += 2;
                continue;
            }
            return Ok((text, i + 1));
        }
        text.push(chars[i]);
        i += 1;
    }
    Err(ParseError::new(start, "unterminated string literal"))
}

fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize), ParseError> {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
        end += 1;
    }
    // Exponent: 1e-6, 2.5E+3
    if end < chars.len() && (chars[end] == 'e' || chars[end] == 'E') {
        let mut exp_end = end + 1;
        if exp_end < chars.len() && (chars[exp_end] == '+' || chars[exp_end] == '-') {
            exp_end += 1;
        }
        if exp_end < chars.len() && chars[exp_end].is_ascii_digit() {
            while exp_end < chars.len() && chars[exp_end].is_ascii_digit() {
                exp_end += 1;
            }
            end = exp_end;
        }
    }
    let text: String = chars[start..end].iter().collect();
    text.parse::<f64>()
        .map(|n| (n, end))
        .map_err(|_| ParseError::new(start, format!("invalid number '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_placeholder_and_qualifier_tokens() {
        assert_eq!(
            kinds("systems!{{BaseScale}}"),
            vec![
                Token::Ident("systems".into()),
                Token::Bang,
                Token::OpenPlaceholder,
                Token::Ident("BaseScale".into()),
                Token::ClosePlaceholder,
            ]
        );
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            kinds("1.5e-3 <> .5 ^2"),
            vec![Token::Number(1.5e-3), Token::Ne, Token::Number(0.5), Token::Caret, Token::Number(2.0)]
        );
    }

    #[test]
    fn test_string_with_escaped_quote() {
        assert_eq!(kinds(r#""a""b""#), vec![Token::Str("a\"b".into())]);
        assert!(tokenize("\"open").is_err());
    }

    #[test]
    fn test_rejects_unknown_character() {
        let err = tokenize("A # B").unwrap_err();
        assert_eq!(err.position, 2);
    }
}
