//! Recursive-descent parser: tokens -> [`Expr`].
//!
//! Precedence, loosest first: comparison, `+ -`, `* /`, `^` (right associative),
//! unary minus. A leading `=` (spreadsheet style) is ignored.

use super::ast::{BinaryOp, Expr, Reference, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::ParseError;

pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, cursor: 0, len: src.len() };

    if parser.peek() == Some(&Token::Eq) {
        parser.cursor += 1;
    }
    if parser.peek().is_none() {
        return Err(ParseError::new(0, "empty formula"));
    }

    let expr = parser.expr()?;
    match parser.tokens.get(parser.cursor) {
        None => Ok(expr),
        Some(t) => Err(ParseError::new(t.pos, format!("unexpected {:?} after expression", t.token))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + offset).map(|s| &s.token)
    }

    fn pos(&self) -> usize {
        self.tokens.get(self.cursor).map_or(self.len, |s| s.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.cursor).map(|s| s.token.clone());
        self.cursor += 1;
        t
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        let pos = self.pos();
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(ParseError::new(pos, format!("expected {}, found {:?}", what, t))),
            None => Err(ParseError::new(pos, format!("expected {}, found end of formula", what))),
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        let pos = self.pos();
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            Some(t) => Err(ParseError::new(pos, format!("expected {}, found {:?}", what, t))),
            None => Err(ParseError::new(pos, format!("expected {}, found end of formula", what))),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.cursor += 1;
        let rhs = self.additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.cursor += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.cursor += 1;
            let rhs = self.power()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.unary()?;
        if self.peek() == Some(&Token::Caret) {
            self.cursor += 1;
            let exponent = self.power()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.cursor += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.cursor += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Text(s)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::OpenPlaceholder) => {
                let reference = self.dotted_reference()?;
                self.expect(Token::ClosePlaceholder, "'}}'")?;
                Ok(Expr::Ref(reference))
            }
            Some(Token::Ident(name)) => self.after_ident(name),
            Some(t) => Err(ParseError::new(pos, format!("unexpected {:?}", t))),
            None => Err(ParseError::new(pos, "unexpected end of formula")),
        }
    }

    fn after_ident(&mut self, name: String) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.cursor += 1;
                let args = self.arguments()?;
                Ok(Expr::Call(name.to_ascii_uppercase(), args))
            }
            Some(Token::Dot) => {
                self.cursor += 1;
                let field = self.ident("field name after '.'")?;
                Ok(Expr::Ref(Reference { qualifier: Some(name), name: field }))
            }
            Some(Token::Bang) => {
                // Rulebook qualifier style: table!{{Field}}
                self.cursor += 1;
                self.expect(Token::OpenPlaceholder, "'{{' after '!'")?;
                let field = self.ident("field name")?;
                self.expect(Token::ClosePlaceholder, "'}}'")?;
                Ok(Expr::Ref(Reference { qualifier: Some(name), name: field }))
            }
            _ => match name.to_ascii_uppercase().as_str() {
                "TRUE" => Ok(Expr::Bool(true)),
                "FALSE" => Ok(Expr::Bool(false)),
                _ => Ok(Expr::Ref(Reference { qualifier: None, name })),
            },
        }
    }

    fn dotted_reference(&mut self) -> Result<Reference, ParseError> {
        let first = self.ident("field name")?;
        if self.peek() == Some(&Token::Dot) && matches!(self.peek_at(1), Some(Token::Ident(_))) {
            self.cursor += 1;
            let name = self.ident("field name")?;
            return Ok(Reference { qualifier: Some(first), name });
        }
        Ok(Reference { qualifier: None, name: first })
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.cursor += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            let pos = self.pos();
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(t) => return Err(ParseError::new(pos, format!("expected ',' or ')', found {:?}", t))),
                None => return Err(ParseError::new(pos, "unclosed argument list")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn r(q: Option<&str>, n: &str) -> Expr {
        Expr::Ref(Reference { qualifier: q.map(String::from), name: n.into() })
    }

    #[test]
    fn test_precedence_and_associativity() {
        // a + b * c ^ d ^ e  ==  a + (b * (c ^ (d ^ e)))
        let e = parse("a + b * c ^ d ^ e").unwrap();
        let expected = Expr::Binary(
            BinaryOp::Add,
            Box::new(r(None, "a")),
            Box::new(Expr::Binary(
                BinaryOp::Mul,
                Box::new(r(None, "b")),
                Box::new(Expr::Binary(
                    BinaryOp::Pow,
                    Box::new(r(None, "c")),
                    Box::new(Expr::Binary(BinaryOp::Pow, Box::new(r(None, "d")), Box::new(r(None, "e")))),
                )),
            )),
        );
        assert_eq!(e, expected);
    }

    #[rstest]
    #[case("system.BaseScale")]
    #[case("{{system.BaseScale}}")]
    #[case("system!{{BaseScale}}")]
    fn test_reference_styles_are_equivalent(#[case] src: &str) {
        assert_eq!(parse(src).unwrap(), r(Some("system"), "BaseScale"));
    }

    #[test]
    fn test_spreadsheet_prefix_and_calls() {
        let e = parse("=power({{ScaleFactor}}, {{Iteration}})").unwrap();
        assert_eq!(e, Expr::Call("POWER".into(), vec![r(None, "ScaleFactor"), r(None, "Iteration")]));
    }

    #[test]
    fn test_booleans_and_comparison() {
        let e = parse("COUNTIF(scales.IsProjected, TRUE)").unwrap();
        assert_eq!(e, Expr::Call("COUNTIF".into(), vec![r(Some("scales"), "IsProjected"), Expr::Bool(true)]));
        let cmp = parse("Iteration >= 4").unwrap();
        assert!(matches!(cmp, Expr::Binary(BinaryOp::Ge, _, _)));
    }

    #[test]
    fn test_references_in_source_order() {
        let e = parse("BaseScale * POWER(system.ScaleFactor, Iteration)").unwrap();
        let names: Vec<String> = e.references().iter().map(|r| r.to_string()).collect();
        assert_eq!(names, vec!["BaseScale", "system.ScaleFactor", "Iteration"]);
    }

    #[rstest]
    #[case("")]
    #[case("=")]
    #[case("1 +")]
    #[case("POWER(1, 2")]
    #[case("(a")]
    #[case("a b")]
    #[case("x.")]
    fn test_malformed_formulas(#[case] src: &str) {
        assert!(parse(src).is_err(), "should reject {:?}", src);
    }
}
