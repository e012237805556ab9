// lexer.rs — Tokens of the patch language
//
// Line-oriented: newlines terminate statements, `#` starts a comment that
// runs to the end of the line.
//
// Preconditions: none.
// Postconditions: tokens are in source order with spans in chumsky's
//   `SimpleSpan` form, ready for `parser::parse`.
// Failure modes: a character no token matches becomes a `LexError`; the
//   lexer resumes at the next character.
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;
use logos::Logos;

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: SimpleSpan,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct LexResult {
    pub tokens: Vec<(Token, SimpleSpan)>,
    pub errors: Vec<LexError>,
}

/// Token kinds. Identifier text is recovered from the source via the span.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    #[token("instance")]
    Instance,
    #[token("block")]
    Block,
    #[token("keys")]
    Keys,

    #[token("=")]
    Equals,
    #[token("@")]
    At,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,

    /// Signed decimal, optional fraction and exponent.
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    // Keywords win over this rule on equal length.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    /// A run of line breaks counts once.
    #[regex(r"\n+")]
    Newline,
}

impl Token {
    fn describe(&self) -> &'static str {
        match self {
            Token::Instance => "`instance`",
            Token::Block => "`block`",
            Token::Keys => "`keys`",
            Token::Equals => "`=`",
            Token::At => "`@`",
            Token::LParen => "`(`",
            Token::RParen => "`)`",
            Token::LBracket => "`[`",
            Token::RBracket => "`]`",
            Token::Comma => "`,`",
            Token::Number(_) => "number",
            Token::Ident => "identifier",
            Token::Newline => "end of line",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

pub fn lex(source: &str) -> LexResult {
    let mut out = LexResult::default();
    for (token, range) in Token::lexer(source).spanned() {
        let span = SimpleSpan::from(range.clone());
        match token {
            Ok(token) => out.tokens.push((token, span)),
            Err(()) => out.errors.push(LexError {
                span,
                message: format!("unexpected character {:?}", &source[range]),
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(result.errors.is_empty(), "lex errors: {:?}", result.errors);
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_prefixed_idents() {
        assert_eq!(
            kinds("instance block keys blocks keyset"),
            vec![
                Token::Instance,
                Token::Block,
                Token::Keys,
                Token::Ident,
                Token::Ident
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("3 -0.5 1e3"),
            vec![Token::Number(3.0), Token::Number(-0.5), Token::Number(1000.0)]
        );
    }

    #[test]
    fn comments_and_newlines() {
        assert_eq!(
            kinds("block # trailing\n\n# whole line\nkeys"),
            vec![Token::Block, Token::Newline, Token::Newline, Token::Keys]
        );
    }

    #[test]
    fn keyed_instance_line() {
        use Token::*;
        assert_eq!(
            kinds("instance dots 2 keys [a, 7]"),
            vec![Instance, Ident, Number(2.0), Keys, LBracket, Ident, Comma, Number(7.0), RBracket]
        );
    }

    #[test]
    fn field_block_line() {
        use Token::*;
        assert_eq!(
            kinds("block acc = integrate(x, 0) @ dots"),
            vec![Block, Ident, Equals, Ident, LParen, Ident, Comma, Number(0.0), RParen, At, Ident]
        );
    }

    #[test]
    fn bad_character_is_reported_and_skipped() {
        let result = lex("block $ a");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, SimpleSpan::from(6..7));
        assert_eq!(result.tokens.len(), 2);
    }

    #[test]
    fn tokens_display_for_messages() {
        assert_eq!(Token::RParen.to_string(), "`)`");
        assert_eq!(Token::Newline.to_string(), "end of line");
    }
}
