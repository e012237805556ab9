// parser.rs — Patch source → AST
//
// chumsky combinators over the token stream produced by `lexer::lex`.
//
// Preconditions: none; lexing happens here.
// Postconditions: `patch` is Some unless recovery failed; lex and parse
//   errors are merged in `errors`.
// Failure modes: syntax errors become `Rich` errors.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub patch: Option<Patch>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a patch source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(lex_result.tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = patch_parser(source);
    let (patch, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| Rich::custom(e.span, e.message))
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        patch,
        errors: all_errors,
    }
}

// ── Grammar ──
//
// One builder so every rule shares the borrowed `source` for identifier text.

fn patch_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Patch, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Lane key: identifier or number, kept as written ──

    let key = just(Token::Ident)
        .ignored()
        .or(select! { Token::Number(_) => () })
        .map_with(move |_, e| {
            let span: SimpleSpan = e.span();
            Ident {
                name: source[span.start()..span.end()].to_string(),
                span,
            }
        });

    // ── Instance statement ──

    let count = select! {
        Token::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => n as usize,
    }
    .map_with(|n, e| (n, e.span()));

    let keys = just(Token::Keys).ignore_then(
        key.separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket)),
    );

    let instance_stmt = just(Token::Instance)
        .ignore_then(ident.clone())
        .then(count)
        .then(keys.or_not())
        .map(|((name, (count, count_span)), keys)| {
            StatementKind::Instance(InstanceStmt {
                name,
                count,
                count_span,
                keys,
            })
        });

    // ── Block statement ──

    let arg = select! {
        Token::Number(n) = e => Arg::Number(n, e.span()),
    }
    .or(ident.clone().map(Arg::Ref));

    let args = arg
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let over = just(Token::At).ignore_then(ident.clone());

    let block_stmt = just(Token::Block)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(ident.clone())
        .then(args)
        .then(over.or_not())
        .map(|(((name, op), args), over)| {
            StatementKind::Block(BlockStmt {
                name,
                op,
                args,
                over,
            })
        });

    // ── Statement dispatch ──

    let statement = choice((instance_stmt, block_stmt)).map_with(|kind, e| Statement {
        kind,
        span: e.span(),
    });

    // ── Patch ──

    nl.clone()
        .ignore_then(
            statement
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(move |statements, e| Patch {
            statements,
            span: e.span(),
        })
}

// ── Tests ──
