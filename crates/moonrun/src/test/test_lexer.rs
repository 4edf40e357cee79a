// Lexer tests: token streams, literals, escapes, locations, error recovery.

use crate::compiler::lexer::{Lexer, Token, TokenKind, TokenValue};

fn kinds(source: &str) -> Vec<TokenKind> {
    let (tokens, errors) = Lexer::new(source, "test").tokenize();
    assert!(errors.is_empty(), "unexpected lexer errors: {:?}", errors);
    tokens.iter().map(|t| t.kind).collect()
}

fn tokens_of(source: &str) -> Vec<Token> {
    let (tokens, errors) = Lexer::new(source, "test").tokenize();
    assert!(errors.is_empty(), "unexpected lexer errors: {:?}", errors);
    tokens
}

#[test]
fn test_keywords_and_names() {
    use TokenKind::*;
    assert_eq!(
        kinds("local x = nil"),
        vec![TkLocal, TkName, TkAssign, TkNil, TkEof]
    );
    assert_eq!(
        kinds("while true do end"),
        vec![TkWhile, TkTrue, TkDo, TkEnd, TkEof]
    );
}

#[test]
fn test_operators() {
    use TokenKind::*;
    assert_eq!(
        kinds(":: ... .. << >> // ~= == <= >= < >"),
        vec![
            TkDbColon, TkDots, TkConcat, TkShl, TkShr, TkIDiv, TkNe, TkEq, TkLe, TkGe, TkLt,
            TkGt, TkEof
        ]
    );
}

#[test]
fn test_integer_literals() {
    let tokens = tokens_of("42 0 0xFF 0x10");
    assert_eq!(tokens[0].value, TokenValue::Int(42));
    assert_eq!(tokens[1].value, TokenValue::Int(0));
    assert_eq!(tokens[2].value, TokenValue::Int(255));
    assert_eq!(tokens[3].value, TokenValue::Int(16));
}

#[test]
fn test_float_literals() {
    let tokens = tokens_of("3.5 1e2 2.5e-1 0x1p4 .5");
    assert_eq!(tokens[0].value, TokenValue::Float(3.5));
    assert_eq!(tokens[1].value, TokenValue::Float(100.0));
    assert_eq!(tokens[2].value, TokenValue::Float(0.25));
    assert_eq!(tokens[3].value, TokenValue::Float(16.0));
    assert_eq!(tokens[4].value, TokenValue::Float(0.5));
}

#[test]
fn test_integer_overflow_falls_to_float() {
    let tokens = tokens_of("99999999999999999999");
    assert!(matches!(tokens[0].value, TokenValue::Float(_)));
}

#[test]
fn test_string_escapes() {
    let tokens = tokens_of(r#""a\tb" '\65' "\x41" "\u{48}" "\\" "\"""#);
    assert_eq!(tokens[0].value, TokenValue::Str("a\tb".to_string()));
    assert_eq!(tokens[1].value, TokenValue::Str("A".to_string()));
    assert_eq!(tokens[2].value, TokenValue::Str("A".to_string()));
    assert_eq!(tokens[3].value, TokenValue::Str("H".to_string()));
    assert_eq!(tokens[4].value, TokenValue::Str("\\".to_string()));
    assert_eq!(tokens[5].value, TokenValue::Str("\"".to_string()));
}

#[test]
fn test_z_escape_skips_whitespace() {
    let tokens = tokens_of("\"a\\z  \n\t b\"");
    assert_eq!(tokens[0].value, TokenValue::Str("ab".to_string()));
}

#[test]
fn test_long_strings() {
    let tokens = tokens_of("[[hello]] [==[a]b]==]");
    assert_eq!(tokens[0].value, TokenValue::Str("hello".to_string()));
    assert_eq!(tokens[1].value, TokenValue::Str("a]b".to_string()));
}

#[test]
fn test_long_string_drops_leading_newline() {
    let tokens = tokens_of("[[\nhello]]");
    assert_eq!(tokens[0].value, TokenValue::Str("hello".to_string()));
}

#[test]
fn test_comments_produce_no_tokens() {
    use TokenKind::*;
    assert_eq!(kinds("-- line comment\nx"), vec![TkName, TkEof]);
    assert_eq!(kinds("--[[ block\ncomment ]]x"), vec![TkName, TkEof]);
    assert_eq!(kinds("--[==[ nested ]] ]==]x"), vec![TkName, TkEof]);
}

#[test]
fn test_shebang_skipped() {
    use TokenKind::*;
    assert_eq!(kinds("#!/usr/bin/env lua\nreturn"), vec![TkReturn, TkEof]);
}

#[test]
fn test_line_and_column_tracking() {
    let tokens = tokens_of("a\nbb\r\n  c");
    assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
    assert_eq!((tokens[1].line, tokens[1].column), (2, 1));
    assert_eq!((tokens[2].line, tokens[2].column), (3, 3));
}

#[test]
fn test_all_newline_styles_count_once() {
    for newline in ["\n", "\r", "\r\n", "\n\r"] {
        let source = format!("a{}b", newline);
        let tokens = {
            let (tokens, _) = Lexer::new(&source, "test").tokenize();
            tokens
        };
        assert_eq!(tokens[1].line, 2, "newline {:?}", newline);
    }
}

#[test]
fn test_invalid_input_recovers() {
    let (tokens, errors) = Lexer::new("local ? = 1", "test").tokenize();
    assert!(!errors.is_empty());
    assert!(tokens.iter().any(|t| t.kind == TokenKind::TkInvalid));
    // Lexing continued past the bad byte
    assert!(tokens.iter().any(|t| t.kind == TokenKind::TkAssign));
}

#[test]
fn test_unterminated_string_is_error() {
    let (_, errors) = Lexer::new("\"abc", "test").tokenize();
    assert!(!errors.is_empty());
}

#[test]
fn test_malformed_numbers() {
    for bad in ["0x", "1e", "1e+"] {
        let (tokens, errors) = Lexer::new(bad, "test").tokenize();
        assert!(!errors.is_empty(), "{} should fail", bad);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::TkInvalid));
    }
}

#[test]
fn test_peek_then_next() {
    let mut lexer = Lexer::new("a b", "test");
    assert_eq!(lexer.peek().kind, TokenKind::TkName);
    let first = lexer.next_token();
    assert_eq!(first.kind, TokenKind::TkName);
    assert_eq!(lexer.next_token().kind, TokenKind::TkName);
    assert_eq!(lexer.next_token().kind, TokenKind::TkEof);
}

/// Re-rendering the token stream and lexing again yields the same stream
/// (modulo whitespace, which carries no tokens).
#[test]
fn test_token_stream_round_trip() {
    let source = "local function f(a, b) return a + b * 2 - #'x' end";
    let original = tokens_of(source);
    let mut rendered = String::new();
    for token in &original {
        if token.kind == TokenKind::TkEof {
            continue;
        }
        match &token.value {
            TokenValue::Name(n) => rendered.push_str(n),
            TokenValue::Int(i) => rendered.push_str(&i.to_string()),
            TokenValue::Float(f) => rendered.push_str(&format!("{:?}", f)),
            TokenValue::Str(s) => rendered.push_str(&format!("{:?}", s)),
            TokenValue::None => {
                let described = token.kind.describe();
                rendered.push_str(described.trim_matches('\''));
            }
        }
        rendered.push(' ');
    }
    let again = tokens_of(&rendered);
    let left: Vec<_> = original.iter().map(|t| (t.kind, t.value.clone())).collect();
    let right: Vec<_> = again.iter().map(|t| (t.kind, t.value.clone())).collect();
    assert_eq!(left, right);
}
