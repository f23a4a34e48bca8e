//! 更新表达式词法分析（logos）

use logos::Logos;

/// 源码中的字节区间
pub type Span = std::ops::Range<usize>;

pub type SpannedToken = (Token, Span);

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", lex_float, priority = 5)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", lex_float, priority = 3)]
    Float(f64),

    #[regex(r"[0-9]+", lex_int, priority = 2)]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, lex_string)]
    #[regex(r"'([^'\\]|\\.)*'", lex_string)]
    String(String),

    #[token("true")]
    True,
    #[token("false")]
    False,

    /// 字段路径，段之间以点号分隔，数组下标段可为纯数字
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z0-9_]+)*", |lex| lex.slice().to_string(), priority = 1)]
    Path(String),

    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Float(n) => write!(f, "{}", n),
            Token::Int(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Path(p) => write!(f, "{}", p),
            Token::EqEq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn lex_int(lex: &mut logos::Lexer<Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn lex_float(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn lex_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let slice = lex.slice();
    let body = &slice[1..slice.len() - 1];

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            _ => return None,
        }
    }
    Some(out)
}

/// 词法错误
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

pub fn lex(input: &str) -> Result<Vec<SpannedToken>, LexError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(input);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(_) => {
                return Err(LexError {
                    message: format!("无法识别的输入 '{}'", &input[span.clone()]),
                    span,
                });
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_tokens(input: &str) -> Vec<Token> {
        lex(input).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex_tokens("42"), vec![Token::Int(42)]);
        assert_eq!(lex_tokens("0.5"), vec![Token::Float(0.5)]);
        assert_eq!(lex_tokens("1e3"), vec![Token::Float(1000.0)]);
    }

    #[test]
    fn test_paths_and_keywords() {
        assert_eq!(
            lex_tokens("impressions_delivered / impression_goal"),
            vec![
                Token::Path("impressions_delivered".to_string()),
                Token::Slash,
                Token::Path("impression_goal".to_string()),
            ]
        );
        assert_eq!(
            lex_tokens("targeting.geo.country bookies.0"),
            vec![
                Token::Path("targeting.geo.country".to_string()),
                Token::Path("bookies.0".to_string()),
            ]
        );
        assert_eq!(lex_tokens("true"), vec![Token::True]);
        assert_eq!(
            lex_tokens("trueish"),
            vec![Token::Path("trueish".to_string())]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            lex_tokens(r#""a\"b" 'c'"#),
            vec![Token::String("a\"b".to_string()), Token::String("c".to_string())]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex_tokens("a <= b != (c % 2)"),
            vec![
                Token::Path("a".to_string()),
                Token::Le,
                Token::Path("b".to_string()),
                Token::Ne,
                Token::LParen,
                Token::Path("c".to_string()),
                Token::Percent,
                Token::Int(2),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_rejects_foreign_syntax() {
        let err = lex("__import__('os').system('ls')").unwrap_err();
        assert_eq!(&"__import__('os').system('ls')"[err.span.clone()], ".");
        assert!(lex("a; b").is_err());
        assert!(lex("[1, 2]").is_err());
    }
}
