//! 递归下降解析器
//!
//! ```text
//! expr       := comparison
//! comparison := additive ( ("==" | "!=" | "<" | ">" | "<=" | ">=") additive )?
//! additive   := term ( ("+" | "-") term )*
//! term       := unary ( ("*" | "/" | "%") unary )*
//! unary      := "-" unary | primary
//! primary    := NUMBER | STRING | "true" | "false" | PATH | "(" expr ")"
//! ```

use super::ast::{BinaryOp, Expr, Node};
use super::lexer::{Span, SpannedToken, Token};
use crate::fact::FieldPath;

/// 括号与一元负号的最大嵌套层数
pub const MAX_NESTING: usize = 64;

/// 语法树的最大高度，求值按树高递归
pub const MAX_TREE_DEPTH: usize = 256;

/// 语法错误
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

pub struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    source_len: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [SpannedToken], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            source_len,
            nesting: 0,
        }
    }

    /// 解析完整表达式，要求消费全部 token
    pub fn parse(mut self) -> Result<Node, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError {
                message: "表达式为空".to_string(),
                span: 0..self.source_len,
            });
        }

        let node = self.parse_comparison()?;
        if let Some((token, span)) = self.tokens.get(self.pos) {
            return Err(ParseError {
                message: format!("多余的输入 '{}'", token),
                span: span.clone(),
            });
        }
        Ok(node)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| s.clone())
            .unwrap_or(self.source_len..self.source_len)
    }

    fn advance(&mut self) -> Option<&'a SpannedToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn binary(op: BinaryOp, left: Node, right: Node) -> Result<Node, ParseError> {
        let span = left.span.start..right.span.end;
        let node = Node::new(
            Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        );
        if node.depth() > MAX_TREE_DEPTH {
            return Err(ParseError {
                message: format!("表达式过长，语法树高度超过 {}", MAX_TREE_DEPTH),
                span: node.span,
            });
        }
        Ok(node)
    }

    /// 进入一层嵌套，超过上限时报错
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.nesting >= MAX_NESTING {
            return Err(ParseError {
                message: format!("表达式嵌套超过 {} 层", MAX_NESTING),
                span: self.peek_span(),
            });
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn parse_comparison(&mut self) -> Result<Node, ParseError> {
        self.nested(Self::parse_comparison_inner)
    }

    fn parse_comparison_inner(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_additive()?;

        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;

        let right = self.parse_additive()?;
        Self::binary(op, left, right)
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_term()?;

        loop {
            let op = if self.match_token(&Token::Plus) {
                BinaryOp::Add
            } else if self.match_token(&Token::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };

            let right = self.parse_term()?;
            left = Self::binary(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = if self.match_token(&Token::Star) {
                BinaryOp::Mul
            } else if self.match_token(&Token::Slash) {
                BinaryOp::Div
            } else if self.match_token(&Token::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };

            let right = self.parse_unary()?;
            left = Self::binary(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let start = self.peek_span().start;

        if self.match_token(&Token::Minus) {
            let inner = self.nested(Self::parse_unary)?;
            let span = start..inner.span.end;
            Ok(Node::new(Expr::Neg(Box::new(inner)), span))
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let Some((token, span)) = self.advance() else {
            return Err(ParseError {
                message: "表达式意外结束".to_string(),
                span: self.peek_span(),
            });
        };
        let span = span.clone();

        let expr = match token {
            Token::Int(n) => Expr::Int(*n),
            Token::Float(n) => Expr::Float(*n),
            Token::String(s) => Expr::String(s.clone()),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Path(raw) => {
                let path: FieldPath = raw.parse().map_err(|e: crate::fact::InvalidFieldPath| {
                    ParseError {
                        message: e.to_string(),
                        span: span.clone(),
                    }
                })?;
                Expr::Field(path)
            }
            Token::LParen => {
                let inner = self.parse_comparison()?;
                if !self.match_token(&Token::RParen) {
                    return Err(ParseError {
                        message: "缺少右括号".to_string(),
                        span: span.start..self.peek_span().end,
                    });
                }
                let end = self.tokens[self.pos - 1].1.end;
                return Ok(Node::new(inner.expr, span.start..end));
            }
            other => {
                return Err(ParseError {
                    message: format!("意外的符号 '{}'", other),
                    span,
                });
            }
        };

        Ok(Node::new(expr, span))
    }
}
