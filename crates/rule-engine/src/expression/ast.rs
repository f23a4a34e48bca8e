//! 表达式语法树

use super::lexer::Span;
use crate::fact::FieldPath;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub expr: Expr,
    pub span: Span,
    depth: usize,
}

impl Node {
    pub fn new(expr: Expr, span: Span) -> Self {
        let depth = match &expr {
            Expr::Neg(inner) => inner.depth + 1,
            Expr::Binary { left, right, .. } => left.depth.max(right.depth) + 1,
            _ => 1,
        };
        Self { expr, span, depth }
    }

    /// 以该节点为根的子树高度，叶子为 1
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Field(FieldPath),
    Neg(Box<Node>),
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }
}

impl Node {
    /// 收集表达式引用的所有字段
    pub fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match &self.expr {
            Expr::Field(path) => out.push(path),
            Expr::Neg(inner) => inner.collect_fields(out),
            Expr::Binary { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::Int(_) | Expr::Float(_) | Expr::String(_) | Expr::Bool(_) => {}
        }
    }
}
