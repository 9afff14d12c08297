//! Recursive-descent parser for MiniPython
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr       = and_expr ("or" and_expr)*
//! and_expr   = not_expr ("and" not_expr)*
//! not_expr   = "not" not_expr | comparison
//! comparison = arith (cmp_op arith)?
//! arith      = term (("+" | "-") term)*
//! term       = unary (("*" | "//" | "%") unary)*
//! unary      = "-" unary | primary
//! primary    = INT | STR | FSTR | NAME ["(" args ")"] | "(" expr ")"
//! ```

use super::lexer::{tokenize, tokenize_expr, Spanned, SyntaxError, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Piece of an f-string
#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Text(String),
    Field(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    FStr(Vec<FPart>),
    Bool(bool),
    None,
    Name(String),
    Call { name: String, args: Vec<Expr> },
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        name: String,
        value: Expr,
    },
    AugAssign {
        name: String,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Raise(Option<Expr>),
}

const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "while", "break", "continue", "pass", "raise", "and", "or", "not",
    "True", "False", "None",
];

/// Parse a whole program
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let mut parser = Parser::new(tokenize(source)?);
    let mut program = Vec::new();
    while !parser.at(&Token::Eof) {
        program.push(parser.statement()?);
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    loop_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            loop_depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Token::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Name(n) if n == kw)
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line(), message)
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), SyntaxError> {
        if self.at(&token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SyntaxError> {
        if self.at_op(op) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn end_of_statement(&mut self) -> Result<(), SyntaxError> {
        match self.peek() {
            Token::Newline => {
                self.advance();
                Ok(())
            }
            Token::Eof => Ok(()),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        if let Token::Name(word) = self.peek().clone() {
            match word.as_str() {
                "if" => return self.if_statement(),
                "while" => return self.while_statement(),
                "pass" => {
                    self.advance();
                    self.end_of_statement()?;
                    return Ok(Stmt::Pass);
                }
                "break" | "continue" => {
                    if self.loop_depth == 0 {
                        return Err(self.error(format!("'{}' outside loop", word)));
                    }
                    self.advance();
                    self.end_of_statement()?;
                    return Ok(if word == "break" {
                        Stmt::Break
                    } else {
                        Stmt::Continue
                    });
                }
                "raise" => {
                    self.advance();
                    let value = if matches!(self.peek(), Token::Newline | Token::Eof) {
                        None
                    } else {
                        Some(self.expr()?)
                    };
                    self.end_of_statement()?;
                    return Ok(Stmt::Raise(value));
                }
                "elif" | "else" => return Err(self.error("invalid syntax")),
                _ => {}
            }

            let aug = match self.peek_at(1) {
                Token::Op("=") => Some(None),
                Token::Op("+=") => Some(Some(BinOp::Add)),
                Token::Op("-=") => Some(Some(BinOp::Sub)),
                Token::Op("*=") => Some(Some(BinOp::Mul)),
                _ => None,
            };
            if let Some(op) = aug {
                if KEYWORDS.contains(&word.as_str()) {
                    return Err(self.error("cannot assign to keyword"));
                }
                self.advance();
                self.advance();
                let value = self.expr()?;
                self.end_of_statement()?;
                return Ok(match op {
                    None => Stmt::Assign { name: word, value },
                    Some(op) => Stmt::AugAssign {
                        name: word,
                        op,
                        value,
                    },
                });
            }
        }

        let expr = self.expr()?;
        self.end_of_statement()?;
        Ok(Stmt::Expr(expr))
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect_op(":")?;
        self.expect(Token::Newline, "newline after ':'")?;
        self.expect(Token::Indent, "an indented block")?;
        let mut body = Vec::new();
        while !self.at(&Token::Dedent) && !self.at(&Token::Eof) {
            body.push(self.statement()?);
        }
        if self.at(&Token::Dedent) {
            self.advance();
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<Stmt, SyntaxError> {
        self.advance();
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));

        let mut orelse = Vec::new();
        loop {
            if self.at_keyword("elif") {
                self.advance();
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
            } else if self.at_keyword("else") {
                self.advance();
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If { branches, orelse })
    }

    fn while_statement(&mut self) -> Result<Stmt, SyntaxError> {
        self.advance();
        let cond = self.expr()?;
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        Ok(Stmt::While { cond, body: body? })
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.and_expr()?;
        while self.at_keyword("or") {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.not_expr()?;
        while self.at_keyword("and") {
            self.advance();
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, SyntaxError> {
        if self.at_keyword("not") {
            self.advance();
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let lhs = self.arith()?;
        let op = match self.peek() {
            Token::Op("==") => BinOp::Eq,
            Token::Op("!=") => BinOp::Ne,
            Token::Op("<") => BinOp::Lt,
            Token::Op("<=") => BinOp::Le,
            Token::Op(">") => BinOp::Gt,
            Token::Op(">=") => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.arith()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Op("+") => BinOp::Add,
                Token::Op("-") => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Op("*") => BinOp::Mul,
                Token::Op("//") => BinOp::FloorDiv,
                Token::Op("%") => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.at_op("-") {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        match self.advance() {
            Token::Int(n) => Ok(Expr::Int(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::FStr(raw) => Ok(Expr::FStr(fstring_parts(&raw, line)?)),
            Token::Op("(") => {
                let inner = self.expr()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Token::Name(name) => {
                match name.as_str() {
                    "True" => return Ok(Expr::Bool(true)),
                    "False" => return Ok(Expr::Bool(false)),
                    "None" => return Ok(Expr::None),
                    kw if KEYWORDS.contains(&kw) => {
                        return Err(SyntaxError::new(line, "invalid syntax"));
                    }
                    _ => {}
                }
                if self.at_op("(") {
                    self.advance();
                    let args = self.arguments()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Name(name))
                }
            }
            Token::Newline | Token::Eof => Err(SyntaxError::new(line, "unexpected end of line")),
            _ => Err(SyntaxError::new(line, "invalid syntax")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut args = Vec::new();
        if self.at_op(")") {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.at_op(",") {
                self.advance();
                if self.at_op(")") {
                    self.advance();
                    return Ok(args);
                }
                continue;
            }
            self.expect_op(")")?;
            return Ok(args);
        }
    }
}

/// Split an f-string body into literal text and `{expr}` fields
fn fstring_parts(raw: &str, line: usize) -> Result<Vec<FPart>, SyntaxError> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                text.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(SyntaxError::new(line, "f-string: expecting '}'")),
                    }
                }
                if field.trim().is_empty() {
                    return Err(SyntaxError::new(line, "f-string: empty expression not allowed"));
                }
                if !text.is_empty() {
                    parts.push(FPart::Text(std::mem::take(&mut text)));
                }
                let mut sub = Parser::new(tokenize_expr(&field, line)?);
                let expr = sub.expr()?;
                if !sub.at(&Token::Eof) {
                    return Err(SyntaxError::new(line, "f-string: invalid syntax"));
                }
                parts.push(FPart::Field(expr));
            }
            '}' => return Err(SyntaxError::new(line, "f-string: single '}' is not allowed")),
            c => text.push(c),
        }
    }
    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment_with_call() {
        let program = parse_program("x = int(input('n: '))").unwrap();
        assert_eq!(
            program,
            vec![Stmt::Assign {
                name: "x".into(),
                value: Expr::Call {
                    name: "int".into(),
                    args: vec![Expr::Call {
                        name: "input".into(),
                        args: vec![Expr::Str("n: ".into())],
                    }],
                },
            }]
        );
    }

    #[test]
    fn test_precedence() {
        let program = parse_program("1 + 2 * 3").unwrap();
        let Stmt::Expr(Expr::Binary { op, rhs, .. }) = &program[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_if_elif_else() {
        let source = "if x:\n    pass\nelif y:\n    pass\nelse:\n    z = 1\n";
        let program = parse_program(source).unwrap();
        let Stmt::If { branches, orelse } = &program[0] else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn test_while_with_break() {
        let program = parse_program("while True:\n    break\n").unwrap();
        assert!(matches!(&program[0], Stmt::While { body, .. } if body == &vec![Stmt::Break]));
    }

    #[test]
    fn test_break_outside_loop() {
        let err = parse_program("break").unwrap_err();
        assert_eq!(err.message, "'break' outside loop");
    }

    #[test]
    fn test_fstring_fields() {
        let program = parse_program("f'{{a}} {x + 1}!'").unwrap();
        let Stmt::Expr(Expr::FStr(parts)) = &program[0] else {
            panic!("expected f-string");
        };
        assert_eq!(parts[0], FPart::Text("{a} ".into()));
        assert!(matches!(parts[1], FPart::Field(Expr::Binary { op: BinOp::Add, .. })));
        assert_eq!(parts[2], FPart::Text("!".into()));
    }

    #[test]
    fn test_missing_block() {
        assert!(parse_program("if x:\npass\n").is_err());
    }

    #[test]
    fn test_trailing_garbage() {
        let err = parse_program("print(1) 2").unwrap_err();
        assert_eq!(err.message, "invalid syntax");
    }
}
