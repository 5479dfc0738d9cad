use crate::ast::*;
use crate::error::Result;
use crate::lexer::{LexedToken, Lexer, Token};

pub struct Parser {
    tokens: Vec<LexedToken>,
    pos: usize,
}

pub fn parse_program(src: &str) -> Result<Program> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser { tokens, pos: 0 };
    p.parse_block_until(&[Token::Eof])
}

/// Parses a single expression, used by `eval`/`inspect` and breakpoint conditions (4.6).
/// On a parse error, callers fall back to treating the text as a one-statement program,
/// matching the reference debugger's "syntax error falls back to statement execution".
pub fn parse_expr_str(src: &str) -> Result<Expr> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser { tokens, pos: 0 };
    let e = p.expr()?;
    p.expect(&Token::Eof)?;
    Ok(e)
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&self, t: &Token) -> bool {
        self.peek() == t
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.check(t) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: &Token) -> Result<()> {
        if self.eat(t) {
            Ok(())
        } else {
            err!(Protocol, "expected {:?} at line {}, found {:?}", t, self.line(), self.peek())
        }
    }

    fn expect_keyword(&mut self, kw: &'static str) -> Result<()> {
        self.expect(&Token::Keyword(kw))
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Keyword(k) if *k == kw)
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => err!(Protocol, "expected identifier at line {}, found {:?}", self.line(), other),
        }
    }

    fn parse_block_until(&mut self, terminators: &[Token]) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !terminators.iter().any(|t| self.check(t)) {
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn brace_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let body = self.parse_block_until(&[Token::RBrace])?;
        self.expect(&Token::RBrace)?;
        Ok(body)
    }

    fn statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        let kind = if self.is_keyword("if") {
            self.advance();
            let cond = self.expr()?;
            let then_body = self.brace_block()?;
            let else_body = if self.is_keyword("else") {
                self.advance();
                if self.is_keyword("if") {
                    vec![self.statement()?]
                } else {
                    self.brace_block()?
                }
            } else {
                Vec::new()
            };
            StmtKind::If(cond, then_body, else_body)
        } else if self.is_keyword("while") {
            self.advance();
            let cond = self.expr()?;
            let body = self.brace_block()?;
            StmtKind::While(cond, body)
        } else if self.is_keyword("for") {
            self.advance();
            let var = self.ident()?;
            self.expect_keyword("in")?;
            let iter = self.expr()?;
            let body = self.brace_block()?;
            StmtKind::For(var, iter, body)
        } else if self.is_keyword("fn") {
            self.advance();
            let name = self.ident()?;
            self.expect(&Token::LParen)?;
            let mut params = Vec::new();
            while !self.check(&Token::RParen) {
                let pname = self.ident()?;
                let default = if self.eat(&Token::Assign) { Some(self.expr()?) } else { None };
                params.push((pname, default));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
            let body = self.brace_block()?;
            StmtKind::FunctionDef(name, params, body)
        } else if self.is_keyword("return") {
            self.advance();
            let value = if self.starts_expr() { Some(self.expr()?) } else { None };
            StmtKind::Return(value)
        } else if self.is_keyword("raise") {
            self.advance();
            let type_name = self.ident()?;
            let message = if self.eat(&Token::LParen) {
                let m = if !self.check(&Token::RParen) { Some(self.expr()?) } else { None };
                self.expect(&Token::RParen)?;
                m
            } else {
                None
            };
            StmtKind::Raise(type_name, message)
        } else if self.is_keyword("try") {
            self.advance();
            let body = self.brace_block()?;
            let mut except_type = None;
            let mut bind = None;
            let mut handler = Vec::new();
            if self.is_keyword("except") {
                self.advance();
                if let Token::Ident(_) = self.peek() {
                    except_type = Some(self.ident()?);
                }
                if self.is_keyword("as") {
                    self.advance();
                    bind = Some(self.ident()?);
                }
                handler = self.brace_block()?;
            }
            StmtKind::Try(body, except_type, bind, handler)
        } else if self.is_keyword("break") {
            self.advance();
            StmtKind::Break
        } else if self.is_keyword("continue") {
            self.advance();
            StmtKind::Continue
        } else if self.is_keyword("pass") {
            self.advance();
            StmtKind::Pass
        } else {
            let target_expr = self.expr()?;
            if self.eat(&Token::Assign) {
                let value = self.expr()?;
                StmtKind::Assign(expr_to_target(target_expr)?, value)
            } else {
                StmtKind::Expr(target_expr)
            }
        };
        Ok(Stmt { line, kind })
    }

    fn starts_expr(&self) -> bool {
        !matches!(self.peek(), Token::RBrace | Token::Eof)
    }

    pub fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.is_keyword("or") {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::BoolOp(BoolOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expr()?;
        while self.is_keyword("and") {
            self.advance();
            let rhs = self.not_expr()?;
            lhs = Expr::BoolOp(BoolOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.is_keyword("not") {
            self.advance();
            Ok(Expr::Not(Box::new(self.not_expr()?)))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Token::Eq => CmpOp::Eq,
            Token::NotEq => CmpOp::NotEq,
            Token::Lt => CmpOp::Lt,
            Token::LtEq => CmpOp::LtEq,
            Token::Gt => CmpOp::Gt,
            Token::GtEq => CmpOp::GtEq,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.additive()?;
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            Ok(Expr::Neg(Box::new(self.unary()?)))
        } else {
            self.postfix()
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut e = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = self.ident()?;
                e = Expr::Attr(Box::new(e), name);
            } else if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                while !self.check(&Token::RParen) {
                    args.push(self.expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RParen)?;
                e = Expr::Call(Box::new(e), args);
            } else if self.eat(&Token::LBracket) {
                let idx = self.expr()?;
                self.expect(&Token::RBracket)?;
                e = Expr::Index(Box::new(e), Box::new(idx));
            } else {
                break;
            }
        }
        Ok(e)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Int(n)),
            Token::Float(n) => Ok(Expr::Float(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Keyword("true") => Ok(Expr::Bool(true)),
            Token::Keyword("false") => Ok(Expr::Bool(false)),
            Token::Keyword("null") => Ok(Expr::Null),
            Token::Ident(name) => Ok(Expr::Name(name)),
            Token::LParen => {
                let mut items = vec![self.expr()?];
                let mut is_tuple = false;
                while self.eat(&Token::Comma) {
                    is_tuple = true;
                    if self.check(&Token::RParen) {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect(&Token::RParen)?;
                if is_tuple {
                    Ok(Expr::Tuple(items))
                } else {
                    Ok(items.into_iter().next().unwrap())
                }
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                if self.eat(&Token::RBrace) {
                    return Ok(Expr::MapLit(Vec::new()));
                }
                let first = self.expr()?;
                if self.eat(&Token::Colon) {
                    let mut pairs = vec![(first, self.expr()?)];
                    while self.eat(&Token::Comma) {
                        if self.check(&Token::RBrace) {
                            break;
                        }
                        let k = self.expr()?;
                        self.expect(&Token::Colon)?;
                        let v = self.expr()?;
                        pairs.push((k, v));
                    }
                    self.expect(&Token::RBrace)?;
                    Ok(Expr::MapLit(pairs))
                } else {
                    let mut items = vec![first];
                    while self.eat(&Token::Comma) {
                        if self.check(&Token::RBrace) {
                            break;
                        }
                        items.push(self.expr()?);
                    }
                    self.expect(&Token::RBrace)?;
                    Ok(Expr::SetLit(items))
                }
            }
            other => err!(Protocol, "unexpected token {:?} at line {}", other, self.line()),
        }
    }
}

fn expr_to_target(e: Expr) -> Result<AssignTarget> {
    match e {
        Expr::Name(n) => Ok(AssignTarget::Name(n)),
        Expr::Attr(base, name) => Ok(AssignTarget::Attr(*base, name)),
        Expr::Index(base, idx) => Ok(AssignTarget::Index(*base, *idx)),
        other => err!(Protocol, "invalid assignment target: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_function_with_default_arg() {
        let prog = parse_program("fn f(x, y = 1) {\n return x + y\n}\n").unwrap();
        assert_eq!(prog.len(), 1);
        match &prog[0].kind {
            StmtKind::FunctionDef(name, params, _) => {
                assert_eq!(name, "f");
                assert_eq!(params.len(), 2);
                assert!(params[1].1.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_nested_control_flow() {
        let prog = parse_program(
            "fn g(xs) {\n\
             total = 0\n\
             for x in xs {\n\
             if x > 0 {\n\
             total = total + x\n\
             }\n\
             }\n\
             return total\n\
             }\n",
        )
        .unwrap();
        assert_eq!(prog.len(), 1);
    }

    #[test]
    fn parses_single_expression() {
        let e = parse_expr_str("1 + 2 * 3").unwrap();
        match e {
            Expr::Binary(BinOp::Add, _, _) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
