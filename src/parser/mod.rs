use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{CompareOp, Expr, Stmt, VariableValue};
use crate::lexer::{LexError, Lexer, Token};
use crate::runtime::{Class, Method};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("parse error at byte {position}: {message}")]
    Syntax { position: usize, message: String },
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parses a whole token stream into the program's root statement.
pub fn parse(lexer: Lexer) -> Result<Stmt> {
    Parser::new(lexer).parse_program()
}

struct Parser {
    lexer: Lexer,
    // Classes declared so far; `Name(...)` resolves against this table.
    classes: HashMap<String, Rc<Class>>,
}

impl Parser {
    fn new(lexer: Lexer) -> Self {
        Parser { lexer, classes: HashMap::new() }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax { position: self.lexer.position(), message: message.into() }
    }

    fn eat(&mut self, expected: &Token) -> Result<()> {
        self.lexer.expect(expected)?;
        self.lexer.next();
        Ok(())
    }

    fn eat_char(&mut self, c: char) -> Result<()> {
        self.lexer.expect_char(c)?;
        self.lexer.next();
        Ok(())
    }

    fn eat_id(&mut self) -> Result<String> {
        let name = self.lexer.expect_id()?.to_string();
        self.lexer.next();
        Ok(name)
    }

    // ---- Statements ----

    fn parse_program(&mut self) -> Result<Stmt> {
        let mut statements = Vec::new();
        while *self.lexer.current() != Token::Eof {
            statements.push(self.parse_statement()?);
        }
        Ok(Stmt::Compound(statements))
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        match self.lexer.current() {
            Token::Class => self.parse_class_definition(),
            Token::If => self.parse_if(),
            _ => {
                let stmt = self.parse_simple()?;
                self.eat(&Token::Newline)?;
                Ok(stmt)
            }
        }
    }

    /// One statement that fits on a line: return, print, assignment, or a
    /// bare expression. Does not consume the trailing newline.
    fn parse_simple(&mut self) -> Result<Stmt> {
        match self.lexer.current() {
            Token::Return => {
                self.lexer.next();
                let value = self.parse_expr()?;
                Ok(Stmt::Return { value })
            }
            Token::Print => {
                self.lexer.next();
                let mut args = Vec::new();
                if *self.lexer.current() != Token::Newline {
                    args.push(self.parse_expr()?);
                    while *self.lexer.current() == Token::Char(',') {
                        self.lexer.next();
                        args.push(self.parse_expr()?);
                    }
                }
                Ok(Stmt::Print { args })
            }
            _ => {
                let expr = self.parse_expr()?;
                if *self.lexer.current() != Token::Char('=') {
                    return Ok(Stmt::Expression(expr));
                }
                self.lexer.next();
                let value = self.parse_expr()?;
                match expr {
                    Expr::Variable(mut var) => match var.dotted.pop() {
                        None => Ok(Stmt::Assignment { var: var.name, value }),
                        Some(field) => Ok(Stmt::FieldAssignment { object: var, field, value }),
                    },
                    _ => Err(self.error("assignment target must be a name or a dotted field")),
                }
            }
        }
    }

    /// `class Name [ ( Base ) ] :` newline, then an indented run of methods.
    fn parse_class_definition(&mut self) -> Result<Stmt> {
        self.eat(&Token::Class)?;
        let name = self.eat_id()?;

        let parent = if *self.lexer.current() == Token::Char('(') {
            self.lexer.next();
            let base = self.eat_id()?;
            self.eat_char(')')?;
            let found = self.classes.get(&base).cloned();
            match found {
                Some(class) => Some(class),
                None => return Err(self.error(format!("unknown base class {base}"))),
            }
        } else {
            None
        };

        self.eat_char(':')?;
        self.eat(&Token::Newline)?;
        self.eat(&Token::Indent)?;

        let mut methods = Vec::new();
        while *self.lexer.current() == Token::Def {
            methods.push(self.parse_method()?);
        }
        if methods.is_empty() {
            return Err(self.error(format!("class {name} must declare at least one method")));
        }
        self.eat(&Token::Dedent)?;

        let class = Class::new(name.clone(), methods, parent);
        self.classes.insert(name, Rc::clone(&class));
        Ok(Stmt::ClassDefinition(class))
    }

    /// `def name ( params ) :` suite. `self` is implicit, never declared.
    fn parse_method(&mut self) -> Result<Method> {
        self.eat(&Token::Def)?;
        let name = self.eat_id()?;
        self.eat_char('(')?;

        let mut params = Vec::new();
        if matches!(self.lexer.current(), Token::Id(_)) {
            loop {
                params.push(self.eat_id()?);
                if *self.lexer.current() != Token::Char(',') {
                    break;
                }
                self.lexer.next();
            }
        }
        self.eat_char(')')?;
        self.eat_char(':')?;

        let body = self.parse_suite()?;
        Ok(Method::new(name, params, body))
    }

    /// Either an indented block or a single simple statement on the same line.
    fn parse_suite(&mut self) -> Result<Stmt> {
        if *self.lexer.current() != Token::Newline {
            let stmt = self.parse_simple()?;
            self.eat(&Token::Newline)?;
            return Ok(stmt);
        }
        self.lexer.next();
        self.eat(&Token::Indent)?;
        let mut statements = Vec::new();
        loop {
            match self.lexer.current() {
                Token::Dedent => break,
                Token::Eof => return Err(self.error("unexpected end of input inside a block")),
                _ => statements.push(self.parse_statement()?),
            }
        }
        self.lexer.next();
        Ok(Stmt::Compound(statements))
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.eat(&Token::If)?;
        let condition = self.parse_expr()?;
        self.eat_char(':')?;
        let if_body = Box::new(self.parse_suite()?);
        let else_body = if *self.lexer.current() == Token::Else {
            self.lexer.next();
            self.eat_char(':')?;
            Some(Box::new(self.parse_suite()?))
        } else {
            None
        };
        Ok(Stmt::IfElse { condition, if_body, else_body })
    }

    // ---- Expressions ----

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while *self.lexer.current() == Token::Or {
            self.lexer.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while *self.lexer.current() == Token::And {
            self.lexer.next();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if *self.lexer.current() == Token::Not {
            self.lexer.next();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    /// A single, non-chained comparison between two arithmetic expressions.
    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_arith()?;
        let op = match self.lexer.current() {
            Token::Eq => CompareOp::Eq,
            Token::NotEq => CompareOp::NotEq,
            Token::LessOrEq => CompareOp::LessOrEq,
            Token::GreaterOrEq => CompareOp::GreaterOrEq,
            Token::Char('<') => CompareOp::Less,
            Token::Char('>') => CompareOp::Greater,
            _ => return Ok(lhs),
        };
        self.lexer.next();
        let rhs = self.parse_arith()?;
        Ok(Expr::Comparison { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn parse_arith(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let make: fn(Box<Expr>, Box<Expr>) -> Expr = match self.lexer.current() {
                Token::Char('+') => Expr::Add,
                Token::Char('-') => Expr::Sub,
                _ => break,
            };
            self.lexer.next();
            let rhs = self.parse_term()?;
            lhs = make(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_factor()?;
        loop {
            let make: fn(Box<Expr>, Box<Expr>) -> Expr = match self.lexer.current() {
                Token::Char('*') => Expr::Mult,
                Token::Char('/') => Expr::Div,
                _ => break,
            };
            self.lexer.next();
            let rhs = self.parse_factor()?;
            lhs = make(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        match self.lexer.current().clone() {
            Token::Number(n) => {
                self.lexer.next();
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.lexer.next();
                Ok(Expr::Str(s))
            }
            Token::True => {
                self.lexer.next();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.lexer.next();
                Ok(Expr::Bool(false))
            }
            Token::None => {
                self.lexer.next();
                Ok(Expr::None)
            }
            Token::Char('(') => {
                self.lexer.next();
                let inner = self.parse_expr()?;
                self.eat_char(')')?;
                Ok(inner)
            }
            Token::Id(name) => {
                self.lexer.next();
                self.parse_name_tail(name)
            }
            other => Err(self.error(format!("expected an expression, got {other:?}"))),
        }
    }

    /// The tail of a name: a dotted path, then optionally a call. A dotted
    /// call is a method call; a bare call constructs a class instance, with
    /// `str(...)` as the one built-in.
    fn parse_name_tail(&mut self, name: String) -> Result<Expr> {
        let mut dotted = Vec::new();
        while *self.lexer.current() == Token::Char('.') {
            self.lexer.next();
            dotted.push(self.eat_id()?);
        }

        if *self.lexer.current() != Token::Char('(') {
            return Ok(Expr::Variable(VariableValue { name, dotted }));
        }
        self.lexer.next();
        let mut args = Vec::new();
        if *self.lexer.current() != Token::Char(')') {
            loop {
                args.push(self.parse_expr()?);
                if *self.lexer.current() != Token::Char(',') {
                    break;
                }
                self.lexer.next();
            }
        }
        self.eat_char(')')?;

        match dotted.pop() {
            Some(method) => Ok(Expr::MethodCall {
                object: Box::new(Expr::Variable(VariableValue { name, dotted })),
                method,
                args,
            }),
            None => {
                if let Some(class) = self.classes.get(&name) {
                    return Ok(Expr::NewInstance { class: Rc::clone(class), args });
                }
                if name == "str" {
                    if args.len() != 1 {
                        return Err(self.error("str takes exactly one argument"));
                    }
                    let only = args.remove(0);
                    return Ok(Expr::Stringify(Box::new(only)));
                }
                Err(self.error(format!("unknown class {name}")))
            }
        }
    }
}
