//! Análisis sintáctico.
//!
//! Descenso recursivo sobre el flujo de tokens. La gramática es la de
//! un subconjunto amplio de Python: el generador no traduce todos los
//! constructos, pero el parser debe aceptarlos para que el resto del
//! programa pueda compilarse con marcadores en su lugar. Solo un
//! programa sintácticamente inválido aborta la compilación.
//!
//! Todo nodo de sentencia o expresión está ubicado ([`Located`]), lo
//! cual permite consultar directivas por número de línea y reportar
//! advertencias con contexto.

use std::{
    fmt::{self, Display},
    iter::Peekable,
    marker::PhantomData,
};

use thiserror::Error;

use crate::{
    lex::{Identifier, Keyword, StrLiteral, Token},
    source::{Located, Location},
};

#[derive(Debug)]
pub struct Ast {
    statements: Vec<Located<Statement>>,
}

impl Ast {
    /// Sentencias de nivel superior, en orden de aparición.
    pub fn statements(&self) -> &[Located<Statement>] {
        &self.statements
    }
}

#[derive(Debug)]
pub struct Function {
    name: Located<Identifier>,
    decorators: Vec<Located<Expr>>,
    parameters: Vec<Parameter>,
    returns: Option<Located<Expr>>,
    body: Vec<Located<Statement>>,
}

impl Function {
    pub fn name(&self) -> &Located<Identifier> {
        &self.name
    }

    pub fn decorators(&self) -> &[Located<Expr>] {
        &self.decorators
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Anotación de retorno (`-> T`), si existe.
    pub fn returns(&self) -> Option<&Located<Expr>> {
        self.returns.as_ref()
    }

    pub fn body(&self) -> &[Located<Statement>] {
        &self.body
    }
}

#[derive(Debug)]
pub struct Parameter {
    name: Located<Identifier>,
    kind: ParameterKind,
    annotation: Option<Located<Expr>>,
    default: Option<Located<Expr>>,
}

impl Parameter {
    pub fn name(&self) -> &Located<Identifier> {
        &self.name
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    pub fn annotation(&self) -> Option<&Located<Expr>> {
        self.annotation.as_ref()
    }

    pub fn default(&self) -> Option<&Located<Expr>> {
        self.default.as_ref()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    /// Parámetro ordinario, posicional o por nombre.
    Positional,

    /// `*args`
    Variadic,

    /// `**kwargs`
    KeywordVariadic,
}

#[derive(Debug)]
pub enum Statement {
    Function(Function),

    Class {
        name: Located<Identifier>,
        bases: Vec<Argument>,
        body: Vec<Located<Statement>>,
    },

    If {
        condition: Located<Expr>,
        body: Vec<Located<Statement>>,
        orelse: Vec<Located<Statement>>,
    },

    While {
        condition: Located<Expr>,
        body: Vec<Located<Statement>>,
        orelse: Vec<Located<Statement>>,
    },

    For {
        target: Located<Expr>,
        iterable: Located<Expr>,
        body: Vec<Located<Statement>>,
        orelse: Vec<Located<Statement>>,
    },

    With {
        items: Vec<WithItem>,
        body: Vec<Located<Statement>>,
    },

    Try {
        body: Vec<Located<Statement>>,
        handlers: Vec<Handler>,
        orelse: Vec<Located<Statement>>,
        finally: Vec<Located<Statement>>,
    },

    Return(Option<Located<Expr>>),

    /// `a = b = value`, un objetivo por cada `=`.
    Assign {
        targets: Vec<Located<Expr>>,
        value: Located<Expr>,
    },

    AnnAssign {
        target: Located<Expr>,
        annotation: Located<Expr>,
        value: Option<Located<Expr>>,
    },

    AugAssign {
        target: Located<Expr>,
        op: BinOp,
        value: Located<Expr>,
    },

    Expr(Located<Expr>),

    Pass,
    Break,
    Continue,

    Import(Vec<Alias>),

    ImportFrom {
        module: Option<Located<Identifier>>,
        level: u32,
        names: Vec<Alias>,
    },

    Global(Vec<Located<Identifier>>),
    Nonlocal(Vec<Located<Identifier>>),
    Del(Vec<Located<Expr>>),

    Assert {
        test: Located<Expr>,
        message: Option<Located<Expr>>,
    },

    Raise {
        exception: Option<Located<Expr>>,
        cause: Option<Located<Expr>>,
    },
}

#[derive(Debug)]
pub struct WithItem {
    pub context: Located<Expr>,
    pub target: Option<Located<Expr>>,
}

#[derive(Debug)]
pub struct Handler {
    pub kind: Option<Located<Expr>>,
    pub name: Option<Located<Identifier>>,
    pub body: Vec<Located<Statement>>,
}

/// Nombre importado, con alias opcional. Los nombres con puntos
/// (`a.b.c`) se conservan como un solo identificador.
#[derive(Debug)]
pub struct Alias {
    pub name: Located<Identifier>,
    pub alias: Option<Located<Identifier>>,
}

#[derive(Debug)]
pub enum Expr {
    True,
    False,
    None,
    Ellipsis,
    Integer(String),
    Float(String),
    Imaginary(String),

    /// Uno o más literales de texto adyacentes.
    Str(Vec<StrLiteral>),

    Name(Identifier),
    Unary(UnaryOp, Box<Located<Expr>>),
    Binary(Box<Located<Expr>>, BinOp, Box<Located<Expr>>),
    Bool(BoolOp, Vec<Located<Expr>>),

    /// `a < b <= c`: un operando inicial y pares operador-operando.
    Compare(Box<Located<Expr>>, Vec<(CmpOp, Located<Expr>)>),

    Call {
        callee: Box<Located<Expr>>,
        args: Vec<Argument>,
    },

    Attribute(Box<Located<Expr>>, Located<Identifier>),
    Subscript(Box<Located<Expr>>, Box<Located<Expr>>),

    Slice {
        lower: Option<Box<Located<Expr>>>,
        upper: Option<Box<Located<Expr>>>,
        step: Option<Box<Located<Expr>>>,
    },

    Tuple(Vec<Located<Expr>>),
    List(Vec<Located<Expr>>),
    Set(Vec<Located<Expr>>),

    /// Pares llave-valor; una llave ausente corresponde a `**mapping`.
    Dict(Vec<(Option<Located<Expr>>, Located<Expr>)>),

    Comprehension {
        kind: ComprehensionKind,
        element: Box<Located<Expr>>,
        clauses: Vec<Clause>,
    },

    Conditional {
        test: Box<Located<Expr>>,
        body: Box<Located<Expr>>,
        orelse: Box<Located<Expr>>,
    },

    Lambda {
        parameters: Vec<Parameter>,
        body: Box<Located<Expr>>,
    },

    Named(Located<Identifier>, Box<Located<Expr>>),
    Starred(Box<Located<Expr>>),
    Await(Box<Located<Expr>>),
    Yield(Option<Box<Located<Expr>>>),
    YieldFrom(Box<Located<Expr>>),
}

#[derive(Debug)]
pub enum Argument {
    Positional(Located<Expr>),

    Keyword {
        name: Located<Identifier>,
        value: Located<Expr>,
    },

    /// `*iterable`
    Unpack(Located<Expr>),

    /// `**mapping`
    UnpackKeywords(Located<Expr>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,

    /// El elemento es un par `Expr::Tuple` de llave y valor.
    Dict,
    Generator,
}

/// Cláusula `for target in iterable if cond...` de una comprensión.
#[derive(Debug)]
pub struct Clause {
    pub target: Located<Expr>,
    pub iterable: Located<Expr>,
    pub conditions: Vec<Located<Expr>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    MatMul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    BitXor,
}

impl Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinOp::*;

        let symbol = match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            MatMul => "@",
            Div => "/",
            FloorDiv => "//",
            Mod => "%",
            Pow => "**",
            ShiftLeft => "<<",
            ShiftRight => ">>",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
        };

        fmt.write_str(symbol)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Invert,
    Not,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    In,
    NotIn,
    Is,
    IsNot,
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected {0}, none was found instead")]
    MissingToken(Token),

    #[error("Unexpected {0}")]
    Unexpected(Token),

    #[error("Expected identifier")]
    ExpectedId,

    #[error("Expected an expression")]
    ExpectedExpr,

    #[error("Expected an indented block")]
    ExpectedBlock,

    #[error("Unexpected indentation")]
    UnexpectedIndent,

    #[error("Expected `def` after decorators")]
    ExpectedDefinition,

    #[error("Cannot assign to this expression")]
    InvalidTarget,

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

/// Un flujo de tokens que puede bifurcarse para retroceder.
pub trait TokenStream<'a>: Iterator<Item = &'a Located<Token>> + Clone {}

impl<'a, I> TokenStream<'a> for I where I: Iterator<Item = &'a Located<Token>> + Clone {}

pub fn parse<'a>(
    tokens: impl TokenStream<'a>,
    start: Location,
) -> Result<Ast, Located<ParserError>> {
    let mut parser = Parser {
        tokens: tokens.peekable(),
        last_known: start,
        lifetime_hack: PhantomData,
    };

    parser.program().map_err(Failure::coerce)
}

#[derive(Clone)]
struct Parser<'a, I: TokenStream<'a>> {
    tokens: Peekable<I>,
    last_known: Location,
    lifetime_hack: PhantomData<&'a ()>,
}

/// Clasificación de fallos.
///
/// Un fallo débil indica que la regla no aplica en esta posición y
/// que otra alternativa puede intentarse. Un fallo estricto indica
/// que la regla aplicaba pero la entrada es inválida.
enum Failure {
    Weak(Located<ParserError>),
    Strict(Located<ParserError>),
}

impl Failure {
    fn strict(self) -> Self {
        Failure::Strict(self.coerce())
    }

    fn coerce(self) -> Located<ParserError> {
        match self {
            Failure::Weak(error) => error,
            Failure::Strict(error) => error,
        }
    }
}

type Parse<T> = Result<T, Failure>;

type Block = Vec<Located<Statement>>;

impl<'a, I: TokenStream<'a>> Parser<'a, I> {
    fn program(&mut self) -> Parse<Ast> {
        let mut statements = Vec::new();
        while self.peek().is_some() {
            self.statement(&mut statements)?;
        }

        Ok(Ast { statements })
    }

    /// Agrega una o más sentencias (varias si están separadas por `;`).
    fn statement(&mut self, into: &mut Block) -> Parse<()> {
        let start = self.here();
        let statement = match self.peek() {
            Some(Token::Keyword(Keyword::If)) => self.if_statement()?,
            Some(Token::Keyword(Keyword::While)) => self.while_statement()?,
            Some(Token::Keyword(Keyword::For)) => self.for_statement()?,
            Some(Token::Keyword(Keyword::Try)) => self.try_statement()?,
            Some(Token::Keyword(Keyword::With)) => self.with_statement()?,
            Some(Token::Keyword(Keyword::Def)) => Statement::Function(self.function(Vec::new())?),
            Some(Token::Keyword(Keyword::Class)) => self.class(Vec::new())?,
            Some(Token::Keyword(Keyword::Async)) => self.async_statement(Vec::new())?,
            Some(Token::At) => self.decorated()?,

            Some(Token::Indent) => {
                self.advance();
                return self.fail(ParserError::UnexpectedIndent);
            }

            _ => return self.simple_statements(into),
        };

        into.push(Located::at(statement, self.span_from(start)));
        Ok(())
    }

    fn simple_statements(&mut self, into: &mut Block) -> Parse<()> {
        loop {
            let start = self.here();
            let statement = self.small_statement()?;
            into.push(Located::at(statement, self.span_from(start)));

            if !self.accept(&Token::Semicolon) {
                return self.end_of_line();
            } else if self.at_statement_end() {
                return self.end_of_line();
            }
        }
    }

    fn small_statement(&mut self) -> Parse<Statement> {
        let keyword = match self.peek() {
            Some(Token::Keyword(keyword)) => Some(*keyword),
            _ => None,
        };

        let statement = match keyword {
            Some(Keyword::Pass) => {
                self.advance();
                Statement::Pass
            }

            Some(Keyword::Break) => {
                self.advance();
                Statement::Break
            }

            Some(Keyword::Continue) => {
                self.advance();
                Statement::Continue
            }

            Some(Keyword::Return) => {
                self.advance();
                if self.at_statement_end() {
                    Statement::Return(None)
                } else {
                    Statement::Return(Some(self.testlist()?))
                }
            }

            Some(Keyword::Import) => {
                self.advance();
                let names = self.comma_separated(Parser::dotted_alias, false)?;
                Statement::Import(names)
            }

            Some(Keyword::From) => self.import_from()?,

            Some(Keyword::Global) => {
                self.advance();
                Statement::Global(self.comma_separated(Parser::id, false)?)
            }

            Some(Keyword::Nonlocal) => {
                self.advance();
                Statement::Nonlocal(self.comma_separated(Parser::id, false)?)
            }

            Some(Keyword::Del) => {
                self.advance();
                let targets = self.comma_separated(Parser::target_item, false)?;
                Statement::Del(targets)
            }

            Some(Keyword::Assert) => {
                self.advance();
                let test = self.test()?;
                let message = if self.accept(&Token::Comma) {
                    Some(self.test()?)
                } else {
                    None
                };

                Statement::Assert { test, message }
            }

            Some(Keyword::Raise) => {
                self.advance();
                let exception = self.optional(Parser::test)?;
                let cause = match exception {
                    Some(_) if self.accept_keyword(Keyword::From) => Some(self.test()?),
                    _ => None,
                };

                Statement::Raise { exception, cause }
            }

            _ => self.expression_statement()?,
        };

        Ok(statement)
    }

    fn expression_statement(&mut self) -> Parse<Statement> {
        let first = self.testlist()?;

        match self.peek() {
            Some(Token::Colon) => {
                self.advance();
                self.check_target(&first)?;

                let annotation = self.test()?;
                let value = if self.accept(&Token::Assign) {
                    Some(self.rhs()?)
                } else {
                    None
                };

                Ok(Statement::AnnAssign {
                    target: first,
                    annotation,
                    value,
                })
            }

            Some(Token::AugAssign(op)) => {
                let op = *op;
                self.advance();
                self.check_target(&first)?;

                let value = self.rhs()?;
                Ok(Statement::AugAssign {
                    target: first,
                    op,
                    value,
                })
            }

            Some(Token::Assign) => {
                let mut targets = vec![first];
                loop {
                    self.advance();
                    let value = self.rhs()?;

                    if self.check(&Token::Assign) {
                        targets.push(value);
                    } else {
                        for target in &targets {
                            self.check_target(target)?;
                        }

                        break Ok(Statement::Assign { targets, value });
                    }
                }
            }

            _ => Ok(Statement::Expr(first)),
        }
    }

    fn import_from(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::From)?;

        let mut level = 0;
        loop {
            if self.accept(&Token::Period) {
                level += 1;
            } else if self.accept(&Token::Ellipsis) {
                level += 3;
            } else {
                break;
            }
        }

        let module = match self.peek() {
            Some(Token::Id(_)) => Some(self.dotted_name()?),
            _ if level > 0 => None,
            _ => return self.fail(ParserError::ExpectedId),
        };

        self.keyword(Keyword::Import)?;

        let names = if self.check(&Token::Times) {
            let (location, _) = self.next()?.split();
            let name = Located::at(Identifier::from("*"), location);
            vec![Alias { name, alias: None }]
        } else if self.accept(&Token::OpenParen) {
            let names = self.comma_separated(Parser::alias, false)?;
            self.expect(Token::CloseParen)?;
            names
        } else {
            self.comma_separated(Parser::alias, false)?
        };

        Ok(Statement::ImportFrom {
            module,
            level,
            names,
        })
    }

    fn dotted_alias(&mut self) -> Parse<Alias> {
        let name = self.dotted_name()?;
        let alias = self.as_name()?;

        Ok(Alias { name, alias })
    }

    fn alias(&mut self) -> Parse<Alias> {
        let name = self.id()?;
        let alias = self.as_name()?;

        Ok(Alias { name, alias })
    }

    fn as_name(&mut self) -> Parse<Option<Located<Identifier>>> {
        if self.accept_keyword(Keyword::As) {
            Ok(Some(self.id()?))
        } else {
            Ok(None)
        }
    }

    fn dotted_name(&mut self) -> Parse<Located<Identifier>> {
        let first = self.id()?;
        if !self.check(&Token::Period) {
            return Ok(first);
        }

        let (start, first) = first.split();
        let mut path = first.to_string();
        while self.accept(&Token::Period) {
            let part = self.id()?;
            path.push('.');
            path.push_str(part.val().as_ref());
        }

        Ok(Located::at(Identifier::from(path.as_str()), self.span_from(start)))
    }

    fn if_statement(&mut self) -> Parse<Statement> {
        // Tanto `if` como `elif` abren una condicional
        self.advance();

        let condition = self.named_test().map_err(Failure::strict)?;
        let body = self.block()?;

        let orelse = match self.peek() {
            Some(Token::Keyword(Keyword::Elif)) => {
                let start = self.here();
                let nested = self.if_statement()?;
                vec![Located::at(nested, self.span_from(start))]
            }

            Some(Token::Keyword(Keyword::Else)) => {
                self.advance();
                self.block()?
            }

            _ => Vec::new(),
        };

        Ok(Statement::If {
            condition,
            body,
            orelse,
        })
    }

    fn while_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::While)?;

        let condition = self.named_test().map_err(Failure::strict)?;
        let body = self.block()?;
        let orelse = self.else_block()?;

        Ok(Statement::While {
            condition,
            body,
            orelse,
        })
    }

    fn for_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::For)?;

        let target = self.target_list()?;
        self.keyword(Keyword::In)?;
        let iterable = self.testlist().map_err(Failure::strict)?;

        let body = self.block()?;
        let orelse = self.else_block()?;

        Ok(Statement::For {
            target,
            iterable,
            body,
            orelse,
        })
    }

    fn try_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::Try)?;
        let body = self.block()?;

        let mut handlers = Vec::new();
        while self.accept_keyword(Keyword::Except) {
            let kind = if self.check(&Token::Colon) {
                None
            } else {
                Some(self.test()?)
            };

            let name = match kind {
                Some(_) => self.as_name()?,
                None => None,
            };

            let body = self.block()?;
            handlers.push(Handler { kind, name, body });
        }

        let orelse = self.else_block()?;
        let finally = if self.accept_keyword(Keyword::Finally) {
            self.block()?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finally.is_empty() {
            return self.fail(ParserError::MissingToken(Token::Keyword(Keyword::Except)));
        }

        Ok(Statement::Try {
            body,
            handlers,
            orelse,
            finally,
        })
    }

    fn with_statement(&mut self) -> Parse<Statement> {
        self.keyword(Keyword::With)?;

        let items = self.comma_separated(
            |parser| {
                let context = parser.test()?;
                let target = if parser.accept_keyword(Keyword::As) {
                    Some(parser.target_item()?)
                } else {
                    None
                };

                Ok(WithItem { context, target })
            },
            false,
        )?;

        let body = self.block()?;
        Ok(Statement::With { items, body })
    }

    fn else_block(&mut self) -> Parse<Block> {
        if self.accept_keyword(Keyword::Else) {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn decorated(&mut self) -> Parse<Statement> {
        let mut decorators = Vec::new();
        while self.accept(&Token::At) {
            decorators.push(self.named_test().map_err(Failure::strict)?);
            self.expect(Token::Newline)?;
        }

        match self.peek() {
            Some(Token::Keyword(Keyword::Def)) => Ok(Statement::Function(self.function(decorators)?)),
            Some(Token::Keyword(Keyword::Class)) => self.class(decorators),
            Some(Token::Keyword(Keyword::Async)) => self.async_statement(decorators),

            _ => {
                self.advance();
                self.fail(ParserError::ExpectedDefinition)
            }
        }
    }

    /// `async def`, `async for` y `async with` se tratan como sus
    /// equivalentes síncronos.
    fn async_statement(&mut self, decorators: Vec<Located<Expr>>) -> Parse<Statement> {
        self.keyword(Keyword::Async)?;

        match self.peek() {
            Some(Token::Keyword(Keyword::Def)) => Ok(Statement::Function(self.function(decorators)?)),
            Some(Token::Keyword(Keyword::For)) if decorators.is_empty() => self.for_statement(),
            Some(Token::Keyword(Keyword::With)) if decorators.is_empty() => self.with_statement(),

            _ => {
                self.advance();
                self.fail(ParserError::ExpectedDefinition)
            }
        }
    }

    fn function(&mut self, decorators: Vec<Located<Expr>>) -> Parse<Function> {
        self.keyword(Keyword::Def)?;
        let name = self.id()?;

        self.expect(Token::OpenParen)?;
        let parameters = self.parameters(&Token::CloseParen, true)?;
        self.expect(Token::CloseParen)?;

        let returns = if self.accept(&Token::Arrow) {
            Some(self.test().map_err(Failure::strict)?)
        } else {
            None
        };

        let body = self.block()?;

        Ok(Function {
            name,
            decorators,
            parameters,
            returns,
            body,
        })
    }

    fn class(&mut self, _decorators: Vec<Located<Expr>>) -> Parse<Statement> {
        self.keyword(Keyword::Class)?;
        let name = self.id()?;

        let bases = if self.accept(&Token::OpenParen) {
            let bases = self.arguments()?;
            self.expect(Token::CloseParen)?;
            bases
        } else {
            Vec::new()
        };

        let body = self.block()?;
        Ok(Statement::Class { name, bases, body })
    }

    /// Lista de parámetros hasta `close` (sin consumirlo).
    ///
    /// Las anotaciones solo se permiten en `def`, no en `lambda`.
    fn parameters(&mut self, close: &Token, annotated: bool) -> Parse<Vec<Parameter>> {
        let mut parameters = Vec::new();

        while !self.check(close) {
            let kind = if self.accept(&Token::Power) {
                ParameterKind::KeywordVariadic
            } else if self.accept(&Token::Times) {
                ParameterKind::Variadic
            } else if self.accept(&Token::Slash) {
                // Separador de parámetros exclusivamente posicionales
                if !self.accept(&Token::Comma) {
                    break;
                }

                continue;
            } else {
                ParameterKind::Positional
            };

            // `*` solo, separador de parámetros exclusivamente por nombre
            if kind == ParameterKind::Variadic && (self.check(&Token::Comma) || self.check(close)) {
                if !self.accept(&Token::Comma) {
                    break;
                }

                continue;
            }

            let name = self.id()?;
            let annotation = if annotated && self.accept(&Token::Colon) {
                Some(self.test()?)
            } else {
                None
            };

            let default = if self.accept(&Token::Assign) {
                Some(self.test()?)
            } else {
                None
            };

            parameters.push(Parameter {
                name,
                kind,
                annotation,
                default,
            });

            if !self.accept(&Token::Comma) {
                break;
            }
        }

        Ok(parameters)
    }

    fn block(&mut self) -> Parse<Block> {
        self.expect(Token::Colon)?;

        let mut body = Vec::new();
        if !self.accept(&Token::Newline) {
            // Cuerpo en la misma línea: `if x: y = 1`
            self.simple_statements(&mut body)?;
            return Ok(body);
        }

        if !self.accept(&Token::Indent) {
            self.advance();
            return self.fail(ParserError::ExpectedBlock);
        }

        while !self.accept(&Token::Dedent) {
            if self.peek().is_none() {
                break;
            }

            self.statement(&mut body)?;
        }

        Ok(body)
    }

    fn end_of_line(&mut self) -> Parse<()> {
        match self.peek() {
            None => Ok(()),
            Some(Token::Newline) => {
                self.advance();
                Ok(())
            }

            Some(_) => {
                let found = self.next()?.into_inner();
                self.fail(ParserError::UnexpectedToken(Token::Newline, found))
            }
        }
    }

    fn check_target(&self, target: &Located<Expr>) -> Parse<()> {
        match target.as_ref() {
            Expr::Name(_) | Expr::Attribute(..) | Expr::Subscript(..) => Ok(()),
            Expr::Starred(inner) => self.check_target(inner),
            Expr::Tuple(items) | Expr::List(items) => {
                items.iter().try_for_each(|item| self.check_target(item))
            }

            _ => Err(Failure::Strict(Located::at(
                ParserError::InvalidTarget,
                target.location().clone(),
            ))),
        }
    }

    /// Lado derecho de una asignación, que puede ser `yield`.
    fn rhs(&mut self) -> Parse<Located<Expr>> {
        if self.check(&Token::Keyword(Keyword::Yield)) {
            self.yield_expr()
        } else {
            self.testlist()
        }
    }

    fn yield_expr(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();
        self.keyword(Keyword::Yield)?;

        let expr = if self.accept_keyword(Keyword::From) {
            Expr::YieldFrom(Box::new(self.test()?))
        } else if self.at_expression_start() {
            Expr::Yield(Some(Box::new(self.testlist()?)))
        } else {
            Expr::Yield(None)
        };

        Ok(Located::at(expr, self.span_from(start)))
    }

    /// Una o más expresiones separadas por comas, posiblemente con `*`.
    /// Con al menos una coma el resultado es una tupla.
    fn testlist(&mut self) -> Parse<Located<Expr>> {
        self.sequence(Parser::star_or_test, Parser::at_expression_start)
    }

    /// Objetivos de `for`: no pueden incluir comparaciones, ya que `in`
    /// separa el objetivo del iterable.
    fn target_list(&mut self) -> Parse<Located<Expr>> {
        let targets = self.sequence(Parser::target_item, Parser::at_expression_start)?;
        self.check_target(&targets)?;

        Ok(targets)
    }

    fn target_item(&mut self) -> Parse<Located<Expr>> {
        if self.check(&Token::Times) {
            let start = self.here();
            self.advance();

            let inner = self.bitor()?;
            Ok(Located::at(
                Expr::Starred(Box::new(inner)),
                self.span_from(start),
            ))
        } else {
            self.bitor()
        }
    }

    /// Una expresión o una tupla sin paréntesis. `at_item` determina si
    /// una coma final es seguida por otro elemento.
    fn sequence<F>(
        &mut self,
        mut item: F,
        at_item: fn(&mut Self) -> bool,
    ) -> Parse<Located<Expr>>
    where
        F: FnMut(&mut Self) -> Parse<Located<Expr>>,
    {
        let first = item(self)?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }

        let start = first.location().clone();
        let mut items = vec![first];
        while self.accept(&Token::Comma) {
            if !at_item(self) {
                break;
            }

            items.push(item(self)?);
        }

        Ok(Located::at(Expr::Tuple(items), self.span_from(start)))
    }

    fn star_or_test(&mut self) -> Parse<Located<Expr>> {
        if self.check(&Token::Times) {
            let start = self.here();
            self.advance();

            let inner = self.bitor()?;
            Ok(Located::at(
                Expr::Starred(Box::new(inner)),
                self.span_from(start),
            ))
        } else {
            self.test()
        }
    }

    fn star_or_named_test(&mut self) -> Parse<Located<Expr>> {
        if self.check(&Token::Times) {
            self.star_or_test()
        } else {
            self.named_test()
        }
    }

    /// `name := value` o una expresión ordinaria.
    fn named_test(&mut self) -> Parse<Located<Expr>> {
        let expr = self.test()?;
        if !self.check(&Token::Walrus) {
            return Ok(expr);
        }

        let (location, expr) = expr.split();
        let name = match expr {
            Expr::Name(name) => Located::at(name, location.clone()),
            _ => {
                return Err(Failure::Strict(Located::at(
                    ParserError::InvalidTarget,
                    location,
                )))
            }
        };

        self.advance();
        let value = self.test()?;

        Ok(Located::at(
            Expr::Named(name, Box::new(value)),
            self.span_from(location),
        ))
    }

    fn test(&mut self) -> Parse<Located<Expr>> {
        if self.check(&Token::Keyword(Keyword::Lambda)) {
            return self.lambda();
        }

        let start = self.here();
        let body = self.or_test()?;
        if !self.accept_keyword(Keyword::If) {
            return Ok(body);
        }

        let test = self.or_test().map_err(Failure::strict)?;
        self.keyword(Keyword::Else)?;
        let orelse = self.test().map_err(Failure::strict)?;

        Ok(Located::at(
            Expr::Conditional {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            self.span_from(start),
        ))
    }

    fn lambda(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();
        self.keyword(Keyword::Lambda)?;

        let parameters = self.parameters(&Token::Colon, false)?;
        self.expect(Token::Colon)?;
        let body = self.test().map_err(Failure::strict)?;

        Ok(Located::at(
            Expr::Lambda {
                parameters,
                body: Box::new(body),
            },
            self.span_from(start),
        ))
    }

    fn or_test(&mut self) -> Parse<Located<Expr>> {
        self.bool_chain(Keyword::Or, BoolOp::Or, Parser::and_test)
    }

    fn and_test(&mut self) -> Parse<Located<Expr>> {
        self.bool_chain(Keyword::And, BoolOp::And, Parser::not_test)
    }

    fn bool_chain<F>(&mut self, keyword: Keyword, op: BoolOp, mut operand: F) -> Parse<Located<Expr>>
    where
        F: FnMut(&mut Self) -> Parse<Located<Expr>>,
    {
        let first = operand(self)?;
        if !self.check(&Token::Keyword(keyword)) {
            return Ok(first);
        }

        let start = first.location().clone();
        let mut operands = vec![first];
        while self.accept_keyword(keyword) {
            operands.push(operand(self).map_err(Failure::strict)?);
        }

        Ok(Located::at(Expr::Bool(op, operands), self.span_from(start)))
    }

    fn not_test(&mut self) -> Parse<Located<Expr>> {
        if !self.check(&Token::Keyword(Keyword::Not)) {
            return self.comparison();
        }

        let start = self.here();
        self.advance();

        let operand = self.not_test().map_err(Failure::strict)?;
        Ok(Located::at(
            Expr::Unary(UnaryOp::Not, Box::new(operand)),
            self.span_from(start),
        ))
    }

    fn comparison(&mut self) -> Parse<Located<Expr>> {
        let first = self.bitor()?;

        let mut pairs = Vec::new();
        while let Some(op) = self.comparison_operator()? {
            pairs.push((op, self.bitor().map_err(Failure::strict)?));
        }

        if pairs.is_empty() {
            return Ok(first);
        }

        let start = first.location().clone();
        Ok(Located::at(
            Expr::Compare(Box::new(first), pairs),
            self.span_from(start),
        ))
    }

    /// Consume un operador de comparación, si lo hay.
    fn comparison_operator(&mut self) -> Parse<Option<CmpOp>> {
        let op = match self.peek() {
            Some(Token::Equal) => CmpOp::Equal,
            Some(Token::NotEqual) => CmpOp::NotEqual,
            Some(Token::Less) => CmpOp::Less,
            Some(Token::LessOrEqual) => CmpOp::LessOrEqual,
            Some(Token::Greater) => CmpOp::Greater,
            Some(Token::GreaterOrEqual) => CmpOp::GreaterOrEqual,
            Some(Token::Keyword(Keyword::In)) => CmpOp::In,

            Some(Token::Keyword(Keyword::Is)) => {
                self.advance();
                return Ok(Some(if self.accept_keyword(Keyword::Not) {
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }));
            }

            // `not in`, a diferencia de un `not` unario
            Some(Token::Keyword(Keyword::Not)) => {
                let not_in = self.lookahead(|parser| {
                    parser.advance();
                    Ok(parser.check(&Token::Keyword(Keyword::In)))
                })?;

                if !not_in {
                    return Ok(None);
                }

                self.advance();
                CmpOp::NotIn
            }

            _ => return Ok(None),
        };

        self.advance();
        Ok(Some(op))
    }

    fn bitor(&mut self) -> Parse<Located<Expr>> {
        self.binary_level(Parser::bitxor, |token| match token {
            Token::Pipe => Some(BinOp::BitOr),
            _ => None,
        })
    }

    fn bitxor(&mut self) -> Parse<Located<Expr>> {
        self.binary_level(Parser::bitand, |token| match token {
            Token::Caret => Some(BinOp::BitXor),
            _ => None,
        })
    }

    fn bitand(&mut self) -> Parse<Located<Expr>> {
        self.binary_level(Parser::shift, |token| match token {
            Token::Ampersand => Some(BinOp::BitAnd),
            _ => None,
        })
    }

    fn shift(&mut self) -> Parse<Located<Expr>> {
        self.binary_level(Parser::arith, |token| match token {
            Token::ShiftLeft => Some(BinOp::ShiftLeft),
            Token::ShiftRight => Some(BinOp::ShiftRight),
            _ => None,
        })
    }

    fn arith(&mut self) -> Parse<Located<Expr>> {
        self.binary_level(Parser::term, |token| match token {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn term(&mut self) -> Parse<Located<Expr>> {
        self.binary_level(Parser::factor, |token| match token {
            Token::Times => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::DoubleSlash => Some(BinOp::FloorDiv),
            Token::Percent => Some(BinOp::Mod),
            Token::At => Some(BinOp::MatMul),
            _ => None,
        })
    }

    /// Nivel de precedencia con operadores binarios asociativos por la izquierda.
    fn binary_level<F, O>(&mut self, mut operand: F, operator: O) -> Parse<Located<Expr>>
    where
        F: FnMut(&mut Self) -> Parse<Located<Expr>>,
        O: Fn(&Token) -> Option<BinOp>,
    {
        let mut left = operand(self)?;

        while let Some(op) = self.peek().and_then(&operator) {
            self.advance();

            let right = operand(self).map_err(Failure::strict)?;
            let location = Location::span(left.location().clone(), right.location());
            left = Located::at(Expr::Binary(Box::new(left), op, Box::new(right)), location);
        }

        Ok(left)
    }

    fn factor(&mut self) -> Parse<Located<Expr>> {
        let op = match self.peek() {
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Minus) => UnaryOp::Minus,
            Some(Token::Tilde) => UnaryOp::Invert,
            _ => return self.power(),
        };

        let start = self.here();
        self.advance();

        let operand = self.factor().map_err(Failure::strict)?;
        Ok(Located::at(
            Expr::Unary(op, Box::new(operand)),
            self.span_from(start),
        ))
    }

    fn power(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();
        let base = if self.accept_keyword(Keyword::Await) {
            let inner = self.primary().map_err(Failure::strict)?;
            Located::at(Expr::Await(Box::new(inner)), self.span_from(start.clone()))
        } else {
            self.primary()?
        };

        if !self.accept(&Token::Power) {
            return Ok(base);
        }

        // `**` asocia por la derecha y liga más fuerte que el unario izquierdo
        let exponent = self.factor().map_err(Failure::strict)?;
        Ok(Located::at(
            Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent)),
            self.span_from(start),
        ))
    }

    fn primary(&mut self) -> Parse<Located<Expr>> {
        let mut expr = self.atom()?;

        loop {
            let start = expr.location().clone();
            let trailer = match self.peek() {
                Some(Token::OpenParen) => {
                    self.advance();
                    let args = self.arguments()?;
                    self.expect(Token::CloseParen)?;

                    Expr::Call {
                        callee: Box::new(expr),
                        args,
                    }
                }

                Some(Token::OpenSquare) => {
                    self.advance();
                    let index = self.subscript_list()?;
                    self.expect(Token::CloseSquare)?;

                    Expr::Subscript(Box::new(expr), Box::new(index))
                }

                Some(Token::Period) => {
                    self.advance();
                    let attribute = self.id()?;

                    Expr::Attribute(Box::new(expr), attribute)
                }

                _ => break Ok(expr),
            };

            expr = Located::at(trailer, self.span_from(start));
        }
    }

    fn arguments(&mut self) -> Parse<Vec<Argument>> {
        let mut args = Vec::new();

        while !self.check(&Token::CloseParen) {
            let arg = if self.accept(&Token::Times) {
                Argument::Unpack(self.test()?)
            } else if self.accept(&Token::Power) {
                Argument::UnpackKeywords(self.test()?)
            } else {
                let (location, value) = self.named_test()?.split();
                match value {
                    Expr::Name(name) if self.check(&Token::Assign) => {
                        self.advance();

                        Argument::Keyword {
                            name: Located::at(name, location),
                            value: self.test()?,
                        }
                    }

                    value if self.at_comprehension() => {
                        let element = Located::at(value, location.clone());
                        let clauses = self.clauses()?;

                        Argument::Positional(Located::at(
                            Expr::Comprehension {
                                kind: ComprehensionKind::Generator,
                                element: Box::new(element),
                                clauses,
                            },
                            self.span_from(location),
                        ))
                    }

                    value => Argument::Positional(Located::at(value, location)),
                }
            };

            args.push(arg);
            if !self.accept(&Token::Comma) {
                break;
            }
        }

        Ok(args)
    }

    fn subscript_list(&mut self) -> Parse<Located<Expr>> {
        self.sequence(Parser::subscript, Parser::at_subscript_start)
    }

    fn subscript(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();
        let lower = self.optional(Parser::test)?;

        if !self.accept(&Token::Colon) {
            return match lower {
                Some(index) => Ok(index),
                None => self.fail(ParserError::ExpectedExpr),
            };
        }

        let upper = self.optional(Parser::test)?;
        let step = if self.accept(&Token::Colon) {
            self.optional(Parser::test)?
        } else {
            None
        };

        Ok(Located::at(
            Expr::Slice {
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
                step: step.map(Box::new),
            },
            self.span_from(start),
        ))
    }

    fn atom(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();
        let expr = match self.peek() {
            Some(Token::Id(id)) => {
                self.advance();
                Expr::Name(id.clone())
            }

            Some(Token::IntLiteral(text)) => {
                self.advance();
                Expr::Integer(text.clone())
            }

            Some(Token::FloatLiteral(text)) => {
                self.advance();
                Expr::Float(text.clone())
            }

            Some(Token::ImaginaryLiteral(text)) => {
                self.advance();
                Expr::Imaginary(text.clone())
            }

            Some(Token::StrLiteral(_)) => {
                let mut pieces = Vec::new();
                while let Some(Token::StrLiteral(literal)) = self.peek() {
                    pieces.push(literal.clone());
                    self.advance();
                }

                Expr::Str(pieces)
            }

            Some(Token::Keyword(Keyword::True)) => {
                self.advance();
                Expr::True
            }

            Some(Token::Keyword(Keyword::False)) => {
                self.advance();
                Expr::False
            }

            Some(Token::Keyword(Keyword::None)) => {
                self.advance();
                Expr::None
            }

            Some(Token::Ellipsis) => {
                self.advance();
                Expr::Ellipsis
            }

            Some(Token::OpenParen) => return self.parenthesized(),
            Some(Token::OpenSquare) => return self.list_display(),
            Some(Token::OpenCurly) => return self.curly_display(),

            _ => {
                return Err(Failure::Weak(Located::at(ParserError::ExpectedExpr, start)));
            }
        };

        Ok(Located::at(expr, self.span_from(start)))
    }

    fn parenthesized(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();
        self.expect(Token::OpenParen)?;

        if self.accept(&Token::CloseParen) {
            return Ok(Located::at(Expr::Tuple(Vec::new()), self.span_from(start)));
        } else if self.check(&Token::Keyword(Keyword::Yield)) {
            let expr = self.yield_expr()?;
            self.expect(Token::CloseParen)?;
            return Ok(expr);
        }

        let first = self.star_or_named_test().map_err(Failure::strict)?;
        let expr = if self.at_comprehension() {
            let clauses = self.clauses()?;
            Expr::Comprehension {
                kind: ComprehensionKind::Generator,
                element: Box::new(first),
                clauses,
            }
        } else if self.check(&Token::Comma) {
            let mut items = vec![first];
            while self.accept(&Token::Comma) {
                if self.check(&Token::CloseParen) {
                    break;
                }

                items.push(self.star_or_named_test()?);
            }

            Expr::Tuple(items)
        } else {
            // Paréntesis agrupadores, la ubicación se extiende a ellos
            self.expect(Token::CloseParen)?;
            return Ok(Located::at(first.into_inner(), self.span_from(start)));
        };

        self.expect(Token::CloseParen)?;
        Ok(Located::at(expr, self.span_from(start)))
    }

    fn list_display(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();
        self.expect(Token::OpenSquare)?;

        if self.accept(&Token::CloseSquare) {
            return Ok(Located::at(Expr::List(Vec::new()), self.span_from(start)));
        }

        let first = self.star_or_named_test().map_err(Failure::strict)?;
        let expr = if self.at_comprehension() {
            Expr::Comprehension {
                kind: ComprehensionKind::List,
                element: Box::new(first),
                clauses: self.clauses()?,
            }
        } else {
            Expr::List(self.display_items(first, &Token::CloseSquare)?)
        };

        self.expect(Token::CloseSquare)?;
        Ok(Located::at(expr, self.span_from(start)))
    }

    fn curly_display(&mut self) -> Parse<Located<Expr>> {
        let start = self.here();
        self.expect(Token::OpenCurly)?;

        if self.accept(&Token::CloseCurly) {
            return Ok(Located::at(Expr::Dict(Vec::new()), self.span_from(start)));
        }

        let expr = if self.check(&Token::Power) {
            self.dict_items(None)?
        } else {
            let first = self.star_or_named_test().map_err(Failure::strict)?;
            if self.accept(&Token::Colon) {
                let value = self.test().map_err(Failure::strict)?;

                if self.at_comprehension() {
                    let location = Location::span(first.location().clone(), value.location());
                    let pair = Located::at(Expr::Tuple(vec![first, value]), location);

                    Expr::Comprehension {
                        kind: ComprehensionKind::Dict,
                        element: Box::new(pair),
                        clauses: self.clauses()?,
                    }
                } else {
                    self.dict_items(Some((first, value)))?
                }
            } else if self.at_comprehension() {
                Expr::Comprehension {
                    kind: ComprehensionKind::Set,
                    element: Box::new(first),
                    clauses: self.clauses()?,
                }
            } else {
                Expr::Set(self.display_items(first, &Token::CloseCurly)?)
            }
        };

        self.expect(Token::CloseCurly)?;
        Ok(Located::at(expr, self.span_from(start)))
    }

    /// Elementos restantes de una lista o conjunto literal.
    fn display_items(&mut self, first: Located<Expr>, close: &Token) -> Parse<Vec<Located<Expr>>> {
        let mut items = vec![first];
        while self.accept(&Token::Comma) {
            if self.check(close) {
                break;
            }

            items.push(self.star_or_named_test()?);
        }

        Ok(items)
    }

    fn dict_items(&mut self, first: Option<(Located<Expr>, Located<Expr>)>) -> Parse<Expr> {
        let mut items = Vec::new();
        let mut pending = first.map(|(key, value)| (Some(key), value));

        loop {
            match pending.take() {
                Some(item) => items.push(item),
                None => {
                    if self.accept(&Token::Power) {
                        items.push((None, self.bitor()?));
                    } else {
                        let key = self.test()?;
                        self.expect(Token::Colon)?;
                        items.push((Some(key), self.test()?));
                    }
                }
            }

            if !self.accept(&Token::Comma) || self.check(&Token::CloseCurly) {
                break Ok(Expr::Dict(items));
            }
        }
    }

    fn at_comprehension(&mut self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Keyword(Keyword::For)) | Some(Token::Keyword(Keyword::Async))
        )
    }

    fn clauses(&mut self) -> Parse<Vec<Clause>> {
        let mut clauses = Vec::new();

        while self.at_comprehension() {
            self.accept_keyword(Keyword::Async);
            self.keyword(Keyword::For)?;

            let target = self.target_list()?;
            self.keyword(Keyword::In)?;
            let iterable = self.or_test().map_err(Failure::strict)?;

            let mut conditions = Vec::new();
            while self.accept_keyword(Keyword::If) {
                conditions.push(self.or_test().map_err(Failure::strict)?);
            }

            clauses.push(Clause {
                target,
                iterable,
                conditions,
            });
        }

        Ok(clauses)
    }

    /// Determina si el siguiente token puede iniciar una expresión.
    fn at_expression_start(&mut self) -> bool {
        use Keyword::*;

        match self.peek() {
            Some(Token::Keyword(keyword)) => matches!(
                keyword,
                True | False | None | Not | Lambda | Await | Yield
            ),

            Some(token) => matches!(
                token,
                Token::Id(_)
                    | Token::IntLiteral(_)
                    | Token::FloatLiteral(_)
                    | Token::ImaginaryLiteral(_)
                    | Token::StrLiteral(_)
                    | Token::OpenParen
                    | Token::OpenSquare
                    | Token::OpenCurly
                    | Token::Plus
                    | Token::Minus
                    | Token::Tilde
                    | Token::Times
                    | Token::Ellipsis
            ),

            Option::None => false,
        }
    }

    /// Un elemento de subíndice puede iniciar con `:`, como en `a[0, :]`.
    fn at_subscript_start(&mut self) -> bool {
        self.check(&Token::Colon) || self.at_expression_start()
    }

    fn at_statement_end(&mut self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::Newline) | Some(Token::Semicolon)
        )
    }

    fn optional<T, F>(&mut self, rule: F) -> Parse<Option<T>>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        match self.attempt(rule) {
            Err(Failure::Weak(_)) => Ok(None),
            result => Ok(Some(result?)),
        }
    }

    fn attempt<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        let mut fork = self.clone();

        let result = rule(&mut fork);
        if result.is_ok() {
            *self = fork;
        }

        result
    }

    fn lookahead<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        rule(&mut self.clone())
    }

    /// Secuencia separada por comas; se permite una coma final.
    fn comma_separated<T, F>(&mut self, mut rule: F, allow_empty: bool) -> Parse<Vec<T>>
    where
        F: FnMut(&mut Self) -> Parse<T>,
    {
        let mut items = match self.attempt(|s| rule(s)) {
            Err(Failure::Weak(_)) if allow_empty => return Ok(Vec::new()),
            item => vec![item.map_err(Failure::strict)?],
        };

        loop {
            if !self.accept(&Token::Comma) {
                break Ok(items);
            }

            match self.attempt(|s| rule(s)) {
                Err(Failure::Weak(_)) => break Ok(items),
                item => items.push(item?),
            }
        }
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        match self.peek() {
            Some(Token::Id(_)) => (),
            _ => {
                return Err(Failure::Weak(Located::at(
                    ParserError::ExpectedId,
                    self.here(),
                )))
            }
        }

        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            _ => self.fail(ParserError::ExpectedId),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn accept_keyword(&mut self, keyword: Keyword) -> bool {
        self.accept(&Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.next().map(Located::into_inner) {
            Ok(found) if found == token => Ok(()),
            Ok(found) => self.fail(ParserError::UnexpectedToken(token, found)),
            Err(_) => self.fail(ParserError::MissingToken(token)),
        }
    }

    fn check(&mut self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn accept(&mut self, token: &Token) -> bool {
        let found = self.check(token);
        if found {
            self.advance();
        }

        found
    }

    fn peek(&mut self) -> Option<&'a Token> {
        self.tokens.peek().map(|&token| token.val())
    }

    /// Ubicación del siguiente token, o la última conocida al final.
    fn here(&mut self) -> Location {
        match self.tokens.peek() {
            Some(token) => token.location().clone(),
            None => self.last_known.clone(),
        }
    }

    fn span_from(&self, start: Location) -> Location {
        Location::span(start, &self.last_known)
    }

    fn advance(&mut self) -> Option<&'a Located<Token>> {
        let token = self.tokens.next()?;
        self.last_known = token.location().clone();

        Some(token)
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.advance() {
            Some(token) => Ok(token.clone()),
            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Failure::Strict(Located::at(error, self.last_known.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn parse_text(text: &str) -> Result<Ast, String> {
        let (start, stream) = source::consume(text.as_bytes(), "test.py");
        let tokens = Lexer::new(start.clone(), stream)
            .try_exhaustive()
            .map_err(|errors| errors[0].val().to_string())?;

        parse(tokens.iter(), start).map_err(|error| error.val().to_string())
    }

    fn single_expr(text: &str) -> Located<Expr> {
        let ast = parse_text(text).expect("syntax error");
        match ast.statements.into_iter().next().map(Located::into_inner) {
            Some(Statement::Expr(expr)) => expr,
            other => panic!("expected expression statement, found {:?}", other),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = single_expr("a + b * c ** 2\n");
        let (left, op, right) = match expr.into_inner() {
            Expr::Binary(left, op, right) => (left, op, right),
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(op, BinOp::Add);
        assert!(matches!(left.val(), Expr::Name(_)));
        match right.val() {
            Expr::Binary(_, BinOp::Mul, power) => {
                assert!(matches!(power.val(), Expr::Binary(_, BinOp::Pow, _)))
            }

            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        match single_expr("-x ** 2\n").into_inner() {
            Expr::Unary(UnaryOp::Minus, operand) => {
                assert!(matches!(operand.val(), Expr::Binary(_, BinOp::Pow, _)))
            }

            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn chained_comparisons_keep_every_pair() {
        match single_expr("a < b <= c not in d\n").into_inner() {
            Expr::Compare(_, pairs) => {
                let ops: Vec<_> = pairs.iter().map(|(op, _)| *op).collect();
                assert_eq!(ops, vec![CmpOp::Less, CmpOp::LessOrEqual, CmpOp::NotIn]);
            }

            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn function_with_decorators_and_annotations() {
        let ast = parse_text(
            "@arena\n@inline_c(\"int x;\")\ndef f(a: int, b=2, *rest, **kw) -> bool:\n    return a\n",
        )
        .unwrap();

        let function = match ast.statements()[0].val() {
            Statement::Function(function) => function,
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(function.name().val().as_ref(), "f");
        assert_eq!(function.decorators().len(), 2);
        assert!(function.returns().is_some());

        let kinds: Vec<_> = function.parameters().iter().map(Parameter::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParameterKind::Positional,
                ParameterKind::Positional,
                ParameterKind::Variadic,
                ParameterKind::KeywordVariadic
            ]
        );

        assert!(function.parameters()[0].annotation().is_some());
        assert!(function.parameters()[1].default().is_some());
    }

    #[test]
    fn statements_carry_their_lines() {
        let ast = parse_text("import time\n\nx: int = 1\ny = x; z = 2\n").unwrap();
        let lines: Vec<_> = ast
            .statements()
            .iter()
            .map(|statement| statement.location().start().line())
            .collect();

        assert_eq!(lines, vec![1, 3, 4, 4]);
    }

    #[test]
    fn elif_nests_in_else_branch() {
        let ast = parse_text("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n").unwrap();

        match ast.statements()[0].val() {
            Statement::If { orelse, .. } => match orelse[0].val() {
                Statement::If { orelse, .. } => assert_eq!(orelse.len(), 1),
                other => panic!("unexpected {:?}", other),
            },

            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn displays_and_comprehensions() {
        assert!(matches!(single_expr("[0] * 10\n").val(), Expr::Binary(..)));
        assert!(matches!(single_expr("(a, b)\n").val(), Expr::Tuple(items) if items.len() == 2));
        assert!(matches!(single_expr("{1: 2, **m}\n").val(), Expr::Dict(items) if items.len() == 2));
        assert!(matches!(
            single_expr("[x for x in y if x]\n").val(),
            Expr::Comprehension {
                kind: ComprehensionKind::List,
                ..
            }
        ));
        assert!(matches!(
            single_expr("sum(x for x in y)\n").val(),
            Expr::Call { .. }
        ));
        assert!(matches!(single_expr("a[1:2, ::3]\n").val(), Expr::Subscript(..)));
        assert!(matches!(
            single_expr("'a' if c else 'b'\n").val(),
            Expr::Conditional { .. }
        ));
    }

    #[test]
    fn slices_inside_subscript_tuples() {
        let expr = single_expr("a[0, :]\n");
        let items = match expr.val() {
            Expr::Subscript(_, index) => match index.val() {
                Expr::Tuple(items) => items,
                other => panic!("expected tuple index, found {:?}", other),
            },
            other => panic!("expected subscript, found {:?}", other),
        };

        assert!(matches!(items[0].val(), Expr::Integer(_)));
        assert!(matches!(
            items[1].val(),
            Expr::Slice {
                lower: None,
                upper: None,
                step: None
            }
        ));

        assert!(matches!(single_expr("a[1:2, ::3]\n").val(), Expr::Subscript(..)));
        assert!(matches!(single_expr("a[0,]\n").val(), Expr::Subscript(..)));
    }

    #[test]
    fn compound_statements_parse() {
        let text = "\
class A(B):
    def m(self):
        with open(p) as f, lock:
            pass

try:
    for i, j in pairs:
        continue
    else:
        raise E from e
except E as e:
    del x[0], y
finally:
    assert x, 'msg'

from . import a as b, c
from os.path import *
lambda x, y=1: x + y
";

        let ast = parse_text(text).unwrap();
        assert_eq!(ast.statements().len(), 5);
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(
            parse_text("def f(:\n    pass\n").unwrap_err(),
            "Expected identifier"
        );
        assert_eq!(
            parse_text("if x:\npass\n").unwrap_err(),
            "Expected an indented block"
        );
        assert_eq!(
            parse_text("f() = 3\n").unwrap_err(),
            "Cannot assign to this expression"
        );
        assert_eq!(
            parse_text("x = (1,\n").unwrap_err(),
            "Expected an expression"
        );
    }
}
