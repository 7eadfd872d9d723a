//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los espacios
//! en blanco y los comentarios se descartan durante esta operación. Cada
//! token emitido esta asociado a una ubicación en el código fuente original,
//! lo cual permite rastrear errores en tanto los mismos como constructos
//! más elevados de fases posteriores.
//!
//! # Contenido de un token
//! Operadores, puntuación y palabras clave se identifican por el hecho de
//! lo que son y no incluyen lexemas. Los identificadores sí incluyen su
//! lexema original. A diferencia de un compilador que evalúa constantes,
//! los literales numéricos y de texto preservan su texto fuente: el
//! generador los reproduce casi sin cambios en C, por lo cual resolverlos
//! a valores solo perdería información (bases, sufijos, secuencias de
//! escape).
//!
//! # Estructura por indentación
//! El lenguaje delimita bloques por indentación. El lexer mantiene una
//! pila de anchos de indentación y emite [`Token::Indent`] y
//! [`Token::Dedent`] al cambiar de nivel, así como [`Token::Newline`] al
//! final de cada línea lógica. Dentro de `()`, `[]` y `{}`, o luego de `\`,
//! los saltos de línea no terminan la línea lógica. Las líneas en blanco o
//! con solo comentarios no producen tokens.
//!
//! # Errores
//! El lexer es capaz de recuperarse parcialmente de condiciones de error.
//! Esto ocurre en suficiente grado como para reportar más de un error por
//! ejecución, pero no lo suficiente como para permitir el avance a las
//! demás fases de la compilación.

use crate::{
    parse::BinOp,
    source::{InputStream, Located, Location},
};

use std::{
    collections::VecDeque,
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
    str::FromStr,
};

use bitflags::bitflags;
use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Error de E/S originado por el [`InputStream`].
    #[error("I/O error")]
    Input(#[from] std::io::Error),

    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Se esperaba un carácter específico en esta posición.
    #[error("Expected {0:?}")]
    Expected(char),

    /// Un literal de texto no se cerró antes del final de línea o archivo.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// Un literal numérico tiene forma inválida.
    #[error("Malformed numeric literal `{0}`")]
    BadNumber(String),

    /// Una línea reduce su indentación a un nivel que nunca se abrió.
    #[error("Unindent does not match any outer indentation level")]
    InconsistentDedent,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<str>);

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

bitflags! {
    /// Prefijos de un literal de texto (`r"..."`, `f'...'`, etc.).
    #[derive(Default)]
    pub struct StrPrefix: u8 {
        /// `r`: las barras invertidas son literales.
        const RAW = 0x01;

        /// `b`: literal de bytes.
        const BYTES = 0x02;

        /// `f`: texto con interpolación.
        const FORMAT = 0x04;

        /// `u`: sin efecto, se preserva por completitud.
        const UNICODE = 0x08;
    }
}

impl StrPrefix {
    /// Interpreta un término como prefijo de literal, si lo es.
    fn parse(word: &str) -> Option<Self> {
        if word.is_empty() || word.len() > 2 {
            return None;
        }

        let mut prefix = StrPrefix::empty();
        for c in word.chars() {
            let flag = match c.to_ascii_lowercase() {
                'r' => StrPrefix::RAW,
                'b' => StrPrefix::BYTES,
                'f' => StrPrefix::FORMAT,
                'u' => StrPrefix::UNICODE,
                _ => return None,
            };

            if prefix.contains(flag) {
                return None;
            }

            prefix |= flag;
        }

        let valid = !prefix.contains(StrPrefix::UNICODE) || prefix == StrPrefix::UNICODE;
        let valid = valid && !prefix.contains(StrPrefix::BYTES | StrPrefix::FORMAT);

        valid.then(|| prefix)
    }
}

/// Literal de texto, sin decodificar.
///
/// `body` es el texto exacto entre comillas, incluyendo secuencias
/// de escape y saltos de línea reales en el caso de comillas triples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrLiteral {
    pub prefix: StrPrefix,
    pub quote: char,
    pub triple: bool,
    pub body: String,
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal entero, tal como aparece en el código fuente.
    IntLiteral(String),

    /// Literal de punto flotante.
    FloatLiteral(String),

    /// Literal imaginario (`2j`).
    ImaginaryLiteral(String),

    /// Literal de texto o bytes.
    StrLiteral(StrLiteral),

    /// Fin de línea lógica.
    Newline,

    /// Aumento de indentación.
    Indent,

    /// Reducción de indentación.
    Dedent,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `:`
    Colon,

    /// `,`
    Comma,

    /// `;`
    Semicolon,

    /// `.`
    Period,

    /// `...`
    Ellipsis,

    /// `->`
    Arrow,

    /// `@`
    At,

    /// `=`
    Assign,

    /// `:=`
    Walrus,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `**`
    Power,

    /// `/`
    Slash,

    /// `//`
    DoubleSlash,

    /// `%`
    Percent,

    /// `~`
    Tilde,

    /// `&`
    Ampersand,

    /// `|`
    Pipe,

    /// `^`
    Caret,

    /// `<<`
    ShiftLeft,

    /// `>>`
    ShiftRight,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `<`
    Less,

    /// `<=`
    LessOrEqual,

    /// `>`
    Greater,

    /// `>=`
    GreaterOrEqual,

    /// `+=`, `-=`, `//=`, etc.
    AugAssign(BinOp),
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            IntLiteral(text) | FloatLiteral(text) | ImaginaryLiteral(text) => {
                write!(fmt, "literal `{}`", text)
            }
            StrLiteral(_) => fmt.write_str("string literal"),
            Newline => fmt.write_str("end of line"),
            Indent => fmt.write_str("indent"),
            Dedent => fmt.write_str("dedent"),
            AugAssign(op) => write!(fmt, "`{}=`", op),
            _ => {
                let symbol = SYMBOLS
                    .iter()
                    .find(|symbol| operator(symbol).as_ref() == Some(self))
                    .unwrap_or(&"?");

                write!(fmt, "`{}`", symbol)
            }
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("False",    Keyword::False),
    ("None",     Keyword::None),
    ("True",     Keyword::True),
    ("and",      Keyword::And),
    ("as",       Keyword::As),
    ("assert",   Keyword::Assert),
    ("async",    Keyword::Async),
    ("await",    Keyword::Await),
    ("break",    Keyword::Break),
    ("class",    Keyword::Class),
    ("continue", Keyword::Continue),
    ("def",      Keyword::Def),
    ("del",      Keyword::Del),
    ("elif",     Keyword::Elif),
    ("else",     Keyword::Else),
    ("except",   Keyword::Except),
    ("finally",  Keyword::Finally),
    ("for",      Keyword::For),
    ("from",     Keyword::From),
    ("global",   Keyword::Global),
    ("if",       Keyword::If),
    ("import",   Keyword::Import),
    ("in",       Keyword::In),
    ("is",       Keyword::Is),
    ("lambda",   Keyword::Lambda),
    ("nonlocal", Keyword::Nonlocal),
    ("not",      Keyword::Not),
    ("or",       Keyword::Or),
    ("pass",     Keyword::Pass),
    ("raise",    Keyword::Raise),
    ("return",   Keyword::Return),
    ("try",      Keyword::Try),
    ("while",    Keyword::While),
    ("with",     Keyword::With),
    ("yield",    Keyword::Yield),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = KEYWORDS
            .iter()
            .find(|(_, keyword)| keyword == self)
            .map(|(name, _)| *name)
            .unwrap_or("?");

        fmt.write_str(name)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Todos los operadores y signos de puntuación reconocidos.
const SYMBOLS: &[&str] = &[
    "(", ")", "[", "]", "{", "}", ":", ",", ";", ".", "...", "->", "@", "=", ":=", "+", "-",
    "*", "**", "/", "//", "%", "~", "&", "|", "^", "<<", ">>", "==", "!=", "<", "<=", ">", ">=",
    "+=", "-=", "*=", "/=", "//=", "%=", "**=", "@=", "&=", "|=", "^=", "<<=", ">>=",
];

/// Construye el token que corresponde a un símbolo completo.
fn operator(symbol: &str) -> Option<Token> {
    use Token::*;

    let token = match symbol {
        "(" => OpenParen,
        ")" => CloseParen,
        "[" => OpenSquare,
        "]" => CloseSquare,
        "{" => OpenCurly,
        "}" => CloseCurly,
        ":" => Colon,
        "," => Comma,
        ";" => Semicolon,
        "." => Period,
        "..." => Ellipsis,
        "->" => Arrow,
        "@" => At,
        "=" => Assign,
        ":=" => Walrus,
        "+" => Plus,
        "-" => Minus,
        "*" => Times,
        "**" => Power,
        "/" => Slash,
        "//" => DoubleSlash,
        "%" => Percent,
        "~" => Tilde,
        "&" => Ampersand,
        "|" => Pipe,
        "^" => Caret,
        "<<" => ShiftLeft,
        ">>" => ShiftRight,
        "==" => Equal,
        "!=" => NotEqual,
        "<" => Less,
        "<=" => LessOrEqual,
        ">" => Greater,
        ">=" => GreaterOrEqual,
        "+=" => AugAssign(BinOp::Add),
        "-=" => AugAssign(BinOp::Sub),
        "*=" => AugAssign(BinOp::Mul),
        "/=" => AugAssign(BinOp::Div),
        "//=" => AugAssign(BinOp::FloorDiv),
        "%=" => AugAssign(BinOp::Mod),
        "**=" => AugAssign(BinOp::Pow),
        "@=" => AugAssign(BinOp::MatMul),
        "&=" => AugAssign(BinOp::BitAnd),
        "|=" => AugAssign(BinOp::BitOr),
        "^=" => AugAssign(BinOp::BitXor),
        "<<=" => AugAssign(BinOp::ShiftLeft),
        ">>=" => AugAssign(BinOp::ShiftRight),
        _ => return None,
    };

    Some(token)
}

/// Determina si algún símbolo comienza con el texto dado.
fn is_symbol_prefix(text: &str) -> bool {
    SYMBOLS.iter().any(|symbol| symbol.starts_with(text))
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<S: Iterator> {
    source: Peekable<S>,
    state: State,
    start: Location,
    next: Location,
    indents: Vec<u32>,
    depth: u32,
    line_has_tokens: bool,
    pending: VecDeque<Located<Token>>,
}

/// Posibles estados del lexer.
enum State {
    /// Inicio de una línea lógica, se mide su indentación.
    LineStart,

    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de error.
    Error,

    /// Fin de la entrada, ya se emitieron los tokens de cierre.
    End,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Comentario de línea.
    ///
    /// Este estado vuelve a [`State::Start`] al encontrar `'\n'`,
    /// sin consumirlo.
    Comment,

    /// Se encontró `\`, debe seguir un salto de línea.
    Continuation,

    /// Operador o signo de puntuación, posiblemente de varios caracteres.
    Operator(String),

    /// Literal numérico.
    Number(String),

    /// Término que puede ser un identificador, una palabra clave
    /// o el prefijo de un literal de texto.
    Word(String),

    /// Comillas de apertura, se cuentan para detectar comillas triples.
    Quote {
        prefix: StrPrefix,
        quote: char,
        count: u8,
    },

    /// Cuerpo de un literal de texto.
    Str {
        literal: StrLiteral,
        escaped: bool,
        closing: u8,
    },
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, source: S) -> Self {
        let next = start.clone();
        Lexer {
            source: source.peekable(),
            state: State::LineStart,
            start,
            next,
            indents: vec![0],
            depth: 0,
            line_has_tokens: false,
            pending: VecDeque::new(),
        }
    }

    /// Reduce la entrada a sea una secuencia conocida de tokens
    /// infalibles o una secuencia de errores.
    ///
    /// En caso de que ocurra al menos un error, el lexer dejará
    /// de buscar tokens exitosos y comenzará a acumular solamente
    /// errores. El propósito de esta función es permitir la
    /// recolección de múltiples errores léxicos en una misma ejecución
    /// del compilador.
    pub fn try_exhaustive(mut self) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
        let mut tokens = Vec::new();

        while let Some(result) = self.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => {
                    drop(tokens);

                    let mut errors = vec![error];
                    errors.extend(self.filter_map(Result::err));

                    return Err(errors);
                }
            }
        }

        Ok(tokens)
    }

    /// Intenta construir un siguiente token.
    ///
    /// `Ok(None)` indica que no se construyó un token en esta
    /// invocación, ya sea porque se encolaron tokens de estructura
    /// o porque terminó la entrada.
    fn lex(&mut self) -> Result<Option<(Token, Location)>, LexerError> {
        use {State::*, Token::*};

        let mut last_accepted = self.start.clone();
        let token = loop {
            // Se espera un siguiente carácter, fallando si hay error de E/S
            let next_char = match self.source.peek() {
                None => None,
                Some(Ok((c, _))) => Some(*c),
                Some(Err(_)) => match self.source.next() {
                    Some(Err(error)) => break Err(error.into()),
                    _ => unreachable!(),
                },
            };

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start | LineStart = self.state {
                self.start = self.next.clone();
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                (End, _) => return Ok(None),

                // Condiciones de error: se descarta la línea donde
                // ocurrió el error. Al llegar al final de la línea
                // el lexer se recupera y reinicia.
                (Error, None) => {
                    self.state = End;
                    return Ok(None);
                }

                (Error, Some('\n')) => {
                    self.depth = 0;
                    self.line_has_tokens = false;
                    self.state = LineStart;
                }

                (Error, Some(_)) => (),

                // Indentación al inicio de línea
                (LineStart, None) | (Start, None) => {
                    self.finish();
                    return Ok(None);
                }

                (LineStart, Some(' ' | '\t' | '\x0c' | '\n')) => (),
                (LineStart, Some('#')) => self.state = Comment,
                (LineStart, Some(_)) => {
                    let width = self.next.start().column() - 1;
                    self.state = Start;
                    self.indent_to(width)?;

                    if !self.pending.is_empty() {
                        return Ok(None);
                    }

                    continue;
                }

                // Fin de línea lógica, a menos que haya agrupadores abiertos
                (Start, Some('\n')) => {
                    if self.depth == 0 {
                        if self.line_has_tokens {
                            let newline = Located::at(Newline, self.next.clone());
                            self.pending.push_back(newline);
                            self.line_has_tokens = false;
                        }

                        self.state = LineStart;
                        self.bump();
                        return Ok(None);
                    }
                }

                (Start, Some(c)) if c.is_whitespace() => (),
                (Start, Some('#')) => self.state = Comment,
                (Start, Some('\\')) => self.state = Continuation,

                // Literales de texto sin prefijo
                (Start, Some(quote @ ('"' | '\''))) => {
                    self.state = Quote {
                        prefix: StrPrefix::empty(),
                        quote,
                        count: 0,
                    };

                    continue;
                }

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string())
                }

                // Inicio de una constante numérica. No se consume el
                // carácter, ya que esta lógica ya está implementada en
                // el respectivo caso para un estado de constante
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Number(String::new());
                    continue;
                }

                (Start, Some(c)) if is_symbol_prefix(c.encode_utf8(&mut [0; 4])) => {
                    self.state = Operator(String::new());
                    continue;
                }

                (Start, Some(c)) => break Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => break Ok(std::mem::replace(value, Newline)),

                // Los comentarios descartan la línea donde ocurren
                (Comment, Some('\n')) | (Comment, None) => {
                    self.state = Start;
                    continue;
                }

                (Comment, Some(_)) => (),

                // `\` solo puede continuar una línea
                (Continuation, Some('\n')) => self.state = Start,
                (Continuation, _) => break Err(LexerError::Expected('\n')),

                // `.5` es un literal y no un acceso a atributo
                (Operator(symbol), Some(c)) if symbol == "." && c.is_ascii_digit() => {
                    self.state = Number(String::from("."));
                    continue;
                }

                // Operadores de varios caracteres crecen mientras
                // sigan siendo prefijos de algún símbolo conocido
                (Operator(symbol), Some(c)) if is_symbol_prefix(&format!("{}{}", symbol, c)) => {
                    symbol.push(c)
                }

                (Operator(symbol), _) => match operator(symbol) {
                    Some(token) => break Ok(token),
                    None => {
                        let first = symbol.chars().next().unwrap_or('?');
                        break Err(LexerError::BadChar(first));
                    }
                },

                // Acumulación de literales numéricos, incluyendo signos de exponente
                (Number(text), Some(c))
                    if c.is_ascii_alphanumeric()
                        || c == '_'
                        || c == '.'
                        || (matches!(c, '+' | '-') && expects_exponent_sign(text)) =>
                {
                    text.push(c)
                }

                (Number(text), _) => break number(std::mem::take(text)),

                // Extensión de términos
                (Word(word), Some(c)) if c.is_alphanumeric() || c == '_' => word.push(c),

                // Un término seguido de comillas puede ser un prefijo de literal
                (Word(word), Some(quote @ ('"' | '\''))) if StrPrefix::parse(word).is_some() => {
                    let prefix = StrPrefix::parse(word).unwrap_or_default();
                    self.state = Quote {
                        prefix,
                        quote,
                        count: 0,
                    };

                    continue;
                }

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => {
                    if let Ok(keyword) = self::Keyword::from_str(word) {
                        break Ok(Keyword(keyword));
                    } else {
                        break Ok(Id(Identifier(Rc::from(word.as_str()))));
                    }
                }

                // Conteo de comillas de apertura
                (Quote { quote, count, .. }, Some(c)) if c == *quote && *count < 3 => {
                    *count += 1;
                }

                (Quote { prefix, quote, count }, _) => {
                    let literal = self::StrLiteral {
                        prefix: *prefix,
                        quote: *quote,
                        triple: *count == 3,
                        body: String::new(),
                    };

                    // Dos comillas seguidas de otra cosa son un literal vacío
                    if *count == 2 {
                        break Ok(StrLiteral(literal));
                    }

                    self.state = Str {
                        literal,
                        escaped: false,
                        closing: 0,
                    };

                    continue;
                }

                // Cuerpo de literales de texto
                (Str { .. }, None) => break Err(LexerError::UnterminatedString),

                (Str { literal, escaped, .. }, Some(c)) if *escaped => {
                    literal.body.push(c);
                    *escaped = false;
                }

                (
                    Str {
                        literal, closing, ..
                    },
                    Some(c),
                ) if c == literal.quote => {
                    if literal.triple && *closing < 2 {
                        *closing += 1;
                    } else {
                        self.state = Complete(StrLiteral(take_literal(literal)));
                    }
                }

                (Str { literal, .. }, Some('\n')) if !literal.triple => {
                    break Err(LexerError::UnterminatedString)
                }

                (
                    Str {
                        literal,
                        escaped,
                        closing,
                    },
                    Some(c),
                ) => {
                    // Comillas que no completaron un cierre triple son contenido
                    for _ in 0..std::mem::take(closing) {
                        literal.body.push(literal.quote);
                    }

                    literal.body.push(c);
                    *escaped = c == '\\';
                }
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            if let Some(accepted) = self.bump() {
                last_accepted = accepted;
            }
        };

        token.map(|token| Some((token, last_accepted)))
    }

    /// Consume el carácter actual, retornando su ubicación.
    fn bump(&mut self) -> Option<Location> {
        match self.source.next() {
            Some(Ok((_, next_position))) => Some(std::mem::replace(&mut self.next, next_position)),
            _ => None,
        }
    }

    /// Encola los tokens de estructura necesarios para pasar a una
    /// línea con la indentación indicada.
    fn indent_to(&mut self, width: u32) -> Result<(), LexerError> {
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.pending
                .push_back(Located::at(Token::Indent, self.next.clone()));

            return Ok(());
        }

        while width < self.indents.last().copied().unwrap_or(0) {
            self.indents.pop();
            self.pending
                .push_back(Located::at(Token::Dedent, self.next.clone()));
        }

        if width == self.indents.last().copied().unwrap_or(0) {
            Ok(())
        } else {
            Err(LexerError::InconsistentDedent)
        }
    }

    /// Cierra la última línea y todos los bloques abiertos.
    fn finish(&mut self) {
        if self.line_has_tokens {
            self.pending
                .push_back(Located::at(Token::Newline, self.next.clone()));
            self.line_has_tokens = false;
        }

        while self.indents.len() > 1 {
            self.indents.pop();
            self.pending
                .push_back(Located::at(Token::Dedent, self.next.clone()));
        }

        self.state = State::End;
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(Ok(token));
            } else if let State::End = self.state {
                return None;
            }

            match self.lex() {
                Ok(None) => continue,

                Ok(Some((token, last_accepted))) => {
                    self.state = State::Start;
                    self.line_has_tokens = true;

                    match token {
                        Token::OpenParen | Token::OpenSquare | Token::OpenCurly => self.depth += 1,
                        Token::CloseParen | Token::CloseSquare | Token::CloseCurly => {
                            self.depth = self.depth.saturating_sub(1)
                        }

                        _ => (),
                    }

                    let location = Location::span(self.start.clone(), &last_accepted);
                    return Some(Ok(Located::at(token, location)));
                }

                Err(error) => {
                    self.state = State::Error;
                    return Some(Err(Located::at(error, self.next.clone())));
                }
            }
        }
    }
}

/// Extrae un literal en construcción, dejando uno vacío en su lugar.
fn take_literal(literal: &mut StrLiteral) -> StrLiteral {
    let empty = StrLiteral {
        prefix: StrPrefix::empty(),
        quote: literal.quote,
        triple: literal.triple,
        body: String::new(),
    };

    std::mem::replace(literal, empty)
}

/// Determina si un literal numérico parcial acaba de abrir un exponente.
fn expects_exponent_sign(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.ends_with('e') && !lower.starts_with("0x")
}

/// Clasifica y valida un literal numérico completo.
fn number(text: String) -> Result<Token, LexerError> {
    let digits: String = text
        .chars()
        .filter(|&c| c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    let radix = |prefix: &str, radix: u32| {
        digits
            .strip_prefix(prefix)
            .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_digit(radix)))
    };

    let token = match (radix("0x", 16), radix("0o", 8), radix("0b", 2)) {
        (Some(true), _, _) | (_, Some(true), _) | (_, _, Some(true)) => Token::IntLiteral(text),
        (Some(false), _, _) | (_, Some(false), _) | (_, _, Some(false)) => {
            return Err(LexerError::BadNumber(text))
        }

        _ if digits.chars().all(|c| c.is_ascii_digit()) => Token::IntLiteral(text),

        _ => {
            let (real, imaginary) = match digits.strip_suffix('j') {
                Some(real) => (real, true),
                None => (digits.as_str(), false),
            };

            let valid = real.starts_with(|c: char| c.is_ascii_digit() || c == '.')
                && real.parse::<f64>().is_ok();

            match (valid, imaginary) {
                (false, _) => return Err(LexerError::BadNumber(text)),
                (true, true) => Token::ImaginaryLiteral(text),
                (true, false) => Token::FloatLiteral(text),
            }
        }
    };

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;

    fn tokens(text: &str) -> Vec<Token> {
        let (start, stream) = source::consume(text.as_bytes(), "test.py");
        Lexer::new(start, stream)
            .try_exhaustive()
            .expect("lexical errors")
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    fn errors(text: &str) -> Vec<String> {
        let (start, stream) = source::consume(text.as_bytes(), "test.py");
        match Lexer::new(start, stream).try_exhaustive() {
            Ok(_) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.val().to_string()).collect(),
        }
    }

    fn id(name: &str) -> Token {
        Token::Id(Identifier::from(name))
    }

    #[test]
    fn indentation_produces_layout_tokens() {
        use Token::*;

        let found = tokens("def f():\n    x = 1\n\n    # comment\n    return x\ny = 2\n");
        let expected = vec![
            Keyword(super::Keyword::Def),
            id("f"),
            OpenParen,
            CloseParen,
            Colon,
            Newline,
            Indent,
            id("x"),
            Assign,
            IntLiteral("1".into()),
            Newline,
            Keyword(super::Keyword::Return),
            id("x"),
            Newline,
            Dedent,
            id("y"),
            Assign,
            IntLiteral("2".into()),
            Newline,
        ];

        assert_eq!(found, expected);
    }

    #[test]
    fn eof_closes_open_blocks() {
        let found = tokens("while x:\n  if y:\n    pass");
        let tail = &found[found.len() - 4..];
        assert_eq!(
            tail,
            &[
                Token::Keyword(Keyword::Pass),
                Token::Newline,
                Token::Dedent,
                Token::Dedent
            ]
        );
    }

    #[test]
    fn brackets_join_lines() {
        let found = tokens("f(a,\n  b)\n");
        assert!(!found[..found.len() - 1].contains(&Token::Newline));
        assert!(!found.contains(&Token::Indent));
    }

    #[test]
    fn multi_character_operators() {
        use Token::*;

        let found = tokens("a //= b ** c -> d != e <<= f ...");
        let operators: Vec<_> = found
            .into_iter()
            .filter(|token| !matches!(token, Id(_) | Newline))
            .collect();

        assert_eq!(
            operators,
            vec![
                AugAssign(BinOp::FloorDiv),
                Power,
                Arrow,
                NotEqual,
                AugAssign(BinOp::ShiftLeft),
                Ellipsis
            ]
        );
    }

    #[test]
    fn numbers_keep_their_text() {
        let found = tokens("0x40020000 1_000 3.5 .5 1e-3 2j");
        assert_eq!(
            &found[..6],
            &[
                Token::IntLiteral("0x40020000".into()),
                Token::IntLiteral("1_000".into()),
                Token::FloatLiteral("3.5".into()),
                Token::FloatLiteral(".5".into()),
                Token::FloatLiteral("1e-3".into()),
                Token::ImaginaryLiteral("2j".into()),
            ]
        );
    }

    #[test]
    fn strings_and_prefixes() {
        let found = tokens("s = f'x{y}' + \"a\\\"b\" + ''\n");
        let literals: Vec<_> = found
            .into_iter()
            .filter_map(|token| match token {
                Token::StrLiteral(literal) => Some(literal),
                _ => None,
            })
            .collect();

        assert_eq!(literals.len(), 3);
        assert_eq!(literals[0].prefix, StrPrefix::FORMAT);
        assert_eq!(literals[0].body, "x{y}");
        assert_eq!(literals[1].body, "a\\\"b");
        assert_eq!(literals[2].body, "");
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        let found = tokens("def f():\n    \"\"\"doc\n    __C_CODE__\n    x = \"q\"\n    \"\"\"\n");
        let literal = found
            .iter()
            .find_map(|token| match token {
                Token::StrLiteral(literal) => Some(literal),
                _ => None,
            })
            .expect("docstring");

        assert!(literal.triple);
        assert_eq!(literal.body, "doc\n    __C_CODE__\n    x = \"q\"\n    ");
    }

    #[test]
    fn string_locations_start_at_the_quote() {
        let (start, stream) = source::consume("x = 'abc'\n".as_bytes(), "test.py");
        let tokens = Lexer::new(start, stream).try_exhaustive().unwrap();

        let literal = &tokens[2];
        assert_eq!(literal.location().start().line(), 1);
        assert_eq!(literal.location().start().column(), 5);
    }

    #[test]
    fn lexical_errors_are_collected() {
        let found = errors("x = $\ny = 'open\nz = 1\n");
        assert_eq!(
            found,
            vec![
                "Bad character '$' in input stream".to_owned(),
                "Unterminated string literal".to_owned()
            ]
        );
    }

    #[test]
    fn inconsistent_dedent_is_rejected() {
        let found = errors("if x:\n    y = 1\n  z = 2\n");
        assert_eq!(
            found,
            vec!["Unindent does not match any outer indentation level".to_owned()]
        );
    }
}
