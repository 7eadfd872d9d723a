//! Traducción de expresiones.
//!
//! Las expresiones binarias y comparaciones se emiten siempre entre
//! paréntesis, de modo que la precedencia de C nunca altera el
//! significado del programa fuente.

use super::{CodegenWarning, Context};
use crate::{
    lex::{StrLiteral, StrPrefix},
    parse::{Argument, BinOp, CmpOp, Expr},
    source::{Located, Location},
};

pub(super) fn expr(cx: &mut Context, expr: &Located<Expr>) -> String {
    let location = expr.location();

    match expr.val() {
        Expr::True => String::from("true"),
        Expr::False => String::from("false"),
        Expr::Integer(text) => integer(text),
        Expr::Float(text) => text.replace('_', ""),
        Expr::Name(name) => name.to_string(),

        Expr::Str(pieces) => match string(pieces) {
            Ok(literal) => literal,
            Err(construct) => cx.unsupported(construct, location),
        },

        Expr::Binary(left, op, right) => match arithmetic(*op) {
            Some(symbol) => {
                let left = self::expr(cx, left);
                let right = self::expr(cx, right);
                format!("({} {} {})", left, symbol, right)
            }

            None => cx.unsupported(format!("operator `{}`", op), location),
        },

        Expr::Compare(left, pairs) => compare(cx, left, pairs, location),
        Expr::Call { callee, args } => call(cx, callee, args),

        other => cx.unsupported(describe(other), location),
    }
}

/// Símbolo C de un operador aritmético, si tiene traducción directa.
pub(super) fn arithmetic(op: BinOp) -> Option<&'static str> {
    let symbol = match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div | BinOp::FloorDiv => "/",
        BinOp::Mod => "%",
        _ => return None,
    };

    Some(symbol)
}

/// Texto de un literal de texto ordinario, sin decodificar.
///
/// Literales con formato o de bytes no califican.
pub(super) fn plain_text(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Str(pieces) if pieces.iter().all(is_plain) => {
            Some(pieces.iter().map(|piece| piece.body.as_str()).collect())
        }

        _ => None,
    }
}

fn compare(
    cx: &mut Context,
    left: &Located<Expr>,
    pairs: &[(CmpOp, Located<Expr>)],
    location: &Location,
) -> String {
    let (op, right) = match pairs {
        [first, rest @ ..] => {
            if !rest.is_empty() {
                cx.warn(CodegenWarning::ChainedComparison, location);
            }

            first
        }

        [] => return self::expr(cx, left),
    };

    let symbol = match op {
        CmpOp::Equal => "==",
        CmpOp::NotEqual => "!=",
        CmpOp::Less => "<",
        CmpOp::LessOrEqual => "<=",
        CmpOp::Greater => ">",
        CmpOp::GreaterOrEqual => ">=",
        CmpOp::In | CmpOp::NotIn => return cx.unsupported("membership test", location),
        CmpOp::Is | CmpOp::IsNot => return cx.unsupported("identity test", location),
    };

    let left = self::expr(cx, left);
    let right = self::expr(cx, right);
    format!("({} {} {})", left, symbol, right)
}

fn call(cx: &mut Context, callee: &Located<Expr>, args: &[Argument]) -> String {
    match callee.val() {
        Expr::Name(name) if name.as_ref() == "print" => print(cx, args),
        _ => {
            let callee = self::expr(cx, callee);
            let args = arguments(cx, args);
            format!("{}({})", callee, args.join(", "))
        }
    }
}

/// `print()` se traduce a `printf()` con un formato heurístico.
///
/// Si hay más de un argumento y el primero es texto, este se convierte
/// en el formato con un `%d` por cada argumento restante. De lo
/// contrario, un único `%d` precede a todos los argumentos.
fn print(cx: &mut Context, args: &[Argument]) -> String {
    if args.is_empty() {
        return String::from("printf(\"\\n\")");
    }

    let text = match args {
        [Argument::Positional(first), _, ..] => match first.val() {
            Expr::Str(pieces) => escape(pieces).ok(),
            _ => None,
        },

        _ => None,
    };

    let (format, values) = match text {
        Some(text) => {
            let mut format = text.replace('%', "%%");
            format.push_str(&" %d".repeat(args.len() - 1));

            (format, &args[1..])
        }

        None => (String::from("%d"), args),
    };

    let mut rendered = vec![format!("\"{}\\n\"", format)];
    rendered.extend(arguments(cx, values));

    format!("printf({})", rendered.join(", "))
}

fn arguments(cx: &mut Context, args: &[Argument]) -> Vec<String> {
    args.iter()
        .map(|arg| match arg {
            Argument::Positional(value) => expr(cx, value),
            Argument::Keyword { name, .. } => cx.unsupported("keyword argument", name.location()),
            Argument::Unpack(value) => cx.unsupported("starred argument", value.location()),
            Argument::UnpackKeywords(value) => {
                cx.unsupported("keyword argument unpacking", value.location())
            }
        })
        .collect()
}

/// Elimina separadores `_` y traduce el prefijo octal `0o` al de C.
fn integer(text: &str) -> String {
    let digits = text.replace('_', "");
    match digits.get(..2) {
        Some("0o" | "0O") => format!("0{}", &digits[2..]),
        _ => digits,
    }
}

/// Literal de texto C, concatenando literales adyacentes.
fn string(pieces: &[StrLiteral]) -> Result<String, &'static str> {
    Ok(format!("\"{}\"", escape(pieces)?))
}

/// Contenido de un literal de texto C, sin comillas.
fn escape(pieces: &[StrLiteral]) -> Result<String, &'static str> {
    let mut output = String::new();

    for piece in pieces {
        if piece.prefix.contains(StrPrefix::FORMAT) {
            return Err("f-string");
        } else if piece.prefix.contains(StrPrefix::BYTES) {
            return Err("bytes literal");
        }

        let raw = piece.prefix.contains(StrPrefix::RAW);
        let mut chars = piece.body.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' if raw => output.push_str("\\\\"),
                '\\' => match chars.next() {
                    // Continuación de línea dentro del literal
                    Some('\n') => (),
                    Some(escaped) => {
                        output.push('\\');
                        output.push(escaped);
                    }

                    None => output.push_str("\\\\"),
                },

                '"' => output.push_str("\\\""),
                '\n' => output.push_str("\\n"),
                '\t' => output.push_str("\\t"),
                c => output.push(c),
            }
        }
    }

    Ok(output)
}

fn is_plain(piece: &StrLiteral) -> bool {
    !piece.prefix.intersects(StrPrefix::FORMAT | StrPrefix::BYTES)
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::None => "`None` literal",
        Expr::Ellipsis => "ellipsis literal",
        Expr::Imaginary(_) => "imaginary literal",
        Expr::Unary(..) => "unary operator",
        Expr::Bool(..) => "boolean operator",
        Expr::Attribute(..) => "attribute access",
        Expr::Subscript(..) => "subscript",
        Expr::Slice { .. } => "slice",
        Expr::Tuple(_) => "tuple",
        Expr::List(_) => "list display",
        Expr::Set(_) => "set display",
        Expr::Dict(_) => "dict display",
        Expr::Comprehension { .. } => "comprehension",
        Expr::Conditional { .. } => "conditional expression",
        Expr::Lambda { .. } => "lambda",
        Expr::Named(..) => "assignment expression",
        Expr::Starred(_) => "starred expression",
        Expr::Await(_) => "await expression",
        Expr::Yield(_) | Expr::YieldFrom(_) => "yield expression",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(prefix: StrPrefix, body: &str) -> StrLiteral {
        StrLiteral {
            prefix,
            quote: '"',
            triple: false,
            body: body.to_owned(),
        }
    }

    #[test]
    fn integers() {
        assert_eq!(integer("1_000"), "1000");
        assert_eq!(integer("0o17"), "017");
        assert_eq!(integer("0x_FF"), "0xFF");
        assert_eq!(integer("7"), "7");
    }

    #[test]
    fn strings_become_c_literals() {
        let plain = literal(StrPrefix::empty(), "say \\\"hi\\\"\\n");
        assert_eq!(string(&[plain]).unwrap(), "\"say \\\"hi\\\"\\n\"");

        let quoted = literal(StrPrefix::empty(), "it's \"x\"\nnext");
        assert_eq!(string(&[quoted]).unwrap(), "\"it's \\\"x\\\"\\nnext\"");

        let raw = literal(StrPrefix::RAW, "C:\\dir");
        assert_eq!(string(&[raw]).unwrap(), "\"C:\\\\dir\"");

        let pieces = [
            literal(StrPrefix::empty(), "ab"),
            literal(StrPrefix::UNICODE, "cd"),
        ];
        assert_eq!(string(&pieces).unwrap(), "\"abcd\"");

        assert_eq!(string(&[literal(StrPrefix::FORMAT, "{x}")]), Err("f-string"));
        assert_eq!(string(&[literal(StrPrefix::BYTES, "x")]), Err("bytes literal"));
    }

    #[test]
    fn plain_text_joins_bodies() {
        let expr = Expr::Str(vec![
            literal(StrPrefix::empty(), "a\\n"),
            literal(StrPrefix::RAW, "b"),
        ]);

        assert_eq!(plain_text(&expr).as_deref(), Some("a\\nb"));
        assert_eq!(plain_text(&Expr::True), None);
    }
}
