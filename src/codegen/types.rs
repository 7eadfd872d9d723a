//! Correspondencia de tipos.
//!
//! Los tipos C de variables, parámetros y valores de retorno provienen
//! de anotaciones cuando existen, o de la forma literal del valor
//! inicial cuando no.

use crate::parse::Expr;

/// Traduce una anotación de tipo a un tipo C.
///
/// Nombres desconocidos se conservan tal cual, lo cual permite usar
/// tipos C directamente (`uint8_t`). Anotaciones que no son nombres
/// (genéricos, rutas con atributos) no tienen correspondencia.
pub fn map_declared_type(annotation: Option<&Expr>) -> String {
    let name = match annotation {
        None | Some(Expr::None) => return String::from("void"),
        Some(Expr::Name(name)) => name.as_ref(),
        Some(_) => return String::from("void"),
    };

    let ty = match name {
        "int" => "int32_t",
        "float" => "float",
        "bool" => "bool",
        "str" => "const char*",
        "None" => "void",
        other => other,
    };

    ty.to_owned()
}

/// Infiere un tipo C a partir de la forma sintáctica de un valor.
pub fn infer_type_from_literal(value: &Expr) -> &'static str {
    match value {
        Expr::True | Expr::False => "bool",
        Expr::Integer(_) => "int32_t",
        Expr::Float(_) => "float",
        Expr::Str(_) => "const char*",
        _ => "int32_t",
    }
}
