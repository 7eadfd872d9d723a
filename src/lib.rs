//! Compilador de un subconjunto anotado de Python a C.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente.
//! Este archivo se somete primero a análisis léxico en [`lex`], de
//! lo cual se obtiene un flujo de tokens que incluye la estructura de
//! indentación. El flujo de tokens se dispone en un AST por medio de
//! análisis sintáctico en [`parse`]. Cualquier error en estas fases
//! es fatal.
//!
//! En paralelo, [`directive`] examina el texto original en busca de
//! información que el AST no conserva: constantes manifiestas y
//! modificadores de almacenamiento escritos en comentarios.
//!
//! # Back end
//! La generación de código en [`codegen`] recorre el AST y emite C
//! para alguno de los perfiles de [`profile`]. La traducción es de
//! mejor esfuerzo: lo que no tiene traducción se sustituye por un
//! marcador y una advertencia. Opcionalmente, el código resultante se
//! compila con la toolchain del perfil en [`link`]. El código generado
//! depende de un encabezado de soporte, ver [`runtime`].

use bitflags::bitflags;
use log::debug;

#[macro_use]
mod macros;

pub mod codegen;
pub mod directive;
pub mod error;
pub mod lex;
pub mod link;
pub mod parse;
pub mod profile;
pub mod source;

pub use codegen::{CodegenWarning, Generated};
pub use error::Diagnostics;
pub use profile::Profile;

/// Encabezado de soporte que incluye todo programa generado.
pub mod runtime {
    /// Nombre con el que el código generado incluye al encabezado.
    pub const HEADER_NAME: &str = "gc_runtime.h";

    /// Contenido del encabezado.
    pub const HEADER: &str = include_str!("../runtime/gc_runtime.h");
}

bitflags! {
    /// Opciones de compilación.
    pub struct CompileOptions: u32 {
        /// Rechazar programas cuya traducción produjo advertencias.
        const STRICT = 0x01;
    }
}

/// Compila un programa completo.
///
/// `name` identifica al origen en diagnósticos. Con
/// [`CompileOptions::STRICT`], las advertencias de generación se
/// reportan como errores y no se entrega código.
pub fn compile(
    source: &str,
    name: &str,
    profile: Profile,
    options: CompileOptions,
) -> Result<Generated, Diagnostics> {
    let (start, stream) = source::consume(source.as_bytes(), name);

    let tokens = lex::Lexer::new(start.clone(), stream).try_exhaustive()?;
    debug!("{}: {} tokens", name, tokens.len());

    let ast = parse::parse(tokens.iter(), start)?;
    debug!("{}: {} top-level statements", name, ast.statements().len());

    let unit = codegen::CompilationUnit::new(ast, source);
    let generated = codegen::emit(&unit, profile);

    if options.contains(CompileOptions::STRICT) && !generated.warnings().is_empty() {
        return Err(generated.into_warnings().into());
    }

    Ok(generated)
}
