//! Directivas en comentarios.
//!
//! El árbol sintáctico descarta comentarios, por lo cual la información
//! que el programa fuente comunica por medio de ellos se recupera aquí
//! directamente del texto original, línea por línea. Existen dos tipos
//! de directiva:
//!
//! - Constantes manifiestas: `NAME = value  # @define [TYPE]`, las
//!   cuales se emiten como macros de preprocesador.
//! - Modificadores de almacenamiento: un comentario inmediatamente
//!   anterior a una declaración global que contiene cualquier
//!   combinación de `const`, `public` y `volatile`.
//!
//! Ninguna de estas operaciones falla. Una línea que no cumple con la
//! forma esperada simplemente no es una directiva.

use bitflags::bitflags;
use log::debug;
use unicase::UniCase;

/// Etiqueta que marca una constante manifiesta.
const DEFINE_TAG: &str = "@define";

/// Una constante manifiesta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestConstant {
    name: String,
    value: String,
    ty: Option<String>,
    line: u32,
}

impl ManifestConstant {
    /// Nombre de la constante, siempre en mayúsculas.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Texto del valor tal como aparece en el código fuente.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Tipo explícito de destino, si se indicó.
    pub fn ty(&self) -> Option<&str> {
        self.ty.as_deref()
    }

    /// Número de línea de la definición, desde 1.
    pub fn line(&self) -> u32 {
        self.line
    }
}

bitflags! {
    /// Modificadores de almacenamiento de una declaración global.
    #[derive(Default)]
    pub struct StorageModifiers: u8 {
        /// La variable no puede modificarse.
        const CONST = 0x01;

        /// Visible fuera de la unidad de traducción (sin `static`).
        const PUBLIC = 0x02;

        /// Puede cambiar fuera del flujo del programa.
        const VOLATILE = 0x04;
    }
}

impl StorageModifiers {
    /// Interpreta una palabra de comentario como modificador.
    fn keyword(word: &str) -> Option<Self> {
        let word = UniCase::new(word.strip_prefix('@').unwrap_or(word));

        [
            ("const", StorageModifiers::CONST),
            ("public", StorageModifiers::PUBLIC),
            ("volatile", StorageModifiers::VOLATILE),
        ]
        .iter()
        .find(|(keyword, _)| UniCase::new(*keyword) == word)
        .map(|(_, modifier)| *modifier)
    }
}

/// Extrae las constantes manifiestas de un programa, en orden de aparición.
pub fn extract_manifest_constants(source: &str) -> Vec<ManifestConstant> {
    source
        .lines()
        .zip(1..)
        .filter_map(|(line, number)| manifest_constant(line, number))
        .collect()
}

/// Determina los modificadores declarados en la línea anterior a `line`.
///
/// Solo se inspecciona la línea inmediatamente anterior, la cual debe
/// ser un comentario. Cualquier otra situación resulta en un conjunto
/// vacío de modificadores.
pub fn extract_storage_modifiers(source: &str, line: u32) -> StorageModifiers {
    let previous = match line.checked_sub(2) {
        Some(index) => source.lines().nth(index as usize),
        None => None,
    };

    let comment = match previous.map(str::trim_start) {
        Some(comment) if comment.starts_with('#') => &comment[1..],
        _ => return StorageModifiers::empty(),
    };

    comment
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '@'))
        .filter_map(StorageModifiers::keyword)
        .fold(StorageModifiers::empty(), |modifiers, modifier| {
            modifiers | modifier
        })
}

/// Reconstruye texto fuente normalizado a partir de constantes manifiestas.
///
/// Extraer constantes del texto resultante produce las mismas constantes,
/// salvo por los números de línea.
pub fn render_manifest_directives(constants: &[ManifestConstant]) -> String {
    let mut output = String::new();
    for constant in constants {
        let line = match &constant.ty {
            Some(ty) => format!(
                "{} = {}  # {} {}\n",
                constant.name, constant.value, DEFINE_TAG, ty
            ),
            None => format!("{} = {}  # {}\n", constant.name, constant.value, DEFINE_TAG),
        };

        output.push_str(&line);
    }

    output
}

fn manifest_constant(line: &str, number: u32) -> Option<ManifestConstant> {
    let (code, comment) = split_comment(line)?;

    let mut words = comment.split_whitespace();
    if UniCase::new(words.next()?) != UniCase::new(DEFINE_TAG) {
        return None;
    }

    let reject = |reason: &str| {
        debug!("Line {} is not a manifest constant: {}", number, reason);
        None
    };

    let ty = words.next();
    if words.next().is_some() {
        return reject("trailing text after type");
    } else if let Some(false) = ty.map(is_identifier) {
        return reject("malformed type");
    }

    let (target, value) = match code.split_once('=') {
        Some(parts) => parts,
        None => return reject("not an assignment"),
    };

    // `NAME: int = value` también califica, la anotación se ignora
    let name = target.split(':').next().unwrap_or(target);
    if name.starts_with(char::is_whitespace) {
        return reject("not at top level");
    }

    let name = name.trim_end();
    let value = value.trim();

    if !is_manifest_name(name) {
        return reject("name is not uppercase");
    } else if value.is_empty() || value.starts_with('=') {
        return reject("missing value");
    }

    Some(ManifestConstant {
        name: name.to_owned(),
        value: value.to_owned(),
        ty: ty.map(String::from),
        line: number,
    })
}

/// Separa una línea en código y comentario, ignorando `#` dentro de
/// literales de texto.
fn split_comment(line: &str) -> Option<(&str, &str)> {
    let mut quote = None;
    let mut escaped = false;

    for (index, c) in line.char_indices() {
        match (quote, c) {
            (Some(_), _) if escaped => escaped = false,
            (Some(_), '\\') => escaped = true,
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => (),
            (None, '\'' | '"') => quote = Some(c),
            (None, '#') => return Some((&line[..index], &line[index + 1..])),
            (None, _) => (),
        }
    }

    None
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }

        _ => false,
    }
}

/// `[A-Z_][A-Z0-9_]*`
fn is_manifest_name(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {
            chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        }

        _ => false,
    }
}
