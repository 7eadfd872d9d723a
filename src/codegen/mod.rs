//! Generación de código C.
//!
//! El generador recorre el árbol sintáctico en orden de aparición y
//! emite texto C línea por línea. Toda información de estado de una
//! compilación vive en un [`Context`] que se construye por invocación,
//! por lo cual este módulo es reentrante.
//!
//! La traducción es de mejor esfuerzo: un constructo que no tiene
//! traducción se sustituye por un marcador inerte
//! (`/* unsupported: ... */`) y se registra una advertencia con su
//! ubicación. Corresponde al llamador decidir si las advertencias
//! invalidan el resultado.

use std::collections::HashSet;

use log::{debug, warn};
use thiserror::Error;

use crate::{
    directive::{self, ManifestConstant},
    lex::Identifier,
    parse::{Argument, Ast, Expr, Function, Parameter, ParameterKind, Statement},
    profile::Profile,
    runtime,
    source::{Located, Location},
};

mod expr;
mod stmt;
pub mod types;

pub use types::{infer_type_from_literal, map_declared_type};

/// Línea que marca el inicio de código C dentro de un docstring.
const EMBEDDED_C_SENTINEL: &str = "__C_CODE__";

/// Encabezados estándar que requiere todo programa generado.
const INCLUDES: &[&str] = &["<stdbool.h>", "<stdint.h>", "<stdio.h>"];

/// Una advertencia de generación de código.
///
/// Ninguna de estas condiciones detiene la generación.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CodegenWarning {
    #[error("Unsupported {0}, emitted a placeholder")]
    Unsupported(String),

    #[error("`{0}` is first assigned from its own value, assuming an outer declaration")]
    SelfReferential(Identifier),

    #[error("`{0}` is a manifest constant, this assignment was dropped")]
    ShadowedConstant(Identifier),

    #[error("Only the first comparison of a chain is translated")]
    ChainedComparison,

    #[error("Unknown decorator `{0}` ignored")]
    UnknownDecorator(String),

    #[error("`@inline_c` expects a single plain string literal")]
    BadInlineC,
}

/// Unidad de compilación: árbol sintáctico, texto original y
/// constantes manifiestas extraídas del mismo.
pub struct CompilationUnit<'a> {
    ast: Ast,
    source: &'a str,
    constants: Vec<ManifestConstant>,
}

impl<'a> CompilationUnit<'a> {
    pub fn new(ast: Ast, source: &'a str) -> Self {
        let constants = directive::extract_manifest_constants(source);
        debug!("Found {} manifest constants", constants.len());

        CompilationUnit {
            ast,
            source,
            constants,
        }
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    pub fn constants(&self) -> &[ManifestConstant] {
        &self.constants
    }
}

/// Resultado de la generación de código.
#[derive(Debug)]
pub struct Generated {
    code: String,
    warnings: Vec<Located<CodegenWarning>>,
}

impl Generated {
    /// Texto C generado.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Advertencias acumuladas, en orden de emisión.
    pub fn warnings(&self) -> &[Located<CodegenWarning>] {
        &self.warnings
    }

    pub fn into_code(self) -> String {
        self.code
    }

    pub fn into_warnings(self) -> Vec<Located<CodegenWarning>> {
        self.warnings
    }
}

/// Traduce una unidad de compilación completa.
pub fn emit(unit: &CompilationUnit, profile: Profile) -> Generated {
    let mut cx = Context::new(unit, profile);
    preamble(&mut cx);

    for statement in unit.ast.statements() {
        match statement.val() {
            Statement::Function(function) => self::function(&mut cx, function),
            _ => stmt::statement(&mut cx, statement),
        }
    }

    debug!(
        "Generated {} lines with {} warnings for profile {}",
        cx.lines.len(),
        cx.warnings.len(),
        profile
    );

    cx.finish()
}

/// Estado de generación de una compilación.
pub struct Context<'a> {
    unit: &'a CompilationUnit<'a>,
    profile: Profile,
    depth: usize,
    lines: Vec<String>,
    scope: Scope,
    declared: HashSet<Identifier>,
    warnings: Vec<Located<CodegenWarning>>,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Scope {
    Module,
    Function { arena: bool },
}

impl<'a> Context<'a> {
    fn new(unit: &'a CompilationUnit<'a>, profile: Profile) -> Self {
        Context {
            unit,
            profile,
            depth: 0,
            lines: Vec::new(),
            scope: Scope::Module,
            declared: HashSet::new(),
            warnings: Vec::new(),
        }
    }

    /// Agrega una línea con la indentación actual. Ver `emit!()`.
    fn push_line(&mut self, line: String) {
        if line.is_empty() {
            self.lines.push(line);
        } else {
            self.lines.push(format!("{:width$}{}", "", line, width = 4 * self.depth));
        }
    }

    /// Agrega una línea sin indentación, como lo requieren las
    /// directivas de preprocesador.
    fn push_unindented(&mut self, line: &str) {
        self.lines.push(line.to_owned());
    }

    /// Emite líneas de un bloque anidado.
    fn nested<F: FnOnce(&mut Self)>(&mut self, emit: F) {
        self.depth += 1;
        emit(self);
        self.depth -= 1;
    }

    fn in_function(&self) -> bool {
        matches!(self.scope, Scope::Function { .. })
    }

    fn in_arena(&self) -> bool {
        self.scope == Scope::Function { arena: true }
    }

    fn is_declared(&self, name: &Identifier) -> bool {
        self.declared.contains(name)
    }

    fn declare(&mut self, name: &Identifier) {
        self.declared.insert(name.clone());
    }

    /// Registra una advertencia de generación.
    fn warn(&mut self, warning: CodegenWarning, location: &Location) {
        warn!("{}: {}", location, warning);
        self.warnings.push(Located::at(warning, location.clone()));
    }

    /// Registra un constructo no soportado y construye su marcador.
    fn unsupported<S: Into<String>>(&mut self, construct: S, location: &Location) -> String {
        let construct = construct.into();
        let marker = format!("/* unsupported: {} */", construct);

        self.warn(CodegenWarning::Unsupported(construct), location);
        marker
    }

    fn finish(self) -> Generated {
        let mut code = self.lines.join("\n");
        if !code.ends_with('\n') {
            code.push('\n');
        }

        Generated {
            code,
            warnings: self.warnings,
        }
    }
}

fn preamble(cx: &mut Context) {
    for include in INCLUDES {
        emit!(cx, "#include {}", include);
    }

    let guard = cx.profile.guard();
    emit!(cx);
    emit!(cx, "#define {}", guard);
    emit!(cx);

    let unit = cx.unit;
    if !unit.constants().is_empty() {
        emit!(cx, "// Manifest constants");
        for constant in unit.constants() {
            emit!(cx, "{}", define(constant));
        }

        emit!(cx);
    }

    emit!(cx, "#include \"{}\"", runtime::HEADER_NAME);
    emit!(cx);
}

/// Macro de preprocesador para una constante manifiesta.
fn define(constant: &ManifestConstant) -> String {
    let value = match constant.value() {
        "True" => "1",
        "False" => "0",
        value => value,
    };

    match constant.ty() {
        Some(ty) => format!("#define {} (({}){})", constant.name(), ty, value),
        None => format!("#define {} {}", constant.name(), value),
    }
}

/// Indicaciones que un programa comunica por medio de decoradores.
#[derive(Default)]
struct Hints {
    arena: bool,
    inline: Vec<String>,
}

fn function(cx: &mut Context, function: &Function) {
    let hints = hints(cx, function);
    for code in &hints.inline {
        inline_code(cx, code);
    }

    let name = function.name().val();
    let entry = name.as_ref() == "main";

    let signature = if entry {
        cx.profile.entry_signature().to_owned()
    } else {
        let returns = map_declared_type(function.returns().map(Located::val));
        let parameters = parameters(cx, function.parameters());
        format!("{} {}({})", returns, name, parameters)
    };

    emit!(cx, "{} {{", signature);

    // Un `return` escrito a mano en C saltaría el cierre del ámbito
    let escape = embedded_code(function.body());
    let arena = hints.arena && escape.is_none();
    if hints.arena && !arena {
        debug!("`{}`: arena scope skipped for embedded C", name);
    }

    cx.scope = Scope::Function { arena };
    cx.declared = function
        .parameters()
        .iter()
        .map(|parameter| parameter.name().val().clone())
        .collect();

    cx.nested(|cx| {
        if arena {
            emit!(cx, "GC_SCOPE_START();");
        }

        match &escape {
            Some(code) => embedded(cx, code),
            None => stmt::block(cx, function.body()),
        }

        let returns = matches!(
            function.body().last().map(Located::val),
            Some(Statement::Return(_))
        );

        if arena && !returns {
            emit!(cx, "GC_SCOPE_END();");
        }

        if let Some(epilogue) = cx.profile.entry_epilogue().filter(|_| entry) {
            emit!(cx, "{}", epilogue);
        }
    });

    cx.scope = Scope::Module;
    cx.declared.clear();

    emit!(cx, "}}");
    emit!(cx);
}

fn parameters(cx: &mut Context, parameters: &[Parameter]) -> String {
    if parameters.is_empty() {
        return String::from("void");
    }

    let parameters: Vec<_> = parameters
        .iter()
        .map(|parameter| match parameter.kind() {
            ParameterKind::Positional => {
                let ty = match parameter.annotation() {
                    Some(annotation) => map_declared_type(Some(annotation.val())),
                    None => String::from("int32_t"),
                };

                format!("{} {}", ty, parameter.name().val())
            }

            ParameterKind::Variadic | ParameterKind::KeywordVariadic => {
                cx.unsupported("variadic parameter", parameter.name().location())
            }
        })
        .collect();

    parameters.join(", ")
}

fn hints(cx: &mut Context, function: &Function) -> Hints {
    let mut hints = Hints::default();

    for decorator in function.decorators() {
        let (callee, args) = match decorator.val() {
            Expr::Call { callee, args } => (&**callee, Some(args.as_slice())),
            _ => (decorator, None),
        };

        let name = match callee.val() {
            Expr::Name(name) => Some(name.as_ref()),
            Expr::Attribute(_, attribute) => Some(attribute.val().as_ref()),
            _ => None,
        };

        let location = decorator.location();
        match (name, args) {
            (Some("arena"), None | Some([])) => hints.arena = true,

            // La asignación en pila ya es el comportamiento por omisión
            (Some("static_alloc"), None | Some([])) => (),

            (Some("inline_c"), Some([Argument::Positional(code)])) => {
                match expr::plain_text(code.val()) {
                    Some(code) => hints.inline.push(code),
                    None => cx.warn(CodegenWarning::BadInlineC, location),
                }
            }

            (Some("inline_c"), _) => cx.warn(CodegenWarning::BadInlineC, location),

            (name, _) => {
                let name = name.unwrap_or("<expression>").to_owned();
                cx.warn(CodegenWarning::UnknownDecorator(name), location);
            }
        }
    }

    hints
}

/// Código C de un docstring marcado con el centinela, si lo hay.
fn embedded_code(body: &[Located<Statement>]) -> Option<String> {
    let text = match body.first().map(Located::val) {
        Some(Statement::Expr(docstring)) => expr::plain_text(docstring.val())?,
        _ => return None,
    };

    text.contains(EMBEDDED_C_SENTINEL).then(|| text)
}

/// Emite las líneas posteriores al centinela, recortadas.
fn embedded(cx: &mut Context, code: &str) {
    let lines = code
        .lines()
        .skip_while(|line| !line.contains(EMBEDDED_C_SENTINEL))
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty());

    for line in lines {
        if line.starts_with('#') {
            cx.push_unindented(line);
        } else {
            emit!(cx, "{}", line);
        }
    }
}

/// Emite código de `@inline_c`, preservando su indentación relativa.
fn inline_code(cx: &mut Context, code: &str) {
    let is_margin = |c: char| c == ' ' || c == '\t';
    let margin = code
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches(is_margin).len())
        .min()
        .unwrap_or(0);

    for line in code.lines().filter(|line| !line.trim().is_empty()) {
        let line = line.get(margin..).unwrap_or(line).trim_end();
        if line.trim_start().starts_with('#') {
            cx.push_unindented(line.trim_start());
        } else {
            emit!(cx, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source};

    fn generate(text: &str, profile: Profile) -> Generated {
        let (start, stream) = source::consume(text.as_bytes(), "test.py");
        let tokens = Lexer::new(start.clone(), stream).try_exhaustive().unwrap();
        let ast = parse::parse(tokens.iter(), start).unwrap();

        emit(&CompilationUnit::new(ast, text), profile)
    }

    #[test]
    fn preamble_layout() {
        let generated = generate("X = 1  # @define\nFLAG = True  # @define bool\n", Profile::Mcu);
        let expected = "\
#include <stdbool.h>
#include <stdint.h>
#include <stdio.h>

#define TARGET_MCU

// Manifest constants
#define X 1
#define FLAG ((bool)1)

#include \"gc_runtime.h\"
";

        assert_eq!(generated.code(), expected);
        assert!(generated.warnings().is_empty());
    }

    #[test]
    fn preamble_without_constants() {
        let generated = generate("", Profile::Pc);
        assert!(generated
            .code()
            .ends_with("#define TARGET_PC\n\n#include \"gc_runtime.h\"\n"));
    }

    #[test]
    fn entry_point_per_profile() {
        let source = "def main():\n    x = 1\n";

        let pc = generate(source, Profile::Pc);
        assert!(pc
            .code()
            .ends_with("int main(void) {\n    int32_t x = 1;\n    return 0;\n}\n"));

        let mcu = generate(source, Profile::Mcu);
        assert!(mcu.code().ends_with("void main(void) {\n    int32_t x = 1;\n}\n"));
    }

    #[test]
    fn signatures_map_annotations() {
        let generated = generate(
            "def f(a: float, b, c: Pin) -> bool:\n    return a\n\ndef g() -> None:\n    pass\n",
            Profile::Pc,
        );

        let code = generated.code();
        assert!(code.contains("bool f(float a, int32_t b, Pin c) {\n    return a;\n}\n\n"));
        assert!(code.contains("void g(void) {\n}\n"));
    }

    #[test]
    fn embedded_code_replaces_body() {
        let source = "\
def delay(ms: int) -> None:
    \"\"\"Delay.

    __C_CODE__
    #ifdef TARGET_MCU
        HAL_Delay(ms);
    #endif
    \"\"\"
    import time
    time.sleep(ms / 1000.0)
";

        let generated = generate(source, Profile::Mcu);
        assert!(generated.code().ends_with(
            "void delay(int32_t ms) {\n#ifdef TARGET_MCU\n    HAL_Delay(ms);\n#endif\n}\n"
        ));
        assert!(generated.warnings().is_empty());
    }

    #[test]
    fn arena_brackets_every_exit() {
        let source = "\
@arena
def f(x: int) -> int:
    if x > 0:
        return x
    return 0
";

        let code = generate(source, Profile::Pc).into_code();
        let expected = "\
int32_t f(int32_t x) {
    GC_SCOPE_START();
    if ((x > 0)) {
        GC_SCOPE_END();
        return x;
    }
    GC_SCOPE_END();
    return 0;
}
";

        assert!(code.ends_with(expected), "{}", code);

        let code = generate("@arena\ndef g():\n    x = 1\n", Profile::Pc).into_code();
        assert!(code.ends_with(
            "void g(void) {\n    GC_SCOPE_START();\n    int32_t x = 1;\n    GC_SCOPE_END();\n}\n"
        ));
    }

    #[test]
    fn arena_is_skipped_for_embedded_code() {
        let source = "\
@arena
def f() -> int:
    \"\"\"__C_CODE__
    return 1;
    \"\"\"
";

        let generated = generate(source, Profile::Pc);
        assert!(generated
            .code()
            .ends_with("int32_t f(void) {\n    return 1;\n}\n"));
        assert!(!generated.code().contains("GC_SCOPE"));
        assert!(generated.warnings().is_empty());
    }

    #[test]
    fn inline_c_precedes_function() {
        let source = "\
@static_alloc
@inline_c(\"\"\"
    static inline int twice(int x) {
        return 2 * x;
    }
\"\"\")
def f() -> None:
    pass
";

        let generated = generate(source, Profile::Pc);
        assert!(generated.code().ends_with(
            "static inline int twice(int x) {\n    return 2 * x;\n}\nvoid f(void) {\n}\n"
        ));
        assert!(generated.warnings().is_empty());
    }

    #[test]
    fn unknown_decorators_warn() {
        let generated = generate("@cached\n@inline_c(1)\ndef f():\n    pass\n", Profile::Pc);
        let warnings: Vec<_> = generated
            .warnings()
            .iter()
            .map(|warning| warning.val().to_string())
            .collect();

        assert_eq!(
            warnings,
            vec![
                "Unknown decorator `cached` ignored",
                "`@inline_c` expects a single plain string literal"
            ]
        );
    }

    #[test]
    fn variadic_parameters_are_placeholders() {
        let generated = generate("def f(a, *rest):\n    pass\n", Profile::Pc);

        assert!(generated
            .code()
            .contains("void f(int32_t a, /* unsupported: variadic parameter */) {"));
        assert_eq!(generated.warnings().len(), 1);
    }
}
