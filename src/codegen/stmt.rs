//! Traducción de sentencias.

use log::debug;

use super::{
    expr::{self, arithmetic},
    types::{infer_type_from_literal, map_declared_type},
    CodegenWarning, Context,
};

use crate::{
    directive::{self, StorageModifiers},
    lex::Identifier,
    parse::{Argument, BinOp, CmpOp, Expr, Statement},
    source::{Located, Location},
};

pub(super) fn block(cx: &mut Context, statements: &[Located<Statement>]) {
    for statement in statements {
        self::statement(cx, statement);
    }
}

pub(super) fn statement(cx: &mut Context, statement: &Located<Statement>) {
    let location = statement.location();

    match statement.val() {
        Statement::Pass | Statement::Import(_) | Statement::ImportFrom { .. } => (),

        // Los docstrings y demás texto suelto se descartan
        Statement::Expr(value) if matches!(value.val(), Expr::Str(_)) => (),

        Statement::Expr(value) => {
            let value = expr::expr(cx, value);
            emit!(cx, "{};", value);
        }

        Statement::Return(value) => ret(cx, value.as_ref()),

        Statement::If {
            condition,
            body,
            orelse,
        } => {
            if is_entry_guard(condition.val()) {
                debug!("{}: dropping entry guard", location);
            } else {
                conditional(cx, condition, body, orelse);
            }
        }

        Statement::While {
            condition,
            body,
            orelse,
        } => {
            let condition = expr::expr(cx, condition);
            emit!(cx, "while ({}) {{", condition);
            cx.nested(|cx| block(cx, body));
            emit!(cx, "}}");

            if !orelse.is_empty() {
                placeholder(cx, "while-else clause", location);
            }
        }

        Statement::Assign { targets, value } => match targets.as_slice() {
            [target] => match target.val() {
                Expr::Name(name) => assign(cx, name, value, location),
                other => placeholder(cx, target_construct(other), location),
            },

            _ => placeholder(cx, "multiple assignment targets", location),
        },

        Statement::AnnAssign {
            target,
            annotation,
            value,
        } => match target.val() {
            Expr::Name(name) => {
                let ty = map_declared_type(Some(annotation.val()));
                declare(cx, name, &ty, value.as_ref(), location);
            }

            other => placeholder(cx, target_construct(other), location),
        },

        Statement::AugAssign { target, op, value } => {
            match (target.val(), augmented(*op)) {
                (Expr::Name(name), Some(symbol)) => {
                    let value = expr::expr(cx, value);
                    emit!(cx, "{} {}= {};", name, symbol, value);
                }

                _ => placeholder(cx, "augmented assignment", location),
            }
        }

        other => placeholder(cx, describe(other), location),
    }
}

fn placeholder(cx: &mut Context, construct: &str, location: &Location) {
    let marker = cx.unsupported(construct, location);
    emit!(cx, "{}", marker);
}

fn ret(cx: &mut Context, value: Option<&Located<Expr>>) {
    if cx.in_arena() {
        emit!(cx, "GC_SCOPE_END();");
    }

    match value {
        Some(value) if !matches!(value.val(), Expr::None) => {
            let value = expr::expr(cx, value);
            emit!(cx, "return {};", value);
        }

        _ => emit!(cx, "return;"),
    }
}

fn conditional(
    cx: &mut Context,
    condition: &Located<Expr>,
    body: &[Located<Statement>],
    orelse: &[Located<Statement>],
) {
    let condition = expr::expr(cx, condition);
    emit!(cx, "if ({}) {{", condition);
    cx.nested(|cx| block(cx, body));

    // `elif` es una condicional anidada en la rama `else`
    if !orelse.is_empty() {
        emit!(cx, "}} else {{");
        cx.nested(|cx| block(cx, orelse));
    }

    emit!(cx, "}}");
}

/// Asignación sin anotación a un nombre.
fn assign(cx: &mut Context, name: &Identifier, value: &Located<Expr>, location: &Location) {
    if !cx.in_function() {
        if promoted(cx, name, location) {
            return;
        }

        let ty = infer_type_from_literal(value.val());
        let value = expr::expr(cx, value);

        // Para punteros, `const` califica al puntero mismo
        if ty.ends_with('*') {
            emit!(cx, "static {} const {} = {};", ty, name, value);
        } else {
            emit!(cx, "static const {} {} = {};", ty, name, value);
        }
    } else if cx.is_declared(name) {
        let value = expr::expr(cx, value);
        emit!(cx, "{} = {};", name, value);
    } else if references(value.val(), name) {
        // Se asume una declaración externa que no se verifica
        cx.declare(name);
        cx.warn(CodegenWarning::SelfReferential(name.clone()), location);

        let value = expr::expr(cx, value);
        emit!(cx, "{} = {};", name, value);
    } else {
        cx.declare(name);

        let ty = infer_type_from_literal(value.val());
        let value = expr::expr(cx, value);
        emit!(cx, "{} {} = {};", ty, name, value);
    }
}

/// Determina si una asignación global corresponde a una constante
/// manifiesta, en cuyo caso no se emite.
///
/// Fuera de la línea de la directiva, la asignación chocaría con la
/// macro del preámbulo y se descarta con una advertencia.
fn promoted(cx: &mut Context, name: &Identifier, location: &Location) -> bool {
    let line = location.start().line();
    let unit = cx.unit;
    let mut lines = unit
        .constants()
        .iter()
        .filter(|constant| constant.name() == name.as_ref())
        .map(|constant| constant.line());

    match lines.next() {
        None => false,

        Some(first) if first == line || lines.any(|other| other == line) => {
            debug!("{}: `{}` is a manifest constant", location, name);
            true
        }

        Some(_) => {
            cx.warn(CodegenWarning::ShadowedConstant(name.clone()), location);
            true
        }
    }
}

/// Declaración con tipo explícito, con o sin valor inicial.
fn declare(
    cx: &mut Context,
    name: &Identifier,
    ty: &str,
    value: Option<&Located<Expr>>,
    location: &Location,
) {
    if !cx.in_function() && promoted(cx, name, location) {
        return;
    }

    let value = match value {
        Some(value) => Some(expr::expr(cx, value)),
        None => None,
    };

    if !cx.in_function() {
        let line = location.start().line();
        let modifiers = directive::extract_storage_modifiers(cx.unit.source, line);
        let qualifiers = qualifiers(modifiers);

        match value {
            Some(value) => emit!(cx, "{}{} {} = {};", qualifiers, ty, name, value),
            None => emit!(cx, "{}{} {};", qualifiers, ty, name),
        }
    } else if cx.is_declared(name) {
        if let Some(value) = value {
            emit!(cx, "{} = {};", name, value);
        }
    } else {
        cx.declare(name);

        match value {
            Some(value) => emit!(cx, "{} {} = {};", ty, name, value),
            None => emit!(cx, "{} {};", ty, name),
        }
    }
}

/// Calificadores C de una declaración global, en orden canónico:
/// clase de almacenamiento, `volatile`, `const`.
fn qualifiers(modifiers: StorageModifiers) -> String {
    let mut qualifiers = String::new();

    if !modifiers.contains(StorageModifiers::PUBLIC) {
        qualifiers.push_str("static ");
    }

    if modifiers.contains(StorageModifiers::VOLATILE) {
        qualifiers.push_str("volatile ");
    }

    if modifiers.contains(StorageModifiers::CONST) {
        qualifiers.push_str("const ");
    }

    qualifiers
}

/// Operador de asignación compuesta, sin el `=`.
fn augmented(op: BinOp) -> Option<&'static str> {
    arithmetic(op)
}

/// Reconoce `__name__ == "__main__"`, en ese orden exacto.
fn is_entry_guard(condition: &Expr) -> bool {
    let (left, pairs) = match condition {
        Expr::Compare(left, pairs) => (left, pairs),
        _ => return false,
    };

    let name = matches!(left.val(), Expr::Name(name) if name.as_ref() == "__name__");
    match pairs.as_slice() {
        [(CmpOp::Equal, right)] if name => {
            expr::plain_text(right.val()).as_deref() == Some("__main__")
        }

        _ => false,
    }
}

/// Determina si una expresión hace referencia a un nombre.
fn references(expr: &Expr, name: &Identifier) -> bool {
    fn any(items: &[Located<Expr>], name: &Identifier) -> bool {
        items.iter().any(|item| references(item.val(), name))
    }

    fn maybe(expr: &Option<Box<Located<Expr>>>, name: &Identifier) -> bool {
        expr.as_ref().map_or(false, |expr| references(expr.val(), name))
    }

    match expr {
        Expr::Name(other) => other == name,

        Expr::Unary(_, inner)
        | Expr::Starred(inner)
        | Expr::Await(inner)
        | Expr::YieldFrom(inner)
        | Expr::Attribute(inner, _)
        | Expr::Named(_, inner)
        | Expr::Lambda { body: inner, .. } => references(inner.val(), name),

        Expr::Binary(left, _, right) | Expr::Subscript(left, right) => {
            references(left.val(), name) || references(right.val(), name)
        }

        Expr::Bool(_, items) | Expr::Tuple(items) | Expr::List(items) | Expr::Set(items) => {
            any(items, name)
        }

        Expr::Compare(left, pairs) => {
            references(left.val(), name)
                || pairs.iter().any(|(_, right)| references(right.val(), name))
        }

        Expr::Call { callee, args } => {
            references(callee.val(), name)
                || args.iter().any(|arg| {
                    let value = match arg {
                        Argument::Positional(value)
                        | Argument::Keyword { value, .. }
                        | Argument::Unpack(value)
                        | Argument::UnpackKeywords(value) => value,
                    };

                    references(value.val(), name)
                })
        }

        Expr::Slice { lower, upper, step } => {
            maybe(lower, name) || maybe(upper, name) || maybe(step, name)
        }

        Expr::Dict(items) => items.iter().any(|(key, value)| {
            let key = key.as_ref().map_or(false, |key| references(key.val(), name));
            key || references(value.val(), name)
        }),

        Expr::Comprehension {
            element, clauses, ..
        } => {
            references(element.val(), name)
                || clauses.iter().any(|clause| {
                    references(clause.iterable.val(), name) || any(&clause.conditions, name)
                })
        }

        Expr::Conditional { test, body, orelse } => {
            references(test.val(), name)
                || references(body.val(), name)
                || references(orelse.val(), name)
        }

        Expr::Yield(value) => maybe(value, name),

        _ => false,
    }
}

fn target_construct(target: &Expr) -> &'static str {
    match target {
        Expr::Tuple(_) | Expr::List(_) => "tuple assignment",
        Expr::Subscript(..) => "subscript assignment",
        Expr::Attribute(..) => "attribute assignment",
        _ => "assignment target",
    }
}

fn describe(statement: &Statement) -> &'static str {
    match statement {
        Statement::Function(_) => "nested function definition",
        Statement::Class { .. } => "class definition",
        Statement::For { .. } => "for loop",
        Statement::With { .. } => "with statement",
        Statement::Try { .. } => "try statement",
        Statement::Break => "break statement",
        Statement::Continue => "continue statement",
        Statement::Global(_) => "global declaration",
        Statement::Nonlocal(_) => "nonlocal declaration",
        Statement::Del(_) => "del statement",
        Statement::Assert { .. } => "assert statement",
        Statement::Raise { .. } => "raise statement",
        _ => "statement",
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        codegen::{emit, CompilationUnit, Generated},
        lex::Lexer,
        parse,
        profile::Profile,
        source,
    };

    fn generate(text: &str) -> Generated {
        let (start, stream) = source::consume(text.as_bytes(), "test.py");
        let tokens = Lexer::new(start.clone(), stream).try_exhaustive().unwrap();
        let ast = parse::parse(tokens.iter(), start).unwrap();

        emit(&CompilationUnit::new(ast, text), Profile::Pc)
    }

    /// Cuerpo generado para `f`, sin la firma ni la llave de cierre.
    fn body(text: &str) -> (Vec<String>, Generated) {
        let generated = generate(text);
        let lines = generated
            .code()
            .lines()
            .skip_while(|line| !line.ends_with('{'))
            .skip(1)
            .take_while(|line| *line != "}")
            .map(String::from)
            .collect();

        (lines, generated)
    }

    #[test]
    fn locals_are_declared_once() {
        let (lines, generated) = body(
            "\
def f(n: int):
    count: int = 0
    total = 0
    total = total + n
    count = count + 1
    ratio: float
    ratio: float = 0.5
    flag = True
",
        );

        assert_eq!(
            lines,
            vec![
                "    int32_t count = 0;",
                "    int32_t total = 0;",
                "    total = (total + n);",
                "    count = (count + 1);",
                "    float ratio;",
                "    ratio = 0.5;",
                "    bool flag = true;",
            ]
        );

        assert!(generated.warnings().is_empty());
    }

    #[test]
    fn self_referential_assignment_warns() {
        let (lines, generated) = body("def f():\n    acc = acc + 1\n    acc = 2\n");

        assert_eq!(lines, vec!["    acc = (acc + 1);", "    acc = 2;"]);
        assert_eq!(
            generated.warnings()[0].val().to_string(),
            "`acc` is first assigned from its own value, assuming an outer declaration"
        );
    }

    #[test]
    fn parameters_count_as_declared() {
        let (lines, _) = body("def f(x):\n    x = 3\n");
        assert_eq!(lines, vec!["    x = 3;"]);
    }

    #[test]
    fn declared_names_reset_between_functions() {
        let generated = generate("def f():\n    x = 1\n\ndef g():\n    x = 2\n");

        assert!(generated.code().contains("    int32_t x = 1;"));
        assert!(generated.code().contains("    int32_t x = 2;"));
    }

    #[test]
    fn control_flow() {
        let (lines, generated) = body(
            "\
def f(x):
    if x == 1:
        return None
    elif x != 2:
        pass
    else:
        x += 4
    while x < 10:
        x //= 2
    return
",
        );

        assert_eq!(
            lines,
            vec![
                "    if ((x == 1)) {",
                "        return;",
                "    } else {",
                "        if ((x != 2)) {",
                "        } else {",
                "            x += 4;",
                "        }",
                "    }",
                "    while ((x < 10)) {",
                "        x /= 2;",
                "    }",
                "    return;",
            ]
        );

        assert!(generated.warnings().is_empty());
    }

    #[test]
    fn unsupported_statements_become_placeholders() {
        let (lines, generated) = body(
            "\
def f(items):
    for item in items:
        print(item)
    while True:
        break
    else:
        pass
    a, b = 1, 2
    items[0] = 1
    x = y = 0
    x **= 2
    assert x
",
        );

        assert_eq!(
            lines,
            vec![
                "    /* unsupported: for loop */",
                "    while (true) {",
                "        /* unsupported: break statement */",
                "    }",
                "    /* unsupported: while-else clause */",
                "    /* unsupported: tuple assignment */",
                "    /* unsupported: subscript assignment */",
                "    /* unsupported: multiple assignment targets */",
                "    /* unsupported: augmented assignment */",
                "    /* unsupported: assert statement */",
            ]
        );

        assert_eq!(generated.warnings().len(), lines.len() - 2);
    }

    #[test]
    fn globals_use_storage_modifiers() {
        let generated = generate(
            "\
LIMIT = 10  # @define
# public
counter: int = 0
# volatile const
status: int
name = \"mcu\"
ratio = 0.5
",
        );

        let code = generated.code();
        assert!(code.contains("\n#define LIMIT 10\n"));
        assert!(!code.contains("LIMIT ="));
        assert!(code.contains("\nint32_t counter = 0;\n"));
        assert!(code.contains("\nstatic volatile const int32_t status;\n"));
        assert!(code.contains("\nstatic const char* const name = \"mcu\";\n"));
        assert!(code.contains("\nstatic const float ratio = 0.5;\n"));
    }

    #[test]
    fn promoted_constants_are_not_translated() {
        let generated = generate("MASK: int = 1 << 3  # @define\n");

        assert!(generated.code().contains("\n#define MASK 1 << 3\n"));
        assert!(!generated.code().contains("unsupported"));
        assert!(generated.warnings().is_empty());
    }

    #[test]
    fn reassigned_constants_are_dropped() {
        let generated = generate("LED = 13  # @define\nLED = 14\nLED: int = 15\n");
        let code = generated.code();

        assert!(code.contains("\n#define LED 13\n"));
        assert!(!code.contains("14"));
        assert!(!code.contains("15"));

        let warnings: Vec<_> = generated
            .warnings()
            .iter()
            .map(|warning| (warning.location().start().line(), warning.val().to_string()))
            .collect();

        let message = "`LED` is a manifest constant, this assignment was dropped";
        assert_eq!(
            warnings,
            vec![(2, message.to_owned()), (3, message.to_owned())]
        );
    }

    #[test]
    fn entry_guard_is_dropped() {
        let generated = generate(
            "\
def main():
    pass

if __name__ == \"__main__\":
    main()
else:
    print(\"imported\")
",
        );

        assert!(generated.code().ends_with("int main(void) {\n    return 0;\n}\n"));
        assert!(generated.warnings().is_empty());
    }

    #[test]
    fn reversed_guard_is_translated() {
        let generated = generate("if \"__main__\" == __name__:\n    main()\n");
        assert!(generated
            .code()
            .ends_with("if ((\"__main__\" == __name__)) {\n    main();\n}\n"));
    }

    #[test]
    fn reference_detection() {
        let (lines, generated) = body("def f(v):\n    n = g(v, key=[n])\n");

        assert_eq!(
            lines,
            vec!["    n = g(v, /* unsupported: keyword argument */);"]
        );
        assert_eq!(generated.warnings().len(), 2);
    }
}
