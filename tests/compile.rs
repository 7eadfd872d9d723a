use mcuc::{
    directive::{extract_manifest_constants, render_manifest_directives},
    CompileOptions, Generated, Profile,
};

fn compile(source: &str, profile: Profile) -> Generated {
    mcuc::compile(source, "test.py", profile, CompileOptions::empty()).unwrap()
}

fn has_line(code: &str, expected: &str) -> bool {
    code.lines().any(|line| line == expected)
}

#[test]
fn constant_and_print_in_entry_point() {
    let source = "\
LED_PIN = 13  # @define uint8_t

def main():
    x = 5
    print(\"count\", x)
";

    let generated = compile(source, Profile::Pc);
    let code = generated.code();

    assert!(has_line(code, "#define LED_PIN ((uint8_t)13)"), "{}", code);
    assert!(has_line(code, "    printf(\"count %d\\n\", x);"), "{}", code);
    assert!(!code.contains("LED_PIN ="));
    assert!(generated.warnings().is_empty());
}

#[test]
fn full_program_layout() {
    let source = "\
BLINK_MS = 500  # @define
DEBUG = False  # @DEFINE bool

# volatile
ticks: int = 0

def blink(times: int) -> None:
    \"\"\"Toggles the LED.\"\"\"
    count = 0
    while count < times:
        count = count + 1
    return

def main():
    blink(3)

if __name__ == \"__main__\":
    main()
";

    let expected = "\
#include <stdbool.h>
#include <stdint.h>
#include <stdio.h>

#define TARGET_MCU

// Manifest constants
#define BLINK_MS 500
#define DEBUG ((bool)0)

#include \"gc_runtime.h\"

static volatile int32_t ticks = 0;
void blink(int32_t times) {
    int32_t count = 0;
    while ((count < times)) {
        count = (count + 1);
    }
    return;
}

void main(void) {
    blink(3);
}
";

    let generated = compile(source, Profile::Mcu);
    assert_eq!(generated.code(), expected);
    assert!(generated.warnings().is_empty());
}

#[test]
fn entry_point_differs_per_profile() {
    let source = "def main():\n    pass\n";

    let pc = compile(source, Profile::Pc);
    assert!(has_line(pc.code(), "#define TARGET_PC"));
    assert!(pc.code().ends_with("int main(void) {\n    return 0;\n}\n"));

    let mcu = compile(source, Profile::Mcu);
    assert!(has_line(mcu.code(), "#define TARGET_MCU"));
    assert!(mcu.code().ends_with("void main(void) {\n}\n"));
}

#[test]
fn entry_guard_emits_nothing() {
    let with_guard = "\
def main():
    pass

if __name__ == \"__main__\":
    count = 3
    while count > 0:
        count = count - 1
    main()
else:
    print(\"library\", 1)
";

    let without_guard = "def main():\n    pass\n";

    let generated = compile(with_guard, Profile::Pc);
    assert_eq!(generated.code(), compile(without_guard, Profile::Pc).code());
    assert!(generated.warnings().is_empty());
}

#[test]
fn for_loops_degrade_to_placeholders() {
    let source = "\
def main():
    total = 0
    for i in range(10):
        total = total + i
    print(total)
";

    let generated = compile(source, Profile::Pc);
    let code = generated.code();

    assert!(has_line(code, "    /* unsupported: for loop */"));
    assert!(has_line(code, "    printf(\"%d\\n\", total);"));

    let warnings: Vec<_> = generated
        .warnings()
        .iter()
        .map(|warning| warning.val().to_string())
        .collect();

    assert_eq!(warnings, vec!["Unsupported for loop, emitted a placeholder"]);
    assert_eq!(generated.warnings()[0].location().start().line(), 3);
}

#[test]
fn qualifier_order_for_every_modifier_subset() {
    let cases = [
        ("# plain", "static "),
        ("# const", "static const "),
        ("# volatile", "static volatile "),
        ("# @CONST volatile", "static volatile const "),
        ("# public", ""),
        ("# const @public", "const "),
        ("# Volatile, public", "volatile "),
        ("# const volatile public", "volatile const "),
    ];

    for (comment, qualifiers) in cases.iter() {
        let source = format!("{}\nlevel: int = 1\n", comment);
        let generated = compile(&source, Profile::Mcu);

        let expected = format!("{}int32_t level = 1;", qualifiers);
        assert!(
            has_line(generated.code(), &expected),
            "`{}` should yield `{}`:\n{}",
            comment,
            expected,
            generated.code()
        );
    }
}

#[test]
fn modifiers_require_the_adjacent_line() {
    let source = "# public volatile\n\nlevel: int = 1\nother: int = 2  # const\n";
    let code = compile(source, Profile::Pc).into_code();

    assert!(has_line(&code, "static int32_t level = 1;"));
    assert!(has_line(&code, "static int32_t other = 2;"));
}

#[test]
fn embedded_code_replaces_the_body() {
    let source = "\
def read_adc(channel: int) -> int:
    \"\"\"Reads one sample.

    __C_CODE__
    #ifdef TARGET_MCU
        return HAL_ADC_Read(channel);
    #else
        return 512;
    #endif
    \"\"\"
    sample = simulated_sample(channel)
    return sample
";

    let generated = compile(source, Profile::Mcu);
    let expected = "\
int32_t read_adc(int32_t channel) {
#ifdef TARGET_MCU
    return HAL_ADC_Read(channel);
#else
    return 512;
#endif
}
";

    assert!(generated.code().ends_with(expected), "{}", generated.code());
    assert!(!generated.code().contains("simulated_sample"));
    assert!(!generated.code().contains("Reads one sample"));
}

#[test]
fn statements_keep_source_order() {
    let source = "\
def step(a: int, b: int) -> int:
    \"\"\"Docstrings are dropped.\"\"\"
    import math
    first = a * 2
    second: float = 1.5
    if first > b:
        first = first % b
    else:
        pass
    third = first // 3
    return third
";

    let code = compile(source, Profile::Pc).into_code();
    let body: Vec<_> = code
        .lines()
        .skip_while(|line| !line.starts_with("int32_t step("))
        .collect();

    assert_eq!(
        body,
        vec![
            "int32_t step(int32_t a, int32_t b) {",
            "    int32_t first = (a * 2);",
            "    float second = 1.5;",
            "    if ((first > b)) {",
            "        first = (first % b);",
            "    } else {",
            "    }",
            "    int32_t third = (first / 3);",
            "    return third;",
            "}",
        ]
    );
}

#[test]
fn chained_comparisons_keep_the_first_pair() {
    let generated = compile("def f(x):\n    return 0 < x < 10\n", Profile::Pc);

    assert!(has_line(generated.code(), "    return (0 < x);"));
    assert_eq!(
        generated.warnings()[0].val().to_string(),
        "Only the first comparison of a chain is translated"
    );
}

#[test]
fn manifest_directives_are_idempotent() {
    let source = "\
FREQ = 8_000_000  # @define uint32_t
ENABLED = True  # @Define
lower = 1  # @define
NAME = \"dev # 1\"  # @define
";

    let constants = extract_manifest_constants(source);
    let names: Vec<_> = constants.iter().map(|constant| constant.name()).collect();
    assert_eq!(names, vec!["FREQ", "ENABLED", "NAME"]);

    let normalized = render_manifest_directives(&constants);
    let again = render_manifest_directives(&extract_manifest_constants(&normalized));
    assert_eq!(normalized, again);

    let first = compile(&normalized, Profile::Pc).into_code();
    let second = compile(&again, Profile::Pc).into_code();
    assert_eq!(first, second);
    assert!(has_line(&first, "#define ENABLED 1"));
    assert!(has_line(&first, "#define NAME \"dev # 1\""));
}

#[test]
fn strict_mode_rejects_placeholders() {
    let source = "def main():\n    for i in items:\n        pass\n    x = -1\n";

    let relaxed = mcuc::compile(source, "test.py", Profile::Pc, CompileOptions::empty());
    assert_eq!(relaxed.map(|generated| generated.warnings().len()).ok(), Some(2));

    let diagnostics = mcuc::compile(source, "test.py", Profile::Pc, CompileOptions::STRICT)
        .err()
        .unwrap();

    let messages: Vec<_> = diagnostics.messages().collect();
    assert_eq!(
        messages,
        vec![
            "Unsupported for loop, emitted a placeholder",
            "Unsupported unary operator, emitted a placeholder",
        ]
    );

    assert!(diagnostics.to_string().ends_with("Build failed with 2 errors\n"));
}

#[test]
fn strict_mode_accepts_clean_programs() {
    let source = "def main():\n    x = 1\n";
    let generated = mcuc::compile(source, "test.py", Profile::Pc, CompileOptions::STRICT);

    assert!(generated.is_ok());
}

#[test]
fn syntax_errors_abort_without_output() {
    let diagnostics = mcuc::compile("def main(:\n    pass\n", "bad.py", Profile::Pc, CompileOptions::empty())
        .err()
        .unwrap();

    assert_eq!(diagnostics.len(), 1);

    let rendered = diagnostics.to_string();
    assert!(rendered.starts_with("error: Expected identifier\n --> bad.py:1:10\n"));
    assert!(rendered.ends_with("Build failed with 1 error\n"));
}

#[test]
fn decorators_shape_the_output() {
    let source = "\
@inline_c(\"#define SQUARE(x) ((x) * (x))\")
@arena
def area(side: int) -> int:
    return SQUARE(side)
";

    let generated = compile(source, Profile::Pc);
    let expected = "\
#define SQUARE(x) ((x) * (x))
int32_t area(int32_t side) {
    GC_SCOPE_START();
    GC_SCOPE_END();
    return SQUARE(side);
}
";

    assert!(generated.code().ends_with(expected), "{}", generated.code());
    assert!(generated.warnings().is_empty());
}

#[test]
fn runtime_header_matches_generated_calls() {
    assert_eq!(mcuc::runtime::HEADER_NAME, "gc_runtime.h");
    assert!(mcuc::runtime::HEADER.contains("#define GC_SCOPE_START()"));
    assert!(mcuc::runtime::HEADER.contains("#define GC_SCOPE_END()"));
}

#[test]
fn slice_tuples_degrade_to_placeholders() {
    for source in ["def f():\n    x = a[0, :]\n", "def f():\n    x = a[1:2, ::3]\n"] {
        let generated = compile(source, Profile::Pc);

        assert!(has_line(generated.code(), "    int32_t x = /* unsupported: subscript */;"));
        assert_eq!(generated.warnings().len(), 1);
    }
}

#[test]
fn strict_mode_accepts_promoted_expressions() {
    let source = "MASK: int = 1 << 3  # @define\n\ndef main():\n    x = MASK\n";
    let generated =
        mcuc::compile(source, "test.py", Profile::Mcu, CompileOptions::STRICT).unwrap();

    assert!(has_line(generated.code(), "#define MASK 1 << 3"));
    assert!(generated.warnings().is_empty());
}
