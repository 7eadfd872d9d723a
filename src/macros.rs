/// Emite una línea de código C con la indentación actual.
///
/// Sin argumentos de formato emite una línea en blanco.
macro_rules! emit {
    ($cx:expr) => {
        $cx.push_line(String::new())
    };

    ($cx:expr, $($format:tt)*) => {
        $cx.push_line(format!($($format)*))
    };
}
