//! Reporte de errores y advertencias con ubicación.
//!
//! Cada fase define su propio tipo de error. Los errores ubicados de
//! cualquier fase se agregan en [`Diagnostics`], cuya representación
//! textual cita las líneas afectadas del código fuente.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

mod sealed {
    pub trait Sealed {}
}

pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn location(&self) -> &Location;
}

/// Colección de errores o advertencias ubicadas.
pub struct Diagnostics {
    kind: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    /// Cambia la clase de diagnóstico, `"error"` por omisión.
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Mensajes sin contexto, en orden.
    pub fn messages(&self) -> impl Iterator<Item = String> + '_ {
        self.errors.iter().map(|error| error.source().to_string())
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            kind: "error",
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            errors: vec![Box::new(error)],
            ..Default::default()
        }
    }
}

impl<E: 'static + LocatedError> From<Vec<E>> for Diagnostics {
    fn from(errors: Vec<E>) -> Self {
        let errors = errors
            .into_iter()
            .map(|error| {
                let errors: Box<dyn LocatedError> = Box::new(error);
                errors
            })
            .collect();

        Diagnostics {
            errors,
            ..Default::default()
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { kind, errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No {}s were reported", kind);
        }

        for error in errors {
            writeln!(fmt, "{}: {}", kind, error.source())?;

            let location = error.location();
            writeln!(fmt, " --> {}", location)?;

            let digits = location.end().line().to_string().chars().count();
            writeln!(fmt, "{:digits$} |", "", digits = digits)?;

            for line_number in location.start().line()..=location.end().line() {
                location.source().with_line(line_number, |line| {
                    writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)
                })?
            }

            let (from, to) = (location.start().column(), location.end().column().saturating_sub(1));
            let min = from.min(to).max(1);
            let max = from.max(to);

            let skip = (min - 1) as usize;
            let highlight = (max - min + 1) as usize;

            writeln!(
                fmt,
                "{:digits$} | {:skip$}{:^<highlight$}",
                "",
                "",
                "",
                digits = digits,
                skip = skip,
                highlight = highlight
            )?;

            writeln!(fmt)?;
        }

        let plural = if errors.len() == 1 { "" } else { "s" };
        match *kind {
            "error" => writeln!(fmt, "Build failed with {} error{}", errors.len(), plural),
            kind => writeln!(fmt, "{} {}{} emitted", errors.len(), kind, plural),
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, fmt)
    }
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.as_ref()
    }

    fn location(&self) -> &Location {
        Located::location(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source};

    fn diagnose(text: &str) -> Diagnostics {
        let (start, stream) = source::consume(text.as_bytes(), "blink.py");
        match Lexer::new(start.clone(), stream).try_exhaustive() {
            Err(errors) => errors.into(),
            Ok(tokens) => match parse::parse(tokens.iter(), start) {
                Err(error) => error.into(),
                Ok(_) => Diagnostics::default(),
            },
        }
    }

    #[test]
    fn syntax_error_quotes_the_line() {
        let rendered = diagnose("x = 1\ndef f(:\n    pass\n").to_string();
        let expected = "\
error: Expected identifier
 --> blink.py:2:7
  |
2 | def f(:
  |       ^

Build failed with 1 error
";

        assert_eq!(rendered, expected);
    }

    #[test]
    fn lexical_errors_are_all_reported() {
        let diagnostics = diagnose("a = $\nb = ?\n");

        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.to_string().ends_with("Build failed with 2 errors\n"));
    }

    #[test]
    fn warnings_have_their_own_summary() {
        let diagnostics = diagnose("def f(:\n").kind("warning");
        let rendered = diagnostics.to_string();

        assert!(rendered.starts_with("warning: Expected identifier\n"));
        assert!(rendered.ends_with("1 warning emitted\n"));
        assert_eq!(Diagnostics::default().kind("warning").to_string(), "No warnings were reported\n");
    }

    #[test]
    fn debug_output_is_the_rendered_report() {
        let diagnostics = diagnose("def f(:\n");
        assert_eq!(format!("{:?}", diagnostics), diagnostics.to_string());
    }
}
