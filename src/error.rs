//! Reporte de errores con ubicación.
//!
//! [`Diagnostics`] agrupa errores de una misma fase y los presenta junto
//! al fragmento de código fuente donde ocurrieron.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Debug, Display},
};

mod sealed {
    pub trait Sealed {}
}

pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn location(&self) -> &Location;
}

pub struct Diagnostics {
    kind: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    /// Cambia la descripción de la fase que reporta, por ejemplo "Syntax error".
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
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

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { kind, errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in errors {
            writeln!(fmt, "{}: {}", kind, error.source())?;

            let location = error.location();
            writeln!(fmt, " --> {}", location)?;

            let (start, end) = (location.start(), location.end().back());
            let digits = end.line().to_string().len();
            writeln!(fmt, "{:digits$} |", "", digits = digits)?;

            for line_number in start.line()..=end.line() {
                // Los tabuladores ocupan cuatro columnas
                let line = location.source().line(line_number).unwrap_or("");
                let line = line.replace('\t', "    ");

                writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)?;
            }

            let (from, to) = (start.column(), end.column());
            let min = from.min(to).max(1);
            let max = from.max(to).max(1);

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

        let error_or_errors = if errors.len() == 1 { "error" } else { "errors" };
        writeln!(
            fmt,
            "Build failed with {} {}",
            errors.len(),
            error_or_errors
        )
    }
}

impl Debug for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, fmt)
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
    use crate::{lex, parse, source::Source};
    use pretty_assertions::assert_eq;

    #[test]
    fn lexical_error_points_at_character() {
        let source = Source::new("<test>", "def f() = 1 $ 2;");
        let error = lex::tokenize(&source).unwrap_err();
        let diagnostics = Diagnostics::from(error).kind("Lexical error");

        assert_eq!(
            diagnostics.to_string(),
            concat!(
                "Lexical error: Bad character '$' in input stream\n",
                " --> <test>:1:13\n",
                "  |\n",
                "1 | def f() = 1 $ 2;\n",
                "  |             ^\n",
                "\n",
                "Build failed with 1 error\n",
            )
        );
    }

    #[test]
    fn syntax_error_spans_token() {
        let source = Source::new("<test>", "def f(a) =\n\tabc ;");
        let tokens = lex::tokenize(&source).unwrap();
        let error = parse::parse(&tokens, source.eof()).unwrap_err();
        let diagnostics = Diagnostics::from(error).kind("Syntax error");

        assert_eq!(
            diagnostics.to_string(),
            concat!(
                "Syntax error: Unbound variable `abc`\n",
                " --> <test>:[2:5-2:7]\n",
                "  |\n",
                "2 |     abc ;\n",
                "  |     ^^^\n",
                "\n",
                "Build failed with 1 error\n",
            )
        );
    }

    #[test]
    fn debug_renders_like_display() {
        let source = Source::new("<test>", "def 1() = 1;");
        let tokens = lex::tokenize(&source).unwrap();
        let error = parse::parse(&tokens, source.eof()).unwrap_err();
        let diagnostics = Diagnostics::from(error).kind("Syntax error");

        assert_eq!(format!("{:?}", diagnostics), diagnostics.to_string());
        assert!(format!("{:?}", diagnostics).starts_with("Syntax error: Expected identifier"));
    }

    #[test]
    fn empty() {
        let diagnostics = Diagnostics::default();
        assert!(diagnostics.is_empty());
        assert_eq!(diagnostics.to_string(), "No errors were reported\n");
    }
}
