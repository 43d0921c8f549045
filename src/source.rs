//! Rastreo de ubicaciones originales en código fuente.
//!
//! Los distintos objetos internos que el compilador construye
//! deben llevar cuenta de posiciones o rangos de ubicaciones en
//! el código fuente original, lo cual permite determinar un punto
//! exacto o aproximado en donde ocurre un error.
//!
//! # Convención de columnas
//! Las líneas se numeran desde 1. La columna es un contador que
//! inicia en 0 al comienzo de cada línea y avanza antes de observar
//! cada carácter: 4 posiciones para un tabulador, 1 para cualquier
//! otro. Por tanto, el primer carácter de una línea se encuentra en
//! la columna 1, salvo que sea un tabulador.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::Range,
    rc::Rc,
};

/// Avance de columna por cada tabulador.
const TAB_WIDTH: u32 = 4;

/// Un flujo de entrada, carácter por carácter.
///
/// Cada carácter se acompaña de la posición que ocupa.
pub trait InputStream: Iterator<Item = (char, Position)> {}

impl<I: Iterator<Item = (char, Position)>> InputStream for I {}

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Texto fuente completo de una compilación, junto a su nombre de origen.
pub struct Source {
    name: String,
    text: String,
}

impl Source {
    /// Construye un origen a partir de su nombre y su contenido ya leído.
    pub fn new<N, T>(name: N, text: T) -> Rc<Self>
    where
        N: Into<String>,
        T: Into<String>,
    {
        Rc::new(Source {
            name: name.into(),
            text: text.into(),
        })
    }

    /// Nombre de origen, usualmente una ruta.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Texto fuente completo.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Obtiene una línea por número, comenzando en 1.
    pub fn line(&self, number: u32) -> Option<&str> {
        let index = (number as usize).checked_sub(1)?;
        self.text.split('\n').nth(index)
    }

    /// Ubicación inmediatamente posterior al último carácter.
    pub fn eof(self: &Rc<Self>) -> Location {
        let end = consume(self)
            .last()
            .map(|(c, position)| match c {
                '\n' => position.newline(),
                _ => position,
            })
            .unwrap_or_default()
            .advance();

        Location::new(Rc::clone(self), end..end.advance())
    }
}

/// Una ubicación está conformada por un origen y un rango de posiciones.
#[derive(Clone)]
pub struct Location {
    from: Rc<Source>,
    position: Range<Position>,
}

impl Location {
    /// Construye una ubicación. El final del rango es exclusivo.
    pub fn new(from: Rc<Source>, position: Range<Position>) -> Self {
        Location { from, position }
    }

    /// Ubicación de un único carácter.
    pub fn single(from: Rc<Source>, position: Position) -> Self {
        Location::new(from, position..position.advance())
    }

    /// Unifica un rango de ubicaciones. Se asume el mismo origen.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            from: from.from,
            position: from.position.start..to.position.end,
        }
    }

    /// Origen de esta ubicación.
    pub fn source(&self) -> &Source {
        &self.from
    }

    /// Obtiene la posición de inicio.
    pub fn start(&self) -> Position {
        self.position.start
    }

    /// Obtiene la posición de fin.
    pub fn end(&self) -> Position {
        self.position.end
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:", self.from.name)?;

        let Range { start, end } = self.position;
        if end == start.advance() {
            // Solo se señala una columna en específico
            write!(formatter, "{}", start)
        } else {
            write!(formatter, "[{}-{}]", start, end.back())
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Una posición línea-columna en un archivo.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    /// Construye una posición arbitraria.
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }

    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Incrementa el número de columna.
    pub fn advance(self) -> Position {
        Position {
            line: self.line,
            column: self.column + 1,
        }
    }

    /// Decrementa el número de columna.
    pub fn back(self) -> Position {
        Position {
            line: self.line,
            column: self.column.saturating_sub(1),
        }
    }

    /// Incrementa el número de línea y reinicia el contador de columna.
    pub fn newline(self) -> Position {
        Position {
            line: self.line + 1,
            column: 0,
        }
    }

    /// Avanza la columna el ancho de un tabulador.
    pub fn tab(self) -> Position {
        Position {
            line: self.line,
            column: self.column + TAB_WIDTH,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 0 }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Recorre el texto fuente carácter por carácter, asociando a cada
/// uno la posición que ocupa.
pub fn consume(source: &Source) -> impl InputStream + '_ {
    let mut cursor = Position::default();

    source.text.chars().map(move |c| {
        let here = match c {
            '\t' => cursor.tab(),
            _ => cursor.advance(),
        };

        cursor = match c {
            '\n' => here.newline(),
            _ => here,
        };

        (c, here)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn positions(text: &str) -> Vec<(char, u32, u32)> {
        let source = Source::new("<test>", text);
        let positions = consume(&source)
            .map(|(c, position)| (c, position.line(), position.column()))
            .collect();

        positions
    }

    #[test]
    fn columns_start_at_one_and_tabs_count_four() {
        assert_eq!(
            positions("ab\n\tc"),
            vec![('a', 1, 1), ('b', 1, 2), ('\n', 1, 3), ('\t', 2, 4), ('c', 2, 5)]
        );
    }

    #[test]
    fn location_display() {
        let source = Source::new("prog.f", "def f() = 1;");
        let single = Location::single(Rc::clone(&source), Position::new(1, 5));
        assert_eq!(single.to_string(), "prog.f:1:5");

        let range = Location::new(source, Position::new(1, 1)..Position::new(1, 4));
        assert_eq!(range.to_string(), "prog.f:[1:1-1:3]");
    }

    #[test]
    fn eof_follows_last_character() {
        let source = Source::new("<test>", "ab\nc");
        assert_eq!(source.eof().start(), Position::new(2, 2));

        let source = Source::new("<test>", "ab\n");
        assert_eq!(source.eof().start(), Position::new(2, 1));

        let source = Source::new("<test>", "");
        assert_eq!(source.eof().start(), Position::new(1, 1));
    }

    #[test]
    fn lines_are_one_based() {
        let source = Source::new("<test>", "first\nsecond");
        assert_eq!(source.line(1), Some("first"));
        assert_eq!(source.line(2), Some("second"));
        assert_eq!(source.line(0), None);
        assert_eq!(source.line(3), None);
    }
}
