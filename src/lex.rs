//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los espacios
//! en blanco se descartan durante esta operación. Cada token emitido está
//! asociado a una ubicación en el código fuente original, lo cual permite
//! rastrear errores tanto en los mismos como en constructos más elevados de
//! fases posteriores.
//!
//! # Contenido de un token
//! Operadores, puntuación y palabras clave se identifican por el hecho de lo
//! que son y no incluyen lexemas. Los identificadores sí incluyen su lexema
//! original. Las constantes literales se resuelven a sus valores en vez de
//! preservar sus lexemas.
//!
//! # Reglas importantes del lenguaje
//! - Los identificadores se componen exclusivamente de letras ASCII.
//! - Las constantes enteras se componen exclusivamente de dígitos decimales.
//! - Un mismo token no puede mezclar letras y dígitos: tanto `x1` como `1x`
//!   son errores léxicos.
//! - Las palabras clave distinguen mayúsculas de minúsculas.
//!
//! # Errores
//! El primer error léxico es fatal. El lexer no intenta recuperarse y deja
//! de emitir tokens luego de reportarlo.

use crate::source::{InputStream, Located, Location, Position, Source};
use std::{
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;
use tracing::{debug, trace};

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Un token en progreso no puede cambiar entre letras y dígitos.
    #[error("Character {0:?} mixes letters and digits in the same token")]
    MixedToken(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow, valid range is [0, 2147483647]")]
    IntOverflow,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<str>);

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier(Rc::from(name))
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(i32),

    /// `=`
    Equals,

    /// `,`
    Comma,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Slash,

    /// `;`
    Semicolon,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => write!(fmt, "literal `{}`", integer),
            Equals => fmt.write_str("`=`"),
            Comma => fmt.write_str("`,`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Times => fmt.write_str("`*`"),
            Slash => fmt.write_str("`/`"),
            Semicolon => fmt.write_str("`;`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Def,
    If,
    Then,
    Else,
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Keyword::*;
        let string = match self {
            Def  => "def",
            If   => "if",
            Then => "then",
            Else => "else",
        };

        fmt.write_str(string)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use Keyword::*;

        const KEYWORDS: &[(&str, Keyword)] = &[
            ("def",  Def),
            ("if",   If),
            ("then", Then),
            ("else", Else),
        ];

        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<S: Iterator> {
    from: Rc<Source>,
    source: Peekable<S>,
    state: State,
    start: Position,
    last: Position,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de error, terminal.
    Error,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Constante entera.
    ///
    /// Este estado incluirá dígitos en el token mientras que
    /// el siguiente carácter sea un dígito.
    Integer(i32),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(from: Rc<Source>, source: S) -> Self {
        Lexer {
            from,
            source: source.peekable(),
            state: State::Start,
            start: Position::default(),
            last: Position::default(),
        }
    }

    /// Reduce la entrada completa a una secuencia de tokens, o
    /// bien al primer error léxico encontrado.
    pub fn try_exhaustive(self) -> Result<Vec<Located<Token>>, Located<LexerError>> {
        let tokens = self.collect::<Result<Vec<_>, _>>()?;
        debug!(count = tokens.len(), "lexical analysis complete");

        Ok(tokens)
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<Token>, (LexerError, Position)> {
        use {State::*, Token::*};

        loop {
            let (next_char, here) = match self.source.peek() {
                Some(&(c, position)) => (Some(c), position),
                None => (None, self.last.advance()),
            };

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start = self.state {
                self.start = here;
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                (Error, _) => return Ok(None),

                // Tokens triviales
                (Start, None) => return Ok(None),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('=')) => self.state = Complete(Equals),
                (Start, Some('+')) => self.state = Complete(Plus),
                (Start, Some('-')) => self.state = Complete(Minus),
                (Start, Some('*')) => self.state = Complete(Times),
                (Start, Some('/')) => self.state = Complete(Slash),
                (Start, Some(',')) => self.state = Complete(Comma),
                (Start, Some(';')) => self.state = Complete(Semicolon),

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_ascii_alphabetic() => self.state = Word(c.to_string()),

                // Inicio de una constante numérica. No se consume
                // el dígito, ya que esta lógica ya está implementada
                // en el respectivo caso para un estado de constante
                // entera para el cual el siguiente carácter es un
                // dígito. Por tanto, la constante es inicialmente cero.
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(0);
                    continue;
                }

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_whitespace() => (),
                (Start, Some(c)) => return Err((LexerError::BadChar(c), here)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => return Ok(Some(std::mem::replace(value, Plus))),

                // Acumulación dígito por dígito de constantes enteras
                (Integer(accumulated), Some(digit)) if digit.is_ascii_digit() => {
                    let digit = digit as i32 - '0' as i32;

                    match accumulated
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit))
                    {
                        Some(result) => *accumulated = result,
                        None => return Err((LexerError::IntOverflow, here)),
                    }
                }

                (Integer(_), Some(c)) if c.is_ascii_alphabetic() => {
                    return Err((LexerError::MixedToken(c), here))
                }

                // Si sigue algo que no es un dígito, la constante ha terminado
                (Integer(integer), _) => return Ok(Some(IntLiteral(*integer))),

                // Extensión de términos
                (Word(word), Some(c)) if c.is_ascii_alphabetic() => word.push(c),
                (Word(_), Some(c)) if c.is_ascii_digit() => {
                    return Err((LexerError::MixedToken(c), here))
                }

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => {
                    let token = match self::Keyword::from_str(word) {
                        Ok(keyword) => Keyword(keyword),
                        Err(()) => Id(Identifier::from(word.as_str())),
                    };

                    return Ok(Some(token));
                }
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            if let Some((_, position)) = self.source.next() {
                self.last = position;
            }
        }
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some(token)) => {
                self.state = State::Start;

                let location = Location::new(Rc::clone(&self.from), self.start..self.last.advance());
                trace!(%token, %location, "token");

                Some(Ok(Located::at(token, location)))
            }

            Err((error, position)) => {
                self.state = State::Error;

                let location = match error {
                    LexerError::IntOverflow => {
                        Location::new(Rc::clone(&self.from), self.start..position.advance())
                    }

                    _ => Location::single(Rc::clone(&self.from), position),
                };

                Some(Err(Located::at(error, location)))
            }
        }
    }
}

/// Tokeniza un texto fuente completo.
pub fn tokenize(source: &Rc<Source>) -> Result<Vec<Located<Token>>, Located<LexerError>> {
    Lexer::new(Rc::clone(source), crate::source::consume(source)).try_exhaustive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn tokens(text: &str) -> Vec<Token> {
        let source = Source::new("<test>", text);
        tokenize(&source)
            .expect("lexical error")
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    fn error(text: &str) -> (LexerError, u32, u32) {
        let source = Source::new("<test>", text);
        let (location, error) = tokenize(&source).expect_err("lexed ok").split();
        (error, location.start().line(), location.start().column())
    }

    fn id(name: &str) -> Token {
        Token::Id(Identifier::from(name))
    }

    #[test]
    fn simple_definition() {
        use Token::*;

        assert_eq!(
            tokens("def f(x) = x + 1 ;"),
            vec![
                Keyword(self::Keyword::Def),
                id("f"),
                OpenParen,
                id("x"),
                CloseParen,
                Equals,
                id("x"),
                Plus,
                IntLiteral(1),
                Semicolon,
            ]
        );
    }

    #[test]
    fn keywords_take_precedence_over_identifiers() {
        use self::Keyword::*;

        assert_eq!(
            tokens("if then else def iff Def"),
            vec![
                Token::Keyword(If),
                Token::Keyword(Then),
                Token::Keyword(Else),
                Token::Keyword(Def),
                id("iff"),
                id("Def"),
            ]
        );
    }

    #[test]
    fn any_whitespace_separates_tokens() {
        use Token::*;

        assert_eq!(
            tokens("def\x0bf()\x0c=\r\n\t1;"),
            vec![
                Keyword(self::Keyword::Def),
                id("f"),
                OpenParen,
                CloseParen,
                Equals,
                IntLiteral(1),
                Semicolon,
            ]
        );
    }

    #[test]
    fn punctuation_needs_no_whitespace() {
        use Token::*;

        assert_eq!(
            tokens("g(a,b)*2/c-1;"),
            vec![
                id("g"),
                OpenParen,
                id("a"),
                Comma,
                id("b"),
                CloseParen,
                Times,
                IntLiteral(2),
                Slash,
                id("c"),
                Minus,
                IntLiteral(1),
                Semicolon,
            ]
        );
    }

    #[test]
    fn token_at_end_of_input() {
        assert_eq!(tokens("42"), vec![Token::IntLiteral(42)]);
        assert_eq!(tokens("abc"), vec![id("abc")]);
        assert_eq!(tokens("  \n\t "), vec![]);
    }

    #[test]
    fn token_locations() {
        let source = Source::new("<test>", "def\n\tfoo 12");
        let locations: Vec<_> = tokenize(&source)
            .unwrap()
            .iter()
            .map(|token| {
                let location = token.location();
                (location.start(), location.end())
            })
            .collect();

        assert_eq!(
            locations,
            vec![
                (Position::new(1, 1), Position::new(1, 4)),
                (Position::new(2, 5), Position::new(2, 8)),
                (Position::new(2, 9), Position::new(2, 11)),
            ]
        );
    }

    #[test_case("def f() = 1 % 2;", LexerError::BadChar('%'), 1, 13; "bad character")]
    #[test_case("def f() =\n  12ab;", LexerError::MixedToken('a'), 2, 5; "digit then letter")]
    #[test_case("def f(x1) = 1;", LexerError::MixedToken('1'), 1, 8; "letter then digit")]
    #[test_case("x_y", LexerError::BadChar('_'), 1, 2; "underscore")]
    #[test_case("99999999999", LexerError::IntOverflow, 1, 1; "overflow")]
    fn lexical_errors(text: &str, expected: LexerError, line: u32, column: u32) {
        assert_eq!(error(text), (expected, line, column));
    }

    #[test]
    fn stops_after_first_error() {
        let source = Source::new("<test>", "a $ b # c");
        let results: Vec<_> = Lexer::new(Rc::clone(&source), crate::source::consume(&source))
            .collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn max_literal() {
        assert_eq!(tokens("2147483647"), vec![Token::IntLiteral(i32::MAX)]);
    }
}
