//! Análisis sintáctico.
//!
//! El parser es de descenso recursivo. Consume tokens estrictamente de
//! izquierda a derecha, con un único token de lookahead y sin
//! backtracking. Cada producción exitosa deja exactamente un nodo
//! completo en la pila de ensamblado de expresiones; cada consumidor
//! extrae exactamente los operandos que necesita.
//!
//! # Gramática
//! ```text
//! program     := definition*
//! definition  := `def` id `(` [id (`,` id)*] `)` `=` expr `;`
//! expr        := `if` equality `then` expr [`else` expr] | equality
//! equality    := add_sub [`=` expr]
//! add_sub     := mul_div [(`+` | `-`) expr]
//! mul_div     := primary [(`*` | `/`) mul_div]
//! primary     := `(` expr `)` | id `(` [expr (`,` expr)*] `)` | id | number
//! ```
//!
//! El operando derecho de `+`, `-` y `=` es una expresión completa, por lo
//! cual estos operadores asocian a la derecha y absorben todo lo que les
//! sigue: `10 - 2 - 3` equivale a `10 - (2 - 3)` y `1 + 2 = 3` equivale a
//! `1 + (2 = 3)`. Lo mismo ocurre con `*` y `/` dentro de su propio nivel.
//!
//! # Resolución de nombres
//! Un identificador que no va seguido de `(` se resuelve contra la lista de
//! parámetros de la definición en curso, tomando la primera coincidencia.
//! Los destinos de llamadas no se resuelven aquí.

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    arch::{MAX_ARGS, PRINTF},
    ast::{BinOp, Expr, FunctionDefinition, Program},
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};

#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParserError {
    #[error("Expected token {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected token {0}, found end of input instead")]
    MissingToken(Token),

    #[error("Expected identifier, found {0} instead")]
    ExpectedId(Token),

    #[error("Expected number, identifier or `(`, found {0} instead")]
    ExpectedExpr(Token),

    #[error("Unbound variable `{0}`")]
    Unbound(Identifier),

    #[error("Function name `{0}` is reserved for the C library")]
    ReservedName(Identifier),

    #[error("Function `{0}` declares more than 4 parameters")]
    TooManyParameters(Identifier),

    #[error("Call to `{0}` passes {1} arguments, at most 4 are supported")]
    TooManyArguments(Identifier, usize),

    #[error("Expression stack empty")]
    StackEmpty,

    #[error("Expression stack holds {0} leftover expressions")]
    StackResidue(usize),

    #[error("Abrupt end of input")]
    UnexpectedEof,
}

/// Construye el árbol sintáctico a partir de la secuencia completa de tokens.
///
/// `eof` es la ubicación que se reporta para errores al final de la entrada.
pub fn parse(tokens: &[Located<Token>], eof: Location) -> Result<Program, Located<ParserError>> {
    let mut parser = Parser {
        tokens,
        cursor: 0,
        eof,
        stack: Vec::new(),
        scope: Vec::new(),
    };

    let program = parser.program()?;
    debug!(definitions = program.len(), "syntax analysis complete");

    Ok(program)
}

/// Estado de una única ejecución del parser.
struct Parser<'a> {
    tokens: &'a [Located<Token>],
    cursor: usize,
    eof: Location,

    /// Pila de ensamblado de expresiones.
    stack: Vec<Expr>,

    /// Parámetros de la definición en curso.
    scope: Vec<Identifier>,
}

type Parse<T> = Result<T, Located<ParserError>>;

impl<'a> Parser<'a> {
    fn program(&mut self) -> Parse<Program> {
        let mut definitions = Vec::new();
        while self.peek().is_some() {
            definitions.push(self.definition()?);
        }

        Ok(Program::new(definitions))
    }

    fn definition(&mut self) -> Parse<FunctionDefinition> {
        self.keyword(Keyword::Def)?;
        let (name, parameters) = self.signature()?;

        self.scope = parameters
            .iter()
            .map(|parameter| parameter.as_ref().clone())
            .collect();

        self.expect(Token::Equals)?;
        self.expr()?;
        self.expect(Token::Semicolon)?;

        let body = self.pop()?;
        self.scope.clear();

        if !self.stack.is_empty() {
            return self.fail(ParserError::StackResidue(self.stack.len()));
        }

        trace!(name = %name.as_ref(), parameters = parameters.len(), "parsed definition");
        Ok(FunctionDefinition::new(name, parameters, body))
    }

    fn signature(&mut self) -> Parse<(Located<Identifier>, Vec<Located<Identifier>>)> {
        let name = self.id()?;
        if name.as_ref().as_ref() == PRINTF {
            let error = ParserError::ReservedName(name.as_ref().clone());
            return Err(Located::at(error, name.location().clone()));
        }

        self.expect(Token::OpenParen)?;

        let mut parameters = Vec::new();
        if !self.accept(&Token::CloseParen) {
            loop {
                let parameter = self.id()?;
                if parameters.len() == MAX_ARGS {
                    let error = ParserError::TooManyParameters(name.as_ref().clone());
                    return Err(Located::at(error, parameter.location().clone()));
                }

                parameters.push(parameter);
                if !self.accept(&Token::Comma) {
                    self.expect(Token::CloseParen)?;
                    break;
                }
            }
        }

        Ok((name, parameters))
    }

    /// Expresión completa, que comienza por el nivel condicional.
    fn expr(&mut self) -> Parse<()> {
        if !self.accept(&Token::Keyword(Keyword::If)) {
            return self.equality();
        }

        self.equality()?;
        self.keyword(Keyword::Then)?;
        self.expr()?;

        let otherwise = if self.accept(&Token::Keyword(Keyword::Else)) {
            self.expr()?;
            Some(Box::new(self.pop()?))
        } else {
            None
        };

        let then = Box::new(self.pop()?);
        let condition = Box::new(self.pop()?);

        self.push(Expr::IfThenElse {
            condition,
            then,
            otherwise,
        });

        Ok(())
    }

    fn equality(&mut self) -> Parse<()> {
        self.add_sub()?;

        if self.accept(&Token::Equals) {
            self.expr()?;
            self.combine(BinOp::Equal)?;
        }

        Ok(())
    }

    fn add_sub(&mut self) -> Parse<()> {
        self.mul_div()?;

        let op = match self.peek() {
            Some(Token::Plus) => BinOp::Add,
            Some(Token::Minus) => BinOp::Sub,
            _ => return Ok(()),
        };

        self.cursor += 1;
        self.expr()?;
        self.combine(op)
    }

    fn mul_div(&mut self) -> Parse<()> {
        self.primary()?;

        let op = match self.peek() {
            Some(Token::Times) => BinOp::Mul,
            Some(Token::Slash) => BinOp::Div,
            _ => return Ok(()),
        };

        self.cursor += 1;
        self.mul_div()?;
        self.combine(op)
    }

    fn primary(&mut self) -> Parse<()> {
        let (location, token) = self.next()?.split();
        match token {
            Token::OpenParen => {
                self.expr()?;
                self.expect(Token::CloseParen)
            }

            Token::Id(name) => {
                if self.accept(&Token::OpenParen) {
                    self.application(Located::at(name, location))
                } else {
                    self.variable(name, location)
                }
            }

            Token::IntLiteral(value) => {
                self.push(Expr::IntLiteral(value));
                Ok(())
            }

            token => Err(Located::at(ParserError::ExpectedExpr(token), location)),
        }
    }

    /// Argumentos de una llamada; el `(` ya fue consumido.
    fn application(&mut self, callee: Located<Identifier>) -> Parse<()> {
        let mut args = Vec::new();
        if !self.accept(&Token::CloseParen) {
            loop {
                self.expr()?;
                args.push(self.pop()?);

                if !self.accept(&Token::Comma) {
                    self.expect(Token::CloseParen)?;
                    break;
                }
            }
        }

        let (location, callee) = callee.split();
        if args.len() > MAX_ARGS {
            // Se señala la llamada completa, hasta el `)` recién consumido
            let close = self.tokens[self.cursor - 1].location();
            let error = ParserError::TooManyArguments(callee, args.len());
            return Err(Located::at(error, Location::span(location, close)));
        }

        self.push(Expr::Application { callee, args });
        Ok(())
    }

    fn variable(&mut self, name: Identifier, location: Location) -> Parse<()> {
        match self.scope.iter().position(|parameter| *parameter == name) {
            Some(index) => {
                self.push(Expr::Identifier { name, index });
                Ok(())
            }

            None => Err(Located::at(ParserError::Unbound(name), location)),
        }
    }

    fn combine(&mut self, op: BinOp) -> Parse<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;

        self.push(Expr::Binary(Box::new(lhs), op, Box::new(rhs)));
        Ok(())
    }

    fn push(&mut self, expr: Expr) {
        self.stack.push(expr);
    }

    fn pop(&mut self) -> Parse<Expr> {
        match self.stack.pop() {
            Some(expr) => Ok(expr),
            None => self.fail(ParserError::StackEmpty),
        }
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            token => Err(Located::at(ParserError::ExpectedId(token), location)),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.tokens.get(self.cursor) {
            Some(found) if *found.as_ref() == token => {
                self.cursor += 1;
                Ok(())
            }

            Some(found) => {
                let error = ParserError::UnexpectedToken(token, found.as_ref().clone());
                Err(Located::at(error, found.location().clone()))
            }

            None => Err(Located::at(ParserError::MissingToken(token), self.eof.clone())),
        }
    }

    /// Consume el siguiente token solo si es igual a `token`.
    fn accept(&mut self, token: &Token) -> bool {
        let matches = self.peek() == Some(token);
        if matches {
            self.cursor += 1;
        }

        matches
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.cursor).map(|token| token.as_ref())
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.get(self.cursor) {
            Some(token) => {
                self.cursor += 1;
                Ok(token.clone())
            }

            None => Err(Located::at(ParserError::UnexpectedEof, self.eof.clone())),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        let location = match self.cursor.checked_sub(1) {
            Some(last) => self.tokens[last].location().clone(),
            None => self.eof.clone(),
        };

        Err(Located::at(error, location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex, source::Source};
    use expect_test::expect;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn try_parse(text: &str) -> Result<Program, Located<ParserError>> {
        let source = Source::new("<test>", text);
        let tokens = lex::tokenize(&source).expect("lexical error");
        parse(&tokens, source.eof())
    }

    fn body(text: &str) -> Expr {
        let mut definitions = try_parse(text).expect("syntax error").into_iter();
        let definition = definitions.next().expect("no definitions");
        assert!(definitions.next().is_none());

        definition.into_body()
    }

    fn error(text: &str) -> (ParserError, String) {
        let (location, error) = try_parse(text).expect_err("parsed ok").split();
        (error, location.start().to_string())
    }

    fn int(value: i32) -> Box<Expr> {
        Box::new(Expr::IntLiteral(value))
    }

    fn var(name: &str, index: usize) -> Box<Expr> {
        Box::new(Expr::Identifier {
            name: Identifier::from(name),
            index,
        })
    }

    fn bin(lhs: Box<Expr>, op: BinOp, rhs: Box<Expr>) -> Box<Expr> {
        Box::new(Expr::Binary(lhs, op, rhs))
    }

    #[test]
    fn parameters_bind_by_position() {
        assert_eq!(
            body("def f(a,b) = a + b ;"),
            *bin(var("a", 0), BinOp::Add, var("b", 1))
        );
    }

    #[test]
    fn duplicate_parameters_resolve_to_first() {
        assert_eq!(body("def f(a, a) = a;"), *var("a", 0));
    }

    #[test]
    fn multiplication_binds_tighter() {
        use BinOp::*;

        assert_eq!(
            body("def f() = 2 + 3 * 4 ;"),
            *bin(int(2), Add, bin(int(3), Mul, int(4)))
        );

        assert_eq!(
            body("def f() = 2 * 3 + 4 ;"),
            *bin(bin(int(2), Mul, int(3)), Add, int(4))
        );
    }

    #[test]
    fn same_tier_operators_nest_to_the_right() {
        use BinOp::*;

        assert_eq!(
            body("def f() = 10 - 2 - 3;"),
            *bin(int(10), Sub, bin(int(2), Sub, int(3)))
        );

        assert_eq!(
            body("def f() = 8 / 4 / 2;"),
            *bin(int(8), Div, bin(int(4), Div, int(2)))
        );
    }

    #[test]
    fn additive_right_operand_is_a_full_expression() {
        use BinOp::*;

        assert_eq!(
            body("def f() = 1 + 2 = 3;"),
            *bin(int(1), Add, bin(int(2), Equal, int(3)))
        );

        assert_eq!(
            body("def f(a) = 1 + if a = 0 then 2 else 3;"),
            *bin(
                int(1),
                Add,
                Box::new(Expr::IfThenElse {
                    condition: bin(var("a", 0), Equal, int(0)),
                    then: int(2),
                    otherwise: Some(int(3)),
                })
            )
        );
    }

    #[test]
    fn parentheses_group() {
        use BinOp::*;

        assert_eq!(
            body("def f() = (10 - 2) - 3;"),
            *bin(bin(int(10), Sub, int(2)), Sub, int(3))
        );
    }

    #[test]
    fn conditional_with_and_without_else() {
        assert_eq!(
            body("def f(a) = if a = 1 then 10 else 20 ;"),
            Expr::IfThenElse {
                condition: bin(var("a", 0), BinOp::Equal, int(1)),
                then: int(10),
                otherwise: Some(int(20)),
            }
        );

        assert_eq!(
            body("def f(a) = if a then 10;"),
            Expr::IfThenElse {
                condition: var("a", 0),
                then: int(10),
                otherwise: None,
            }
        );
    }

    #[test]
    fn applications_are_not_resolved() {
        assert_eq!(
            body("def f(y) = undefined(y, 1 + 2, g());"),
            Expr::Application {
                callee: Identifier::from("undefined"),
                args: vec![
                    *var("y", 0),
                    *bin(int(1), BinOp::Add, int(2)),
                    Expr::Application {
                        callee: Identifier::from("g"),
                        args: vec![],
                    },
                ],
            }
        );
    }

    #[test]
    fn definitions_keep_source_order() {
        let program = try_parse("def g(x) = x * 2 ; def f(y) = g(y) + 1 ; def main() = f(5);").unwrap();
        let names: Vec<_> = program
            .iter()
            .map(|definition| definition.name().as_ref().to_string())
            .collect();

        assert_eq!(names, vec!["g", "f", "main"]);
        assert_eq!(program.definitions()[1].parameters()[0].as_ref().as_ref(), "y");
    }

    #[test]
    fn one_definition_per_def_keyword() {
        let text = "def a() = 1; def b(x) = if x = 0 then a() else b(x - 1); def c(p, q) = p / q;";
        let source = Source::new("<test>", text);
        let tokens = lex::tokenize(&source).unwrap();
        let defs = tokens
            .iter()
            .filter(|token| *token.as_ref() == Token::Keyword(Keyword::Def))
            .count();

        assert_eq!(parse(&tokens, source.eof()).unwrap().len(), defs);
    }

    #[test]
    fn empty_input() {
        assert!(try_parse("  \n").unwrap().is_empty());
    }

    #[test]
    fn stack_is_drained_after_each_definition() {
        let source = Source::new("<test>", "def f(a) = if a = 1 then (2 + 3) * a else g(a, 4) ;");
        let tokens = lex::tokenize(&source).unwrap();

        let mut parser = Parser {
            tokens: &tokens,
            cursor: 0,
            eof: source.eof(),
            stack: Vec::new(),
            scope: Vec::new(),
        };

        parser.definition().unwrap();
        assert!(parser.stack.is_empty());
        assert!(parser.scope.is_empty());
    }

    #[test]
    fn scope_does_not_leak_between_definitions() {
        let (error, at) = error("def f(a) = a; def g(b) = a;");
        assert_eq!(error, ParserError::Unbound(Identifier::from("a")));
        assert_eq!(at, "1:26");
    }

    #[test]
    fn excess_arguments_span_the_call() {
        let (location, error) = try_parse("def f() = g(1,2,3,4,5);").unwrap_err().split();
        assert_eq!(error, ParserError::TooManyArguments(Identifier::from("g"), 5));
        assert_eq!(location.to_string(), "<test>:[1:11-1:22]");
    }

    #[test]
    fn missing_close_paren() {
        let (location, error) = try_parse("def f(x = x ;").unwrap_err().split();
        assert_eq!(
            error,
            ParserError::UnexpectedToken(Token::CloseParen, Token::Equals)
        );

        assert_eq!(error.to_string(), "Expected token `)`, found `=` instead");
        assert_eq!(location.to_string(), "<test>:1:9");
    }

    #[test_case("def f(a) = c ;", ParserError::Unbound(Identifier::from("c")), "1:12"; "unbound")]
    #[test_case("def f() = 1", ParserError::MissingToken(Token::Semicolon), "1:12"; "missing semicolon")]
    #[test_case("def f() = ;", ParserError::ExpectedExpr(Token::Semicolon), "1:11"; "missing body")]
    #[test_case("def f() =", ParserError::UnexpectedEof, "1:10"; "eof in body")]
    #[test_case("f() = 1;", ParserError::UnexpectedToken(Token::Keyword(Keyword::Def), Token::Id(Identifier::from("f"))), "1:1"; "missing def")]
    #[test_case("def 1() = 1;", ParserError::ExpectedId(Token::IntLiteral(1)), "1:5"; "bad name")]
    #[test_case("def f() = if 1 else 2;", ParserError::UnexpectedToken(Token::Keyword(Keyword::Then), Token::Keyword(Keyword::Else)), "1:16"; "missing then")]
    #[test_case("def f() = g(1 2);", ParserError::UnexpectedToken(Token::CloseParen, Token::IntLiteral(2)), "1:15"; "missing comma")]
    #[test_case("def f(a,b,c,d,e) = a;", ParserError::TooManyParameters(Identifier::from("f")), "1:15"; "too many parameters")]
    #[test_case("def f() = 1; def printf(a) = a;", ParserError::ReservedName(Identifier::from("printf")), "1:18"; "reserved name")]
    #[test_case("def f() = g(1,2,3,4,5);", ParserError::TooManyArguments(Identifier::from("g"), 5), "1:11"; "too many arguments")]
    fn syntax_errors(text: &str, expected: ParserError, at: &str) {
        assert_eq!(error(text), (expected, at.to_string()));
    }

    #[test]
    fn tree_rendering() {
        let program = try_parse("def f(a) = if a = 1 then g(a, 2) * 3 else 20 ;").unwrap();

        expect![[r#"
            f(a)
            `- IF
               `- cond: EQUAL
               |  `- lhs: a
               |  `- rhs: 1
               `- then: MUL
               |  `- lhs: g
               |  |  `- a
               |  |  `- 2
               |  `- rhs: 3
               `- else: 20
        "#]]
        .assert_eq(&program.to_string());
    }
}
