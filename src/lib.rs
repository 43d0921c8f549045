//! Compilador de definiciones aritméticas a ensamblador AArch64.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente ([`source`]).
//! Este archivo se somete primero a análisis léxico en [`lex`], de
//! lo cual se obtiene un flujo de tokens. El flujo de tokens se
//! dispone en el árbol de [`ast`] por medio de análisis sintáctico en
//! [`parse`], que además resuelve cada parámetro a su posición.
//!
//! # Back end
//! El árbol se recorre una vez por definición para generar un listado
//! de instrucciones AArch64 en [`target`], que luego se escribe como
//! texto ensamblador para Darwin o Linux. El listado puede ejecutarse
//! sin ensamblar en [`emulate`], o bien ensamblarse y enlazarse en
//! [`link`] por medio del driver de C del sistema.

use std::rc::Rc;

#[macro_use]
mod macros;

pub mod ast;
pub mod emulate;
pub mod error;
pub mod lex;
pub mod link;
pub mod parse;
pub mod source;

mod arch;
mod codegen;

/// Emisión de código.
///
/// Este módulo reexporta suficientes ítems internos relacionados a generación de código para
/// traducir un árbol sintáctico a AArch64.
pub mod target {
    pub use crate::arch::{
        ArithOp, Cond, Flavor, Instruction, Label, LabelKind, Reg, MAX_ARGS, PRINTF,
    };

    pub use crate::codegen::{emit, generate, generate_function, FunctionCode, Program, ENTRY_POINT};
}

use error::Diagnostics;
use lex::Token;
use source::{Located, Source};

/// Análisis léxico completo, con errores listos para reportar.
pub fn tokens(source: &Rc<Source>) -> Result<Vec<Located<Token>>, Diagnostics> {
    lex::tokenize(source).map_err(|error| Diagnostics::from(error).kind("Lexical error"))
}

/// Fases delanteras: tokeniza y construye el árbol sintáctico.
pub fn analyze(source: &Rc<Source>) -> Result<ast::Program, Diagnostics> {
    let tokens = tokens(source)?;
    parse::parse(&tokens, source.eof()).map_err(|error| Diagnostics::from(error).kind("Syntax error"))
}

/// Ejecuta las fases delanteras completas y genera código.
///
/// El primer error de cualquier fase detiene la compilación.
pub fn compile(source: &Rc<Source>) -> Result<target::Program, Diagnostics> {
    let ast = analyze(source)?;
    Ok(codegen::generate(&ast))
}
