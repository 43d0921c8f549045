//! Árbol sintáctico.
//!
//! Cada nodo es dueño exclusivo de sus hijos. El árbol no se modifica
//! luego de que el parser lo construye.

use std::fmt::{self, Display};

use crate::{lex::Identifier, source::Located};

/// Programa completo: definiciones en el orden en que aparecen.
#[derive(Debug)]
pub struct Program(Vec<FunctionDefinition>);

impl Program {
    pub fn new(definitions: Vec<FunctionDefinition>) -> Self {
        Program(definitions)
    }

    pub fn definitions(&self) -> &[FunctionDefinition] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FunctionDefinition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `def name(params...) = body ;`
#[derive(Debug)]
pub struct FunctionDefinition {
    name: Located<Identifier>,
    parameters: Vec<Located<Identifier>>,
    body: Expr,
}

impl FunctionDefinition {
    pub fn new(name: Located<Identifier>, parameters: Vec<Located<Identifier>>, body: Expr) -> Self {
        FunctionDefinition {
            name,
            parameters,
            body,
        }
    }

    pub fn name(&self) -> &Located<Identifier> {
        &self.name
    }

    /// Parámetros en orden de declaración. La posición de cada uno
    /// define el registro de argumento que lo transporta.
    pub fn parameters(&self) -> &[Located<Identifier>] {
        &self.parameters
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    pub fn into_body(self) -> Expr {
        self.body
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Expr {
    IntLiteral(i32),

    /// Lectura de un parámetro, ya resuelto a su posición.
    Identifier { name: Identifier, index: usize },

    Binary(Box<Expr>, BinOp, Box<Expr>),

    IfThenElse {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },

    /// Llamada por nombre. El destino no se resuelve en el parser.
    Application { callee: Identifier, args: Vec<Expr> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Equal,
}

impl Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinOp::Add => "ADD",
            BinOp::Sub => "SUB",
            BinOp::Mul => "MUL",
            BinOp::Div => "DIV",
            BinOp::Equal => "EQUAL",
        };

        fmt.write_str(name)
    }
}

impl Expr {
    fn fmt_tree(&self, fmt: &mut fmt::Formatter<'_>, pad: &str) -> fmt::Result {
        match self {
            Expr::IntLiteral(value) => write!(fmt, "{}", value),
            Expr::Identifier { name, .. } => write!(fmt, "{}", name),

            Expr::Binary(lhs, op, rhs) => {
                write!(fmt, "{}\n{}`- lhs: ", op, pad)?;
                lhs.fmt_tree(fmt, &format!("{}|  ", pad))?;
                write!(fmt, "\n{}`- rhs: ", pad)?;
                rhs.fmt_tree(fmt, &format!("{}   ", pad))
            }

            Expr::IfThenElse {
                condition,
                then,
                otherwise,
            } => {
                let branch_pad = |last| format!("{}{}", pad, if last { "   " } else { "|  " });

                write!(fmt, "IF\n{}`- cond: ", pad)?;
                condition.fmt_tree(fmt, &branch_pad(false))?;
                write!(fmt, "\n{}`- then: ", pad)?;
                then.fmt_tree(fmt, &branch_pad(otherwise.is_none()))?;

                if let Some(otherwise) = otherwise {
                    write!(fmt, "\n{}`- else: ", pad)?;
                    otherwise.fmt_tree(fmt, &branch_pad(true))?;
                }

                Ok(())
            }

            Expr::Application { callee, args } => {
                write!(fmt, "{}", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    let last = i + 1 == args.len();
                    let inner = format!("{}{}", pad, if last { "   " } else { "|  " });

                    write!(fmt, "\n{}`- ", pad)?;
                    arg.fmt_tree(fmt, &inner)?;
                }

                Ok(())
            }
        }
    }
}

impl Display for Expr {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(fmt, "")
    }
}

impl Display for FunctionDefinition {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parameters = self
            .parameters
            .iter()
            .map(|param| param.as_ref().as_ref())
            .collect::<Vec<&str>>()
            .join(",");

        write!(fmt, "{}({})\n`- ", self.name.as_ref(), parameters)?;
        self.body.fmt_tree(fmt, "   ")
    }
}

impl Display for Program {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for definition in self.iter() {
            writeln!(fmt, "{}", definition)?;
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a FunctionDefinition;
    type IntoIter = std::slice::Iter<'a, FunctionDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Program {
    type Item = FunctionDefinition;
    type IntoIter = std::vec::IntoIter<FunctionDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
