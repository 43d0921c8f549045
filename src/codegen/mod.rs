//! Generación de código.
//!
//! Cada definición se traduce por separado, recorriendo su árbol una única
//! vez. Toda expresión cumple el mismo protocolo de evaluación: deja su
//! resultado en el acumulador (`w8`) y devuelve `sp` al valor que tenía al
//! iniciar. Solo puede utilizar el registro scratch (`w9`) y espacio de
//! stack reservado y liberado de forma simétrica.
//!
//! No se valida el árbol. Se asume que proviene del parser.

use crate::{
    arch::{
        format_symbol, ArithOp, Cond, Flavor, Instruction, Label, LabelKind, Reg, STACK_ALIGN,
        VALUE_SIZE,
    },
    ast::{self, BinOp, Expr, FunctionDefinition},
};

use std::io::{self, Write};
use tracing::{debug, trace};

/// Nombre reservado del punto de entrada.
pub const ENTRY_POINT: &str = "main";

/// Espacio que reserva cada operación binaria para su operando izquierdo.
const SPILL_FRAME: u32 = STACK_ALIGN;

/// Frame de una llamada: `x29`/`x30`, cuatro registros de argumento y
/// cuatro ranuras de argumentos salientes.
const CALL_FRAME: u32 = 64;

/// Desplazamiento de la primera ranura de argumentos salientes.
const OUTGOING_ARGS: u32 = 48;

/// Frame del punto de entrada: ranura variádica y `x29`/`x30`.
const ENTRY_FRAME: u32 = 32;

/// Código generado para un programa completo.
#[derive(Debug)]
pub struct Program {
    functions: Vec<FunctionCode>,
}

impl Program {
    pub fn functions(&self) -> &[FunctionCode] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&FunctionCode> {
        self.functions.iter().find(|function| function.name == name)
    }

    /// Determina si existe el punto de entrada, y con él la cadena de formato.
    pub fn has_entry(&self) -> bool {
        self.function(ENTRY_POINT).is_some()
    }
}

/// Listado de instrucciones para una función.
#[derive(Debug)]
pub struct FunctionCode {
    name: String,
    instructions: Vec<Instruction>,
}

impl FunctionCode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

/// Genera código para todas las definiciones, en orden de aparición.
pub fn generate(program: &ast::Program) -> Program {
    let functions: Vec<_> = program.iter().map(generate_function).collect();

    let total: usize = functions.iter().map(|f| f.instructions.len()).sum();
    debug!(functions = functions.len(), instructions = total, "code generation complete");

    Program { functions }
}

/// Genera código para una única definición.
pub fn generate_function(definition: &FunctionDefinition) -> FunctionCode {
    let name = definition.name().as_ref().as_ref();
    let mut cx = Context::default();

    if name == ENTRY_POINT {
        cx.entry(definition.body());
    } else {
        cx.eval(definition.body());
        cx.push(Instruction::Ret);
    }

    trace!(name, instructions = cx.instructions.len(), "generated function");
    FunctionCode {
        name: name.to_owned(),
        instructions: cx.instructions,
    }
}

/// Escribe el programa como texto ensamblador.
pub fn emit<W: Write>(program: &Program, flavor: Flavor, output: &mut W) -> io::Result<()> {
    match flavor {
        Flavor::Darwin => emit!(output, ".section", "__TEXT,__text,regular,pure_instructions")?,
        Flavor::Linux => emit!(output, ".text")?,
    }

    for function in &program.functions {
        let symbol = flavor.symbol(&function.name);

        writeln!(output)?;
        emit!(output, ".globl", "{}", symbol)?;
        emit!(output, ".p2align", "2")?;
        writeln!(output, "{}:", symbol)?;

        for instruction in &function.instructions {
            instruction.write(output, flavor, &function.name)?;
        }
    }

    if program.has_entry() {
        writeln!(output)?;
        match flavor {
            Flavor::Darwin => emit!(output, ".section", "__TEXT,__cstring,cstring_literals")?,
            Flavor::Linux => emit!(output, ".section", ".rodata")?,
        }

        writeln!(output, "{}:", format_symbol(flavor))?;
        emit!(output, ".asciz", "\"%d\\n\"")?;
    }

    if let Flavor::Linux = flavor {
        writeln!(output)?;
        emit!(output, ".section", ".note.GNU-stack,\"\",@progbits")?;
    }

    Ok(())
}

/// Estado de generación para una función.
#[derive(Default)]
struct Context {
    instructions: Vec<Instruction>,

    /// Asignador de etiquetas. Cada condicional toma un número nuevo.
    labels: u32,
}

impl Context {
    fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn next_label(&mut self) -> u32 {
        let id = self.labels;
        self.labels += 1;
        id
    }

    /// Punto de entrada: evalúa el cuerpo e imprime el resultado.
    fn entry(&mut self, body: &Expr) {
        use Instruction::*;

        self.push(SubSp(ENTRY_FRAME));
        self.push(Stp(Reg::FP, Reg::LR, 16));
        self.push(SetFrame(16));

        self.eval(body);

        // El valor se ubica tanto en la ranura variádica (Darwin)
        // como en el segundo registro de argumento (Linux)
        self.push(Str(Reg::ACC.wide(), 0));
        self.push(Mov(Reg::argument(1), Reg::ACC));
        self.push(LoadFormat(Reg::argument(0)));
        self.push(CallPrintf);

        self.push(MovZ(Reg::argument(0), 0, 0));
        self.push(Ldp(Reg::FP, Reg::LR, 16));
        self.push(AddSp(ENTRY_FRAME));
        self.push(Ret);
    }

    fn eval(&mut self, expr: &Expr) {
        match expr {
            Expr::IntLiteral(value) => self.load_const(*value),

            Expr::Identifier { index, .. } => {
                self.push(Instruction::Mov(Reg::ACC, Reg::argument(*index)))
            }

            Expr::Binary(lhs, op, rhs) => self.binary(lhs, *op, rhs),

            Expr::IfThenElse {
                condition,
                then,
                otherwise,
            } => self.if_then_else(condition, then, otherwise.as_deref()),

            Expr::Application { callee, args } => self.call(callee.as_ref(), args),
        }
    }

    fn load_const(&mut self, value: i32) {
        let bits = value as u32;
        let (low, high) = (bits as u16, (bits >> 16) as u16);

        self.push(Instruction::MovZ(Reg::ACC, low, 0));
        if high != 0 {
            self.push(Instruction::MovK(Reg::ACC, high, 16));
        }
    }

    fn binary(&mut self, lhs: &Expr, op: BinOp, rhs: &Expr) {
        use Instruction::*;

        self.eval(lhs);
        self.push(SubSp(SPILL_FRAME));
        self.push(Str(Reg::ACC, 0));

        self.eval(rhs);
        self.push(Ldr(Reg::SCRATCH, 0));

        let arith = |op| Arith(op, Reg::ACC, Reg::SCRATCH, Reg::ACC);
        let operation = match op {
            BinOp::Add => arith(ArithOp::Add),
            BinOp::Sub => arith(ArithOp::Sub),
            BinOp::Mul => arith(ArithOp::Mul),
            BinOp::Div => arith(ArithOp::SDiv),

            // Solo se ajustan banderas; el consumidor es un salto condicional
            BinOp::Equal => Cmp(Reg::SCRATCH, Reg::ACC),
        };

        self.push(operation);
        self.push(AddSp(SPILL_FRAME));
    }

    fn if_then_else(&mut self, condition: &Expr, then: &Expr, otherwise: Option<&Expr>) {
        let id = self.next_label();
        let on_true = Label {
            kind: LabelKind::True,
            id,
        };

        let end = Label {
            kind: LabelKind::End,
            id,
        };

        self.eval(condition);
        match condition {
            Expr::Binary(_, BinOp::Equal, _) => self.push(Instruction::BCond(Cond::Eq, on_true)),

            // Cualquier otra condición se compara contra cero
            _ => {
                self.push(Instruction::CmpImm(Reg::ACC, 0));
                self.push(Instruction::BCond(Cond::Ne, on_true));
            }
        }

        match otherwise {
            Some(otherwise) => self.eval(otherwise),
            None => self.push(Instruction::Brk(1)),
        }

        self.push(Instruction::B(end));
        self.push(Instruction::Label(on_true));
        self.eval(then);
        self.push(Instruction::Label(end));
    }

    fn call(&mut self, callee: &str, args: &[Expr]) {
        use Instruction::*;

        let saved = [(Reg::W(0), Reg::W(1)), (Reg::W(2), Reg::W(3))];

        self.push(SubSp(CALL_FRAME));
        self.push(Stp(Reg::FP, Reg::LR, 0));
        for (i, &(first, second)) in saved.iter().enumerate() {
            self.push(Stp(first.wide(), second.wide(), 16 * (i as u32 + 1)));
        }

        // Los argumentos se evalúan en orden hacia ranuras salientes, de
        // modo que ninguno observe registros de argumento ya reemplazados
        for (i, arg) in args.iter().enumerate() {
            self.eval(arg);
            self.push(Str(Reg::ACC, outgoing_slot(i)));
        }

        for (i, register) in Reg::argument_sequence().take(args.len()).enumerate() {
            self.push(Ldr(register, outgoing_slot(i)));
        }

        self.push(Bl(callee.to_owned()));

        for (i, &(first, second)) in saved.iter().enumerate() {
            self.push(Ldp(first.wide(), second.wide(), 16 * (i as u32 + 1)));
        }

        self.push(Ldp(Reg::FP, Reg::LR, 0));
        self.push(AddSp(CALL_FRAME));
    }
}

fn outgoing_slot(index: usize) -> u32 {
    OUTGOING_ARGS + VALUE_SIZE * index as u32
}
