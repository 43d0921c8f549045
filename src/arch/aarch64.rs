//! Subconjunto de AArch64 que emite el generador de código.
//!
//! # Protocolo de registros
//! - `w8`: acumulador, recibe el resultado de toda expresión.
//! - `w9`: scratch, recibe el operando izquierdo recargado.
//! - `w0`-`w3`: parámetros, por posición.
//! - `x29`/`x30`: frame pointer y link register, preservados alrededor
//!   de cada llamada.

use super::{Flavor, MAX_ARGS, PRINTF};
use std::{
    fmt,
    io::{self, Write},
};

/// Registro de propósito general, en su vista de 32 o 64 bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    W(u8),
    X(u8),
}

impl Reg {
    pub const ACC: Reg = Reg::W(8);
    pub const SCRATCH: Reg = Reg::W(9);
    pub const FP: Reg = Reg::X(29);
    pub const LR: Reg = Reg::X(30);

    /// Registro de argumento para una posición. Debe cumplirse `index < MAX_ARGS`.
    pub fn argument(index: usize) -> Reg {
        debug_assert!(index < MAX_ARGS);
        Reg::W(index as u8)
    }

    /// Secuencia de registros en los que se colocan los argumentos.
    pub fn argument_sequence() -> impl Iterator<Item = Reg> {
        (0..MAX_ARGS as u8).map(Reg::W)
    }

    pub fn number(self) -> u8 {
        match self {
            Reg::W(number) | Reg::X(number) => number,
        }
    }

    /// Vista de 64 bits del mismo registro.
    pub fn wide(self) -> Reg {
        Reg::X(self.number())
    }

    /// Tamaño de la vista, en bytes.
    pub fn size(self) -> u32 {
        match self {
            Reg::W(_) => 4,
            Reg::X(_) => 8,
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::W(number) => write!(formatter, "w{}", number),
            Reg::X(number) => write!(formatter, "x{}", number),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    SDiv,
}

impl ArithOp {
    fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::SDiv => "sdiv",
        }
    }
}

/// Condición de salto, evaluada sobre la bandera Z.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
}

impl fmt::Display for Cond {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Eq => formatter.write_str("eq"),
            Cond::Ne => formatter.write_str("ne"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LabelKind {
    True,
    End,
}

/// Etiqueta local a una función.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label {
    pub kind: LabelKind,
    pub id: u32,
}

/// Una instrucción. Los desplazamientos de memoria son relativos a `sp`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// `movz rd, #imm, lsl #shift`
    MovZ(Reg, u16, u8),

    /// `movk rd, #imm, lsl #shift`
    MovK(Reg, u16, u8),

    Mov(Reg, Reg),

    /// `op rd, rn, rm`
    Arith(ArithOp, Reg, Reg, Reg),

    Cmp(Reg, Reg),
    CmpImm(Reg, u16),

    /// Reserva bytes de stack.
    SubSp(u32),

    /// Libera bytes de stack.
    AddSp(u32),

    Str(Reg, u32),
    Ldr(Reg, u32),
    Stp(Reg, Reg, u32),
    Ldp(Reg, Reg, u32),

    /// `add x29, sp, #offset`
    SetFrame(u32),

    Label(Label),
    B(Label),
    BCond(Cond, Label),

    /// Llamada a una función por nombre.
    Bl(String),

    /// Llamada a `printf` de la biblioteca de C, ajena a las definiciones.
    CallPrintf,

    Ret,
    Brk(u16),

    /// Carga en un registro la dirección de la cadena de formato `"%d\n"`.
    LoadFormat(Reg),
}

/// Nombre de la cadena de formato para cada variante.
pub(crate) fn format_symbol(flavor: Flavor) -> &'static str {
    match flavor {
        Flavor::Darwin => "l_.str",
        Flavor::Linux => ".Lfmt",
    }
}

/// Nombre ensamblado de una etiqueta local.
pub(crate) fn label_symbol(flavor: Flavor, function: &str, label: Label) -> String {
    let kind = match label.kind {
        LabelKind::True => "true",
        LabelKind::End => "end",
    };

    format!("{}{}_{}{}", flavor.local_prefix(), function, kind, label.id)
}

fn address(offset: u32) -> String {
    if offset == 0 {
        String::from("[sp]")
    } else {
        format!("[sp, #{}]", offset)
    }
}

impl Instruction {
    /// Emite la forma textual de la instrucción.
    ///
    /// `function` es la función que contiene a la instrucción, necesaria
    /// para nombrar etiquetas locales.
    pub fn write<W: Write>(&self, output: &mut W, flavor: Flavor, function: &str) -> io::Result<()> {
        use Instruction::*;

        match self {
            MovZ(reg, imm, 0) => emit!(output, "mov", "{}, #{}", reg, imm),
            MovZ(reg, imm, shift) => emit!(output, "movz", "{}, #{}, lsl #{}", reg, imm, shift),
            MovK(reg, imm, shift) => emit!(output, "movk", "{}, #{}, lsl #{}", reg, imm, shift),
            Mov(to, from) => emit!(output, "mov", "{}, {}", to, from),

            Arith(op, rd, rn, rm) => emit!(output, op.mnemonic(), "{}, {}, {}", rd, rn, rm),

            Cmp(rn, rm) => emit!(output, "cmp", "{}, {}", rn, rm),
            CmpImm(rn, imm) => emit!(output, "cmp", "{}, #{}", rn, imm),

            SubSp(bytes) => emit!(output, "sub", "sp, sp, #{}", bytes),
            AddSp(bytes) => emit!(output, "add", "sp, sp, #{}", bytes),

            Str(reg, offset) => emit!(output, "str", "{}, {}", reg, address(*offset)),
            Ldr(reg, offset) => emit!(output, "ldr", "{}, {}", reg, address(*offset)),
            Stp(first, second, offset) => {
                emit!(output, "stp", "{}, {}, {}", first, second, address(*offset))
            }

            Ldp(first, second, offset) => {
                emit!(output, "ldp", "{}, {}, {}", first, second, address(*offset))
            }

            SetFrame(offset) => emit!(output, "add", "x29, sp, #{}", offset),

            Label(label) => writeln!(output, "{}:", label_symbol(flavor, function, *label)),
            B(label) => emit!(output, "b", "{}", label_symbol(flavor, function, *label)),
            BCond(cond, label) => {
                let opcode = format!("b.{}", cond);
                emit!(output, opcode, "{}", label_symbol(flavor, function, *label))
            }

            Bl(target) => emit!(output, "bl", "{}", flavor.symbol(target)),
            CallPrintf => emit!(output, "bl", "{}", flavor.symbol(PRINTF)),
            Ret => emit!(output, "ret"),
            Brk(code) => emit!(output, "brk", "#{:#x}", code),

            LoadFormat(reg) => {
                let reg = reg.wide();
                let symbol = format_symbol(flavor);

                match flavor {
                    Flavor::Darwin => {
                        emit!(output, "adrp", "{}, {}@PAGE", reg, symbol)?;
                        emit!(output, "add", "{}, {}, {}@PAGEOFF", reg, reg, symbol)
                    }

                    Flavor::Linux => {
                        emit!(output, "adrp", "{}, {}", reg, symbol)?;
                        emit!(output, "add", "{}, {}, :lo12:{}", reg, reg, symbol)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(instruction: Instruction, flavor: Flavor) -> String {
        let mut output = Vec::new();
        instruction.write(&mut output, flavor, "f").unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn operands_follow_opcode_column() {
        assert_eq!(text(Instruction::MovZ(Reg::ACC, 7, 0), Flavor::Linux), "\tmov     w8, #7\n");
        assert_eq!(
            text(Instruction::MovK(Reg::ACC, 1, 16), Flavor::Linux),
            "\tmovk    w8, #1, lsl #16\n"
        );
        assert_eq!(text(Instruction::Ret, Flavor::Linux), "\tret\n");
        assert_eq!(
            text(Instruction::Stp(Reg::FP, Reg::LR, 0), Flavor::Linux),
            "\tstp     x29, x30, [sp]\n"
        );
        assert_eq!(
            text(Instruction::Ldr(Reg::W(1), 52), Flavor::Linux),
            "\tldr     w1, [sp, #52]\n"
        );
    }

    #[test]
    fn labels_and_symbols_depend_on_flavor() {
        let label = Label {
            kind: LabelKind::True,
            id: 3,
        };

        assert_eq!(text(Instruction::Label(label), Flavor::Darwin), "Lf_true3:\n");
        assert_eq!(text(Instruction::Label(label), Flavor::Linux), ".Lf_true3:\n");
        assert_eq!(
            text(Instruction::BCond(Cond::Eq, label), Flavor::Linux),
            "\tb.eq    .Lf_true3\n"
        );

        assert_eq!(text(Instruction::Bl("g".into()), Flavor::Darwin), "\tbl      _g\n");
        assert_eq!(text(Instruction::Bl("g".into()), Flavor::Linux), "\tbl      g\n");
        assert_eq!(text(Instruction::CallPrintf, Flavor::Darwin), "\tbl      _printf\n");
    }

    #[test]
    fn format_address() {
        assert_eq!(
            text(Instruction::LoadFormat(Reg::W(0)), Flavor::Darwin),
            "\tadrp    x0, l_.str@PAGE\n\tadd     x0, x0, l_.str@PAGEOFF\n"
        );

        assert_eq!(
            text(Instruction::LoadFormat(Reg::W(0)), Flavor::Linux),
            "\tadrp    x0, .Lfmt\n\tadd     x0, x0, :lo12:.Lfmt\n"
        );
    }

    #[test]
    fn argument_registers() {
        let registers: Vec<_> = Reg::argument_sequence().map(|reg| reg.to_string()).collect();
        assert_eq!(registers, vec!["w0", "w1", "w2", "w3"]);
        assert_eq!(Reg::argument(2), Reg::W(2));
    }
}
