//! Ejecución de código generado sin ensamblar.
//!
//! Este módulo modela la porción de AArch64 que emite el generador de
//! código: registros `x0`-`x30`, `sp`, la bandera Z y un stack
//! direccionable por bytes. Las llamadas se resuelven por nombre contra
//! las funciones del programa; `printf` se modela para la cadena de
//! formato `"%d\n"` según la ABI de la variante indicada.
//!
//! Se utiliza para verificar el protocolo de evaluación y para `--run`.

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::{
    arch::{ArithOp, Cond, Flavor, Instruction, Label, Reg, MAX_ARGS, STACK_ALIGN},
    codegen::{Program, ENTRY_POINT},
};

/// Tamaño del stack emulado.
const STACK_SIZE: u64 = 1 << 20;

/// Dirección inicial de `sp`; el stack crece hacia abajo desde aquí.
const STACK_TOP: u64 = 0x8000_0000;

/// Dirección ficticia de la cadena de formato.
const FORMAT_ADDRESS: u64 = 0x1000;

/// Dirección de retorno que detiene la ejecución.
const HALT: u64 = u64::MAX;

/// Límite por omisión de instrucciones ejecutadas.
pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;

/// Falla de ejecución.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Fault {
    #[error("Undefined symbol `{0}`")]
    UndefinedSymbol(String),

    #[error("Undefined label in function `{0}`")]
    UndefinedLabel(String),

    #[error("Function `{0}` ended without returning")]
    FellThrough(String),

    #[error("Trap `brk #{code:#x}` in function `{function}`")]
    Trap { code: u16, function: String },

    #[error("Stack overflow")]
    StackOverflow,

    #[error("Stack pointer moved by {0} bytes, not a multiple of 16")]
    Misaligned(u32),

    #[error("Memory access out of the stack at {0:#x}")]
    BadAccess(u64),

    #[error("Bad return address {0:#x}")]
    BadReturn(u64),

    #[error("Unsupported call to `printf` with format at {0:#x}")]
    BadFormat(u64),

    #[error("Stack pointer not restored: expected {expected:#x}, found {found:#x}")]
    Unbalanced { expected: u64, found: u64 },

    #[error("Expected at most 4 arguments, got {0}")]
    TooManyArguments(usize),

    #[error("Step limit of {0} instructions exceeded")]
    StepLimit(u64),
}

/// Estado de la máquina emulada.
pub struct Machine<'p> {
    program: &'p Program,
    flavor: Flavor,
    labels: Vec<HashMap<Label, usize>>,
    regs: [u64; 31],
    sp: u64,
    zero: bool,
    stack: Vec<u8>,
    output: String,
    steps: u64,
    step_limit: u64,
}

/// Posición de ejecución: función e índice de instrucción.
#[derive(Copy, Clone)]
struct Pc {
    function: usize,
    index: usize,
}

impl Pc {
    fn encode(self) -> u64 {
        (self.function as u64) << 32 | self.index as u64
    }

    fn decode(address: u64) -> Self {
        Pc {
            function: (address >> 32) as usize,
            index: (address & 0xffff_ffff) as usize,
        }
    }
}

impl<'p> Machine<'p> {
    pub fn new(program: &'p Program, flavor: Flavor) -> Self {
        let labels: Vec<HashMap<Label, usize>> = program
            .functions()
            .iter()
            .map(|function| {
                function
                    .instructions()
                    .iter()
                    .enumerate()
                    .filter_map(|(index, instruction)| match instruction {
                        Instruction::Label(label) => Some((*label, index)),
                        _ => None,
                    })
                    .collect()
            })
            .collect();

        Machine {
            program,
            flavor,
            labels,
            regs: [0; 31],
            sp: STACK_TOP,
            zero: false,
            stack: vec![0; STACK_SIZE as usize],
            output: String::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Cambia el límite de instrucciones ejecutadas por llamada.
    pub fn with_step_limit(self, step_limit: u64) -> Self {
        Machine { step_limit, ..self }
    }

    /// Ejecuta el punto de entrada y retorna lo que imprimió.
    pub fn run_main(&mut self) -> Result<String, Fault> {
        self.call(ENTRY_POINT, &[])?;
        Ok(std::mem::take(&mut self.output))
    }

    /// Invoca una función con argumentos en `w0`-`w3` y retorna su acumulador.
    ///
    /// Falla si `sp` no vuelve a su valor original.
    pub fn call(&mut self, name: &str, args: &[i32]) -> Result<i32, Fault> {
        if args.len() > MAX_ARGS {
            return Err(Fault::TooManyArguments(args.len()));
        }

        let function = self.lookup(name)?;
        for (register, arg) in Reg::argument_sequence().zip(args) {
            self.set(register, *arg as u32 as u64);
        }

        let expected = self.sp;
        self.set(Reg::LR, HALT);
        self.steps = 0;

        let mut pc = Pc { function, index: 0 };
        loop {
            match self.step(pc)? {
                Some(next) => pc = next,
                None => break,
            }
        }

        if self.sp != expected {
            return Err(Fault::Unbalanced {
                expected,
                found: self.sp,
            });
        }

        Ok(self.get(Reg::ACC) as u32 as i32)
    }

    /// Ejecuta una instrucción y determina la siguiente.
    fn step(&mut self, pc: Pc) -> Result<Option<Pc>, Fault> {
        use Instruction::*;

        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(Fault::StepLimit(self.step_limit));
        }

        let program = self.program;
        let function = &program.functions()[pc.function];
        let instruction = function
            .instructions()
            .get(pc.index)
            .ok_or_else(|| Fault::FellThrough(function.name().to_owned()))?;

        let mut next = Pc {
            index: pc.index + 1,
            ..pc
        };

        match instruction {
            MovZ(reg, imm, shift) => self.set(*reg, (*imm as u64) << shift),
            MovK(reg, imm, shift) => {
                let mask = 0xffff_u64 << shift;
                let value = (self.get(*reg) & !mask) | (*imm as u64) << shift;
                self.set(*reg, value);
            }

            Mov(to, from) => self.set(*to, self.get(*from)),

            Arith(op, rd, rn, rm) => {
                let (lhs, rhs) = (self.get(*rn) as u32 as i32, self.get(*rm) as u32 as i32);
                let result = match op {
                    ArithOp::Add => lhs.wrapping_add(rhs),
                    ArithOp::Sub => lhs.wrapping_sub(rhs),
                    ArithOp::Mul => lhs.wrapping_mul(rhs),

                    // AArch64 no falla al dividir entre cero, el resultado es 0
                    ArithOp::SDiv if rhs == 0 => 0,
                    ArithOp::SDiv => lhs.wrapping_div(rhs),
                };

                self.set(*rd, result as u32 as u64);
            }

            Cmp(rn, rm) => self.zero = self.get(*rn) == self.get(*rm),
            CmpImm(rn, imm) => self.zero = self.get(*rn) == *imm as u64,

            SubSp(bytes) => {
                let bytes = self.move_sp(*bytes)?;
                if self.sp - bytes < STACK_TOP - STACK_SIZE {
                    return Err(Fault::StackOverflow);
                }

                self.sp -= bytes;
            }

            AddSp(bytes) => {
                self.sp += self.move_sp(*bytes)?;
                if self.sp > STACK_TOP {
                    return Err(Fault::BadAccess(self.sp));
                }
            }

            Str(reg, offset) => self.store(*reg, self.sp + *offset as u64)?,
            Ldr(reg, offset) => self.load(*reg, self.sp + *offset as u64)?,

            Stp(first, second, offset) => {
                let address = self.sp + *offset as u64;
                self.store(*first, address)?;
                self.store(*second, address + first.size() as u64)?;
            }

            Ldp(first, second, offset) => {
                let address = self.sp + *offset as u64;
                self.load(*first, address)?;
                self.load(*second, address + first.size() as u64)?;
            }

            SetFrame(offset) => self.set(Reg::FP, self.sp + *offset as u64),

            Instruction::Label(_) => (),
            B(label) => next.index = self.target(pc.function, *label)?,
            BCond(cond, label) => {
                let taken = match cond {
                    Cond::Eq => self.zero,
                    Cond::Ne => !self.zero,
                };

                if taken {
                    next.index = self.target(pc.function, *label)?;
                }
            }

            CallPrintf => self.printf()?,
            Bl(target) => {
                self.set(Reg::LR, next.encode());
                next = Pc {
                    function: self.lookup(target)?,
                    index: 0,
                };
            }

            Ret => {
                let address = self.get(Reg::LR);
                if address == HALT {
                    return Ok(None);
                }

                next = Pc::decode(address);
                if next.function >= self.program.functions().len() {
                    return Err(Fault::BadReturn(address));
                }
            }

            Brk(code) => {
                return Err(Fault::Trap {
                    code: *code,
                    function: function.name().to_owned(),
                })
            }

            LoadFormat(reg) => self.set(reg.wide(), FORMAT_ADDRESS),
        }

        Ok(Some(next))
    }

    /// Modelo de `printf("%d\n", value)`.
    fn printf(&mut self) -> Result<(), Fault> {
        let format = self.get(Reg::X(0));
        if format != FORMAT_ADDRESS {
            return Err(Fault::BadFormat(format));
        }

        let value = if self.flavor.variadic_on_stack() {
            let mut bytes = [0; 4];
            bytes.copy_from_slice(self.memory(self.sp, 4)?);
            i32::from_le_bytes(bytes)
        } else {
            self.get(Reg::W(1)) as u32 as i32
        };

        let printed = format!("{}\n", value);
        trace!(value, "printf");

        self.set(Reg::W(0), printed.len() as u64);
        self.output.push_str(&printed);

        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<usize, Fault> {
        self.program
            .functions()
            .iter()
            .position(|function| function.name() == name)
            .ok_or_else(|| Fault::UndefinedSymbol(name.to_owned()))
    }

    fn target(&self, function: usize, label: Label) -> Result<usize, Fault> {
        self.labels[function]
            .get(&label)
            .copied()
            .ok_or_else(|| Fault::UndefinedLabel(self.program.functions()[function].name().to_owned()))
    }

    fn move_sp(&self, bytes: u32) -> Result<u64, Fault> {
        if bytes % STACK_ALIGN != 0 {
            return Err(Fault::Misaligned(bytes));
        }

        Ok(bytes as u64)
    }

    fn get(&self, reg: Reg) -> u64 {
        let value = self.regs[reg.number() as usize];
        match reg {
            Reg::W(_) => value & 0xffff_ffff,
            Reg::X(_) => value,
        }
    }

    /// Las escrituras a la vista de 32 bits limpian la mitad superior.
    fn set(&mut self, reg: Reg, value: u64) {
        self.regs[reg.number() as usize] = match reg {
            Reg::W(_) => value & 0xffff_ffff,
            Reg::X(_) => value,
        };
    }

    fn store(&mut self, reg: Reg, address: u64) -> Result<(), Fault> {
        let bytes = self.get(reg).to_le_bytes();
        let size = reg.size() as usize;

        self.memory_mut(address, size)?
            .copy_from_slice(&bytes[..size]);

        Ok(())
    }

    fn load(&mut self, reg: Reg, address: u64) -> Result<(), Fault> {
        let mut bytes = [0; 8];
        let size = reg.size() as usize;

        bytes[..size].copy_from_slice(self.memory(address, size)?);
        self.set(reg, u64::from_le_bytes(bytes));

        Ok(())
    }

    fn memory(&self, address: u64, size: usize) -> Result<&[u8], Fault> {
        let range = self.stack_range(address, size)?;
        Ok(&self.stack[range])
    }

    fn memory_mut(&mut self, address: u64, size: usize) -> Result<&mut [u8], Fault> {
        let range = self.stack_range(address, size)?;
        Ok(&mut self.stack[range])
    }

    fn stack_range(&self, address: u64, size: usize) -> Result<std::ops::Range<usize>, Fault> {
        let base = STACK_TOP - STACK_SIZE;
        if address < base || address.saturating_add(size as u64) > STACK_TOP {
            return Err(Fault::BadAccess(address));
        }

        let start = (address - base) as usize;
        Ok(start..start + size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codegen, lex, parse, source::Source};
    use pretty_assertions::assert_eq;

    fn compile(text: &str) -> Program {
        let source = Source::new("<test>", text);
        let tokens = lex::tokenize(&source).unwrap();
        let ast = parse::parse(&tokens, source.eof()).unwrap();
        codegen::generate(&ast)
    }

    #[test]
    fn main_prints_through_both_abis() {
        let program = compile("def main() = 6 * 7;");

        for flavor in [Flavor::Darwin, Flavor::Linux] {
            let mut machine = Machine::new(&program, flavor);
            assert_eq!(machine.run_main().unwrap(), "42\n");
        }
    }

    #[test]
    fn missing_else_traps() {
        let program = compile("def f(a) = if a = 1 then 10;");
        let mut machine = Machine::new(&program, Flavor::Linux);

        assert_eq!(machine.call("f", &[1]), Ok(10));
        assert_eq!(
            machine.call("f", &[2]),
            Err(Fault::Trap {
                code: 1,
                function: String::from("f"),
            })
        );
    }

    #[test]
    fn undefined_callee() {
        let program = compile("def f() = g(1);");
        let mut machine = Machine::new(&program, Flavor::Linux);

        assert_eq!(machine.call("f", &[]), Err(Fault::UndefinedSymbol(String::from("g"))));
        assert_eq!(machine.call("h", &[]), Err(Fault::UndefinedSymbol(String::from("h"))));
    }

    #[test]
    fn unbounded_recursion_is_stopped() {
        let program = compile("def f(n) = f(n + 1);");
        let mut machine = Machine::new(&program, Flavor::Linux);

        assert_eq!(machine.call("f", &[0]), Err(Fault::StackOverflow));

        let mut machine = Machine::new(&program, Flavor::Linux).with_step_limit(1000);
        assert_eq!(machine.call("f", &[0]), Err(Fault::StepLimit(1000)));
    }

    #[test]
    fn calls_by_name_never_reach_the_printf_model() {
        let program = compile("def show(a) = printf(a); def main() = 7;");
        let mut machine = Machine::new(&program, Flavor::Linux);

        assert_eq!(machine.call("show", &[3]), Err(Fault::UndefinedSymbol(String::from("printf"))));
        assert_eq!(machine.run_main().unwrap(), "7\n");
    }

    #[test]
    fn division_by_zero_yields_zero() {
        let program = compile("def f(a, b) = a / b;");
        let mut machine = Machine::new(&program, Flavor::Linux);

        assert_eq!(machine.call("f", &[7, 0]), Ok(0));
        assert_eq!(machine.call("f", &[-7, 2]), Ok(-3));
    }

    #[test]
    fn too_many_arguments() {
        let program = compile("def f() = 1;");
        let mut machine = Machine::new(&program, Flavor::Linux);

        assert_eq!(machine.call("f", &[1, 2, 3, 4, 5]), Err(Fault::TooManyArguments(5)));
    }
}
