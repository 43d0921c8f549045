//! Detalles específicos de la arquitectura objetivo.
//!
//! El único objetivo es AArch64 bajo AAPCS64. Las diferencias entre
//! ensambladores (Mach-O en Darwin, ELF en Linux) se limitan a nombres
//! de símbolos, prefijos de etiquetas locales y secciones, y se
//! describen por medio de [`Flavor`].

use std::{
    fmt::{self, Display},
    str::FromStr,
};

mod aarch64;

pub use aarch64::{ArithOp, Cond, Instruction, Label, LabelKind, Reg};
pub(crate) use aarch64::format_symbol;

/// Capacidad del archivo virtual de registros de argumentos.
///
/// Una función no puede declarar más parámetros que esto, ni una
/// llamada pasar más argumentos.
pub const MAX_ARGS: usize = 4;

/// Tamaño natural de un valor, en bytes.
pub const VALUE_SIZE: u32 = 4;

/// Frontera de alineamiento del stack pointer, en bytes.
pub const STACK_ALIGN: u32 = 16;

/// Símbolo externo de formateo que utiliza el punto de entrada.
pub const PRINTF: &str = "printf";

/// Variante de ensamblador y ABI de plataforma.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// macOS/iOS: Mach-O, símbolos con `_`, variádicos en stack.
    Darwin,

    /// Linux: ELF, variádicos en registros.
    Linux,
}

impl Flavor {
    /// Variante correspondiente a la plataforma sobre la que corre el compilador.
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            Flavor::Darwin
        } else {
            Flavor::Linux
        }
    }

    /// Nombre de símbolo global para una función.
    pub fn symbol(self, name: &str) -> String {
        match self {
            Flavor::Darwin => format!("_{}", name),
            Flavor::Linux => name.to_owned(),
        }
    }

    /// Prefijo de etiquetas que el ensamblador no exporta.
    pub fn local_prefix(self) -> &'static str {
        match self {
            Flavor::Darwin => "L",
            Flavor::Linux => ".L",
        }
    }

    /// Determina si los argumentos variádicos se pasan en el stack.
    pub fn variadic_on_stack(self) -> bool {
        matches!(self, Flavor::Darwin)
    }
}

impl Display for Flavor {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Darwin => fmt.write_str("darwin"),
            Flavor::Linux => fmt.write_str("linux"),
        }
    }
}

impl FromStr for Flavor {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "darwin" => Ok(Flavor::Darwin),
            "linux" => Ok(Flavor::Linux),
            _ => Err(()),
        }
    }
}
