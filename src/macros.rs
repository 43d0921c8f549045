/// Escribe una instrucción con su opcode alineado a una columna fija.
///
/// Siempre queda al menos un espacio entre opcode y operandos.
macro_rules! emit {
    ($output:expr, $opcode:expr) => {
        writeln!($output, "\t{}", $opcode)
    };

    ($output:expr, $opcode:expr, $($format:tt)*) => {{
        write!($output, "\t{:7} ", $opcode)?;
        writeln!($output, $($format)*)
    }};
}
