//! Construcción de ejecutables.
//!
//! Una vez que se ha emitido código ensamblador, este debe ser
//! ensamblado y enlazado contra la biblioteca de C del sistema, que
//! provee `printf` y el arranque del proceso.

use std::{
    ffi::OsStr,
    io::BufWriter,
    path::Path,
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
};

use bitflags::bitflags;
use thiserror::Error;
use tracing::debug;

/// Driver de compilación por omisión.
pub const DEFAULT_DRIVER: &str = "cc";

bitflags! {
    /// Opciones a aplicar durante el enlazado.
    pub struct LinkOptions: u32 {
        /// Remover símbolos de depuración del ejecutable final.
        const STRIP = 0x01;
    }
}

/// Un error de ensamblado o enlazado.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LinkerError {
    /// Ocurrió un evento de error de E/S durante la invocación
    /// de comandos externos.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// El enlazador inició su ejecución, pero falló en enlazar.
    #[error("Linker exited with status code {0:?}")]
    Failed(ExitStatus),
}

/// Instancia del enlazador para un ejecutable definido.
///
/// Las operaciones de ensamblado y enlazado se delegan al driver
/// de C del sistema, que recibe el código por su entrada estándar.
pub struct Linker {
    child: Child,
    stdin: BufWriter<ChildStdin>,
}

impl Linker {
    /// Inicia una instancia del enlazador con el driver por omisión.
    ///
    /// El enlazador tratará de emitir un ejecutable y escribirlo a
    /// la ruta indicada por `output`.
    pub fn spawn<O>(output: &O, opts: LinkOptions) -> Result<Self, LinkerError>
    where
        O: AsRef<Path>,
    {
        Linker::spawn_with(DEFAULT_DRIVER, output, opts)
    }

    /// Igual que [`Linker::spawn()`], con un driver en específico.
    pub fn spawn_with<D, O>(driver: D, output: &O, opts: LinkOptions) -> Result<Self, LinkerError>
    where
        D: AsRef<OsStr>,
        O: AsRef<Path>,
    {
        let mut command = Command::new(driver);
        command
            .arg("-o")
            .arg(output.as_ref())
            .args(&["-x", "assembler", "-"])
            .stdin(Stdio::piped());

        if opts.contains(LinkOptions::STRIP) {
            command.arg("-s");
        }

        debug!(?command, "spawning linker");

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "linker stdin is not piped")
        })?;

        Ok(Linker {
            child,
            stdin: BufWriter::new(stdin),
        })
    }

    /// Obtiene la entrada estándar del proceso que espera recibir ensamblador.
    ///
    /// Luego de crear una instancia con [`Linker::spawn()`], se debe escribir
    /// código ensamblador en la forma exacta en que fue emitido.
    pub fn stdin(&mut self) -> &mut BufWriter<ChildStdin> {
        &mut self.stdin
    }

    /// Indica el fin del flujo de código y finaliza el enlazado.
    pub fn finish(mut self) -> Result<(), LinkerError> {
        // El pipe debe cerrarse antes de esperar al proceso, y este se
        // espera aunque el último flush falle
        let flushed = self.stdin.into_inner().map(drop).map_err(|error| error.into_error());
        let status = self.child.wait()?;
        flushed?;

        if status.success() {
            Ok(())
        } else {
            Err(LinkerError::Failed(status))
        }
    }
}
