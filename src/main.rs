//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::{self, bail, Context};
use clap::{self, crate_version, Arg, Command};
use formula::{
    emulate::Machine,
    error::Diagnostics,
    link::{LinkOptions, Linker},
    source::Source,
    target::{self, Flavor},
};

use std::{
    fs::{self, File},
    io::{self, Write},
    str::FromStr,
};

use tracing::{info, Level};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("formula")
        .version(crate_version!())
        .about("Compiles arithmetic function definitions to AArch64 assembly")
        .arg(
            Arg::new("input")
                .value_name("FILE")
                .required(true)
                .help("Source file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .default_value("-")
                .help("Output file ('-' for stdout)"),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .value_name("FLAVOR")
                .takes_value(true)
                .possible_values(["darwin", "linux"])
                .help("Assembler flavor [default: host platform]"),
        )
        .arg(
            Arg::new("emit")
                .long("emit")
                .value_name("STAGE")
                .takes_value(true)
                .default_value("asm")
                .possible_values(["tokens", "ast", "asm"])
                .help("Intermediate result to write"),
        )
        .arg(
            Arg::new("executable")
                .short('x')
                .long("executable")
                .help("Assemble and link an executable instead of writing assembly"),
        )
        .arg(
            Arg::new("strip")
                .short('s')
                .requires("executable")
                .help("Strip executables"),
        )
        .arg(
            Arg::new("run")
                .long("run")
                .conflicts_with("executable")
                .help("Run `main` in the built-in emulator and print its output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Increase log verbosity"),
        )
        .get_matches();

    let level = match args.occurrences_of("verbose") {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_max_level(level)
        .init();

    // Se extraen argumentos necesarios
    let path = args.value_of("input").unwrap();
    let output = args.value_of("output").unwrap();
    let flavor = match args.value_of("target") {
        Some(flavor) => Flavor::from_str(flavor).expect("main.rs allowed a bad target"),
        None => Flavor::native(),
    };

    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read source file: {}", path))?;

    let source = Source::new(path, text);
    info!(%flavor, path, "compiling");

    let emit = args.value_of("emit").unwrap();
    if emit != "asm" && (args.is_present("executable") || args.is_present("run")) {
        bail!("`--emit {}` only applies when writing assembly", emit);
    }

    // Solo fases delanteras
    match emit {
        "tokens" => {
            let tokens = formula::tokens(&source).unwrap_or_else(|diagnostics| fail(diagnostics));

            return write_output(output, |out| {
                for token in &tokens {
                    writeln!(out, "{}\t{}", token.location(), token.as_ref())?;
                }

                Ok(())
            });
        }

        "ast" => {
            let ast = formula::analyze(&source).unwrap_or_else(|diagnostics| fail(diagnostics));
            return write_output(output, |out| write!(out, "{}", ast));
        }

        _ => (),
    }

    let program = formula::compile(&source).unwrap_or_else(|diagnostics| fail(diagnostics));

    match (args.is_present("run"), args.is_present("executable"), output) {
        // Ejecución en el emulador
        (true, _, _) => {
            let printed = Machine::new(&program, flavor)
                .run_main()
                .with_context(|| format!("Execution of `{}` failed", target::ENTRY_POINT))?;

            write_output(output, |out| out.write_all(printed.as_bytes()))?;
        }

        // Salida a stdout con enlazado
        (false, true, "-") => bail!("Refusing to write executable to stdout"),

        // Salida a archivo con enlazado
        (false, true, path) => {
            let mut options = LinkOptions::empty();
            if args.is_present("strip") {
                options |= LinkOptions::STRIP;
            }

            let mut linker = Linker::spawn(&path, options).context("Failed to link")?;
            target::emit(&program, flavor, linker.stdin())
                .context("Failed to emit assembly to assembler")?;

            linker
                .finish()
                .with_context(|| format!("Failed to generate executable: {}", path))?;
        }

        // Salida de ensamblador sin enlazado
        (false, false, _) => {
            write_output(output, |mut out| target::emit(&program, flavor, &mut out))?;
        }
    }

    Ok(())
}

/// Reporta errores de compilación y termina sin emitir salida.
fn fail(diagnostics: Diagnostics) -> ! {
    eprint!("{}", diagnostics);
    std::process::exit(1)
}

/// Escribe a stdout (`-`) o bien a un archivo nuevo.
fn write_output<F>(path: &str, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    match path {
        "-" => {
            let stdout = io::stdout();
            let mut stdout = stdout.lock();

            write(&mut stdout).context("Failed to write to stdout")?;
            stdout.flush().context("Failed to write to stdout")
        }

        path => {
            let mut file = File::create(path)
                .map(io::BufWriter::new)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            write(&mut file).with_context(|| format!("Failed to write to file: {}", path))?;
            file.flush()
                .with_context(|| format!("Failed to write to file: {}", path))
        }
    }
}
