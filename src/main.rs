//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::{bail, Context};
use clap::{crate_version, Arg, Command};
use log::info;
use mcuc::{
    link::{LinkOptions, Linker},
    runtime, CompileOptions, Diagnostics, Profile,
};

use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process,
};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Parsing de CLI
    let args = Command::new("mcuc")
        .version(crate_version!())
        .about("Compiles an annotated Python subset to C")
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .value_name("PROFILE")
                .takes_value(true)
                .default_value("pc")
                .possible_values(["pc", "mcu"])
                .help("Target profile"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Reject programs that need untranslated placeholders"),
        )
        .arg(
            Arg::new("build")
                .short('c')
                .help("Build with the profile toolchain instead of emitting C"),
        )
        .arg(Arg::new("strip").short('s').help("Strip executables"))
        .arg(
            Arg::new("emit-runtime")
                .long("emit-runtime")
                .help("Write the runtime header next to the output file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .takes_value(true)
                .required(true)
                .value_name("FILE")
                .help("Output file ('-' for stdout)"),
        )
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Source file ('-' or absent for stdin)"),
        )
        .get_matches();

    // Se extraen argumentos necesarios
    let profile: Profile = args.value_of("target").unwrap_or("pc").parse()?;
    let build = args.is_present("build");
    let output = args.value_of("output").unwrap_or("-");

    let mut options = CompileOptions::empty();
    if args.is_present("strict") {
        options |= CompileOptions::STRICT;
    }

    let (name, source) = match args.value_of("input") {
        None | Some("-") => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("Failed to read from stdin")?;

            (String::from("<stdin>"), source)
        }

        Some(path) => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("Failed to read source file: {}", path))?;

            (path.to_owned(), source)
        }
    };

    let generated = match mcuc::compile(&source, &name, profile, options) {
        Ok(generated) => generated,
        Err(diagnostics) => {
            eprint!("{}", diagnostics);
            process::exit(1);
        }
    };

    if !generated.warnings().is_empty() {
        let warnings = Diagnostics::from(generated.warnings().to_vec()).kind("warning");
        eprint!("{}", warnings);
    }

    info!("Compiled {} for profile {}", name, profile);

    let include_dir = match output {
        "-" => PathBuf::from("."),
        path => output_dir(Path::new(path)),
    };

    if args.is_present("emit-runtime") || build {
        let header = include_dir.join(runtime::HEADER_NAME);
        fs::write(&header, runtime::HEADER)
            .with_context(|| format!("Failed to write runtime header: {}", header.display()))?;
    }

    match (build, output) {
        // Salida a stdout sin construcción
        (false, "-") => {
            let mut stdout = io::stdout();
            stdout
                .write_all(generated.code().as_bytes())
                .context("Failed to emit to stdout")?;
        }

        // Salida a archivo sin construcción
        (false, path) => {
            fs::write(path, generated.code())
                .with_context(|| format!("Failed to emit to file: {}", path))?;
        }

        // Salida a stdout con construcción
        (true, "-") => bail!("Refusing to write executable to stdout"),

        // Salida a archivo con construcción
        (true, path) => {
            let mut link_options = LinkOptions::empty();
            if args.is_present("strip") {
                link_options |= LinkOptions::STRIP;
            }

            let mut linker = Linker::spawn(profile, &path, &include_dir, link_options)
                .context("Failed to start C toolchain")?;

            linker
                .stdin()
                .write_all(generated.code().as_bytes())
                .context("Failed to emit C to toolchain")?;

            linker
                .finish()
                .with_context(|| format!("Failed to generate executable: {}", path))?;
        }
    };

    Ok(())
}

/// Directorio que contiene a un archivo de salida.
fn output_dir(output: &Path) -> PathBuf {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
