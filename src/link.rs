//! Construcción de ejecutables.
//!
//! El código C generado puede compilarse directamente con la toolchain
//! que corresponde a cada perfil. El código se entrega por pipe a la
//! entrada estándar del compilador de C, por lo cual nunca se escribe
//! un archivo `.c` intermedio.

use std::{
    io::{self, BufWriter},
    path::Path,
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
};

use bitflags::bitflags;
use log::debug;
use thiserror::Error;

use crate::profile::Profile;

bitflags! {
    /// Opciones a aplicar durante la construcción.
    pub struct LinkOptions: u32 {
        /// Remover símbolos de depuración del ejecutable final.
        const STRIP = 0x01;
    }
}

/// Un error de compilación o enlazado de C.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LinkerError {
    /// Ocurrió un evento de error de E/S durante la invocación
    /// de comandos externos.
    #[error("I/O error")]
    Io(#[from] io::Error),

    /// El compilador inició su ejecución, pero falló.
    #[error("C toolchain exited with status code {0:?}")]
    Failed(ExitStatus),
}

/// Instancia de la toolchain para un ejecutable definido.
pub struct Linker {
    child: Child,
    stdin: BufWriter<ChildStdin>,
}

impl Linker {
    /// Inicia una instancia de la toolchain.
    ///
    /// Se emitirá un ejecutable en `output`. `include` es el directorio
    /// donde se encuentra `gc_runtime.h`.
    pub fn spawn<O, I>(
        profile: Profile,
        output: &O,
        include: &I,
        opts: LinkOptions,
    ) -> Result<Self, LinkerError>
    where
        O: AsRef<Path>,
        I: AsRef<Path>,
    {
        let params = profile.link_params();

        let mut command = Command::new(params.command);
        command
            .args(params.extra_args)
            .arg("-I")
            .arg(include.as_ref())
            .arg("-o")
            .arg(output.as_ref())
            // El código fuente llega por stdin y no tiene extensión
            .args(&["-xc", "-"])
            .stdin(Stdio::piped());

        if opts.contains(LinkOptions::STRIP) {
            command.arg("-s");
        }

        debug!("Spawning C toolchain: {:?}", command);

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "toolchain stdin is closed"))?;

        Ok(Linker {
            child,
            stdin: BufWriter::new(stdin),
        })
    }

    /// Obtiene la entrada estándar del proceso que espera recibir código C.
    pub fn stdin(&mut self) -> &mut BufWriter<ChildStdin> {
        &mut self.stdin
    }

    /// Indica el fin del flujo de código y espera a la toolchain.
    pub fn finish(self) -> Result<(), LinkerError> {
        let Linker { mut child, stdin } = self;

        // El compilador no termina hasta observar EOF
        stdin.into_inner().map_err(|error| error.into_error())?;

        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(LinkerError::Failed(status))
        }
    }
}

/// Información acerca de la toolchain requerida para cada perfil.
struct Parameters {
    /// Comando del compilador de C.
    command: &'static str,

    /// Argumentos adicionales que se necesitan para este perfil.
    extra_args: &'static [&'static str],
}

impl Profile {
    /// Enumera los detalles de la toolchain por perfil.
    fn link_params(self) -> Parameters {
        match self {
            Profile::Pc => Parameters {
                command: "cc",
                extra_args: &["-std=c11", "-O2"],
            },

            // Sin sistema operativo: newlib con stubs de llamadas al sistema
            Profile::Mcu => Parameters {
                command: "arm-none-eabi-gcc",
                extra_args: &[
                    "-std=c11",
                    "-Os",
                    "-mcpu=cortex-m4",
                    "-mthumb",
                    "--specs=nosys.specs",
                    "-Wl,--gc-sections",
                ],
            },
        }
    }
}
