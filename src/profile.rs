//! Perfiles objetivo.
//!
//! Un mismo programa puede traducirse para simulación en una PC o
//! para un microcontrolador. Los perfiles difieren en la macro de
//! guarda que el código C puede consultar, en la forma del punto de
//! entrada y en la toolchain que construye el ejecutable (ver
//! [`crate::link`]).

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use thiserror::Error;

/// Perfil objetivo de una compilación.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Profile {
    /// Simulación en la plataforma anfitriona ("hosted").
    Pc,

    /// Microcontrolador sin sistema operativo.
    Mcu,
}

#[derive(Error, Debug)]
#[error("Unknown target profile `{0}`, expected `pc` or `mcu`")]
pub struct UnknownProfile(String);

impl Profile {
    /// Macro de preprocesador que identifica al perfil.
    pub fn guard(self) -> &'static str {
        match self {
            Profile::Pc => "TARGET_PC",
            Profile::Mcu => "TARGET_MCU",
        }
    }

    /// Firma del punto de entrada `main`.
    ///
    /// En un microcontrolador `main` nunca retorna, por lo cual
    /// no tiene valor de retorno.
    pub fn entry_signature(self) -> &'static str {
        match self {
            Profile::Pc => "int main(void)",
            Profile::Mcu => "void main(void)",
        }
    }

    /// Sentencia que cierra el cuerpo de `main`, si hace falta.
    pub fn entry_epilogue(self) -> Option<&'static str> {
        match self {
            Profile::Pc => Some("return 0;"),
            Profile::Mcu => None,
        }
    }
}

impl Display for Profile {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Profile::Pc => "pc",
            Profile::Mcu => "mcu",
        })
    }
}

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "pc" => Ok(Profile::Pc),
            "mcu" => Ok(Profile::Mcu),
            _ => Err(UnknownProfile(string.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_parse_by_name() {
        assert_eq!("pc".parse::<Profile>().unwrap(), Profile::Pc);
        assert_eq!("mcu".parse::<Profile>().unwrap(), Profile::Mcu);
        assert_eq!(Profile::Mcu.to_string(), "mcu");

        let error = "esp8266".parse::<Profile>().unwrap_err();
        assert_eq!(
            error.to_string(),
            "Unknown target profile `esp8266`, expected `pc` or `mcu`"
        );
    }
}
