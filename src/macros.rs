/// Genera la enumeración cerrada de mnemónicos a partir de una tabla.
///
/// Cada fila asocia un mnemónico con los bits fijos de su codificación,
/// el esquema de operandos, los efectos permitidos y, para saltos, la
/// codificación alterna que se usa con un operando de registro.
macro_rules! instructions {
    ($($name:ident => $base:expr, $schema:ident, $effects:ident $(, alt $alt:expr)?;)*) => {
        #[allow(clippy::upper_case_acronyms)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum Mnemonic {
            $($name),*
        }

        impl Mnemonic {
            const ALL: &'static [Mnemonic] = &[$(Mnemonic::$name),*];

            /// Codificación y esquema de operandos.
            pub fn encoding(self) -> Encoding {
                match self {
                    $(
                        Mnemonic::$name => Encoding {
                            base: $base,
                            schema: Schema::$schema,
                            effects: Effects::$effects,
                            alternate: instructions!(@alt $($alt)?),
                        },
                    )*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Mnemonic::$name => stringify!($name)),*
                }
            }
        }

        impl std::str::FromStr for Mnemonic {
            type Err = EncodeError;

            fn from_str(name: &str) -> Result<Self, Self::Err> {
                let wanted = unicase::Ascii::new(name);
                Mnemonic::ALL
                    .iter()
                    .copied()
                    .find(|mnemonic| unicase::Ascii::new(mnemonic.name()) == wanted)
                    .ok_or_else(|| EncodeError::UnknownMnemonic(name.to_string()))
            }
        }
    };

    (@alt) => { None };
    (@alt $alt:expr) => { Some($alt) };
}

/// Construye el contexto de ubicación de un error de fase.
macro_rules! located {
    ($location:expr, $error:expr) => {
        crate::source::Located::at($error, ($location).clone())
    };
}
