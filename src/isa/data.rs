//! Directivas de datos y de control de direcciones.

use super::EncodeError;
use crate::{
    ast::DataType,
    expr::{EvalContext, Expression},
    source::Located,
};

use std::str::FromStr;

/// Directiva de ensamblador que no es una instrucción.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    Byte,
    Word,
    Long,
    File,
    Res,
    AlignW,
    AlignL,
    Org,
    Orgh,
    Orgf,
    Fit,
}

impl FromStr for Directive {
    type Err = EncodeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        const NAMES: &[(&str, Directive)] = &[
            ("BYTE", Directive::Byte),
            ("WORD", Directive::Word),
            ("LONG", Directive::Long),
            ("FILE", Directive::File),
            ("RES", Directive::Res),
            ("ALIGNW", Directive::AlignW),
            ("ALIGNL", Directive::AlignL),
            ("ORG", Directive::Org),
            ("ORGH", Directive::Orgh),
            ("ORGF", Directive::Orgf),
            ("FIT", Directive::Fit),
        ];

        let wanted = unicase::Ascii::new(name);
        NAMES
            .iter()
            .find(|(directive, _)| unicase::Ascii::new(*directive) == wanted)
            .map(|&(_, directive)| directive)
            .ok_or_else(|| EncodeError::UnknownMnemonic(name.to_string()))
    }
}

/// Un valor de `BYTE`/`WORD`/`LONG`, posiblemente repetido.
#[derive(Clone, Debug)]
pub struct DataValue {
    pub value: Expression,
    pub count: Option<Expression>,

    /// Tamaño explícito que reemplaza al de la directiva.
    pub size: Option<DataType>,
}

/// Directiva `BYTE`, `WORD` o `LONG`.
#[derive(Clone, Debug)]
pub struct DataDirective {
    pub kind: DataType,
    pub values: Vec<Located<DataValue>>,
}

impl DataDirective {
    /// Tamaño en bytes. Las repeticiones deben ser constantes.
    pub fn size(&self, cx: &dyn EvalContext) -> Result<u32, Located<EncodeError>> {
        let mut size = 0;
        for value in &self.values {
            let count = repetitions(value, cx)?;
            let width = value.val().size.unwrap_or(self.kind).size();
            let elements = match value.val().value.string() {
                Some(string) => string.len() as u32,
                None => 1,
            };

            size += count * width * elements;
        }

        Ok(size)
    }

    /// Emite los bytes de la directiva.
    ///
    /// Todos los valores se emiten aunque alguno esté fuera de rango;
    /// las violaciones se reúnen en vez de detenerse en la primera.
    pub fn bytes(&self, cx: &dyn EvalContext) -> Result<Vec<u8>, Vec<Located<EncodeError>>> {
        let mut bytes = Vec::new();
        let mut errors = Vec::new();

        for located in &self.values {
            let value = located.val();
            let kind = value.size.unwrap_or(self.kind);

            let count = match repetitions(located, cx) {
                Ok(count) => count,
                Err(error) => {
                    errors.push(error);
                    continue;
                }
            };

            let elements = match value.value.string() {
                Some(string) => string.bytes().map(i64::from).collect(),
                None => match value.value.number(cx) {
                    Ok(number) => vec![number.long()],
                    Err(error) => {
                        errors.push(Located::at(error.into(), located.location().clone()));
                        continue;
                    }
                },
            };

            for element in elements {
                if let Err(error) = check_range(kind, element) {
                    errors.push(Located::at(error, located.location().clone()));
                }

                for _ in 0..count {
                    bytes.extend_from_slice(&element.to_le_bytes()[..kind.size() as usize]);
                }
            }
        }

        if errors.is_empty() {
            Ok(bytes)
        } else {
            Err(errors)
        }
    }
}

fn repetitions(value: &Located<DataValue>, cx: &dyn EvalContext) -> Result<u32, Located<EncodeError>> {
    let count = match &value.val().count {
        None => return Ok(1),
        Some(count) => count.int_value(cx),
    };

    match count {
        Ok(count) if (0..=u32::MAX as i64).contains(&count) => Ok(count as u32),
        Ok(count) => Err(Located::at(
            EncodeError::ValueOutOfRange {
                value: count,
                range: "0..$FFFFFFFF",
            },
            value.location().clone(),
        )),

        Err(error) => Err(Located::at(error.into(), value.location().clone())),
    }
}

/// Verifica que un valor quepa en el tamaño de dato.
pub fn check_range(kind: DataType, value: i64) -> Result<(), EncodeError> {
    let (range, text) = match kind {
        DataType::Byte => (-0x80..=0xFF, "-0x80..0xFF"),
        DataType::Word => (-0x8000..=0xFFFF, "-0x8000..0xFFFF"),
        DataType::Long => return Ok(()),
    };

    if range.contains(&value) {
        Ok(())
    } else {
        Err(EncodeError::ValueOutOfRange { value, range: text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scope::Scopes, source::Location};
    use std::rc::Rc;

    fn value(value: Expression) -> Located<DataValue> {
        Located::at(
            DataValue {
                value,
                count: None,
                size: None,
            },
            Location::default(),
        )
    }

    #[test]
    fn each_out_of_range_value_is_reported() {
        let scopes = Scopes::new();
        let directive = DataDirective {
            kind: DataType::Byte,
            values: vec![value(Expression::int(300)), value(Expression::int(400))],
        };

        let errors = directive.bytes(&scopes).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[0].val(),
            &EncodeError::ValueOutOfRange {
                value: 300,
                range: "-0x80..0xFF"
            }
        );
    }

    #[test]
    fn strings_counts_and_overrides() {
        let scopes = Scopes::new();
        let repeated = value(Expression::int(-1)).map(|mut value| {
            value.count = Some(Expression::int(3));
            value
        });

        let long = value(Expression::int(0x1234_5678)).map(|mut value| {
            value.size = Some(DataType::Long);
            value
        });

        let directive = DataDirective {
            kind: DataType::Byte,
            values: vec![value(Expression::String(Rc::from("Hi"))), repeated, long],
        };

        assert_eq!(directive.size(&scopes).unwrap(), 9);
        assert_eq!(
            directive.bytes(&scopes).unwrap(),
            vec![b'H', b'i', 0xFF, 0xFF, 0xFF, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn directive_names_ignore_case() {
        assert_eq!("alignl".parse::<Directive>(), Ok(Directive::AlignL));
        assert_eq!("OrgH".parse::<Directive>(), Ok(Directive::Orgh));
    }
}
