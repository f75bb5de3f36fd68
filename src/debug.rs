//! Datos de depuración.
//!
//! Cada sentencia `DEBUG()` compilada registra un descriptor que indica
//! cómo desplegar los valores que el método deja en la pila. Los
//! descriptores se serializan como:
//!
//! ```text
//! [u16 cantidad] [u16 desplazamiento]* [descriptor]*
//! ```
//!
//! Los desplazamientos se cuentan desde el inicio de los datos.

use crate::ast::{DebugArg, DebugFormat};
use thiserror::Error;

/// Tamaño máximo de los datos de depuración.
pub const DEBUG_LIMIT: usize = 16 * 1024;

const END: u8 = 0x00;
const TEXT: u8 = 0x01;
const VALUE: u8 = 0x40;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DebugError {
    #[error("Too many DEBUG statements, at most {0} are allowed")]
    TooManyRecords(usize),

    #[error("Debug data is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

/// Tabla de descriptores de depuración.
#[derive(Clone, Debug, Default)]
pub struct DebugData {
    records: Vec<Vec<u8>>,
}

impl DebugData {
    pub fn new() -> Self {
        DebugData::default()
    }

    /// Registra un descriptor y retorna su número.
    pub fn add(&mut self, arguments: &[DebugArg]) -> Result<u8, DebugError> {
        let index = self.records.len();
        if index > u8::MAX as usize {
            return Err(DebugError::TooManyRecords(u8::MAX as usize + 1));
        }

        let mut record = Vec::new();
        for argument in arguments {
            match argument {
                DebugArg::Text(text) => {
                    record.push(TEXT);
                    record.extend_from_slice(text.as_bytes());
                    record.push(0);
                }

                DebugArg::Value { format, name, .. } => {
                    record.push(VALUE | format_code(*format) << 2);
                    record.extend_from_slice(name.as_bytes());
                    record.push(0);
                }
            }
        }

        record.push(END);
        self.records.push(record);

        Ok(index as u8)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serializa la tabla, fallando si excede `limit` bytes.
    pub fn serialize(&self, limit: usize) -> Result<Vec<u8>, DebugError> {
        let header = 2 + 2 * self.records.len();
        let size = header + self.records.iter().map(Vec::len).sum::<usize>();

        if size > limit {
            return Err(DebugError::TooLarge { size, limit });
        }

        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&(self.records.len() as u16).to_le_bytes());

        let mut offset = header;
        for record in &self.records {
            out.extend_from_slice(&(offset as u16).to_le_bytes());
            offset += record.len();
        }

        for record in &self.records {
            out.extend_from_slice(record);
        }

        Ok(out)
    }
}

fn format_code(format: DebugFormat) -> u8 {
    match format {
        DebugFormat::Udec => 0,
        DebugFormat::Sdec => 1,
        DebugFormat::Uhex => 2,
        DebugFormat::Ubin => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::Expr, source::Located};

    fn value(name: &str) -> DebugArg {
        DebugArg::Value {
            format: DebugFormat::Uhex,
            expr: Located::at(Expr::id(name), Default::default()),
            name: name.to_string(),
        }
    }

    #[test]
    fn offsets_point_at_records() {
        let mut data = DebugData::new();
        assert_eq!(data.add(&[DebugArg::Text("hi".to_string())]), Ok(0));
        assert_eq!(data.add(&[value("x")]), Ok(1));

        let bytes = data.serialize(DEBUG_LIMIT).unwrap();
        assert_eq!(&bytes[0..2], &[2, 0]);
        assert_eq!(&bytes[2..4], &[6, 0]);
        assert_eq!(&bytes[4..6], &[11, 0]);
        assert_eq!(&bytes[6..11], &[TEXT, b'h', b'i', 0, END]);
        assert_eq!(&bytes[11..], &[VALUE | 2 << 2, b'x', 0, END]);
    }

    #[test]
    fn oversized_data_is_fatal() {
        let mut data = DebugData::new();
        let text = "x".repeat(DEBUG_LIMIT);
        data.add(&[DebugArg::Text(text)]).unwrap();

        assert!(matches!(data.serialize(DEBUG_LIMIT), Err(DebugError::TooLarge { .. })));
    }
}
