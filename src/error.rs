//! Diagnósticos de compilación.
//!
//! Las fases del compilador reportan errores fatales por medio de
//! `Result<T, Located<E>>`, donde `E` es el tipo de error propio de la
//! fase. Las advertencias, y los errores que deben acumularse sin
//! detener el análisis, se depositan en un [`Diagnostics`] por cada
//! unidad de compilación. La presencia de al menos un error (incluso
//! anidado) marca a la unidad como fallida.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

/// Severidad de un diagnóstico.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => fmt.write_str("warning"),
            Severity::Error => fmt.write_str("error"),
        }
    }
}

/// Un mensaje con severidad, ubicación opcional y diagnósticos hijos.
///
/// Los hijos permiten agrupar varias violaciones que ocurren en un
/// mismo constructo, por ejemplo todos los valores fuera de rango de
/// una misma directiva `BYTE`.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    severity: Severity,
    message: String,
    location: Option<Location>,
    children: Vec<Diagnostic>,
}

impl Diagnostic {
    /// Construye un error.
    pub fn error<M: Display>(location: Option<Location>, message: M) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.to_string(),
            location,
            children: Vec::new(),
        }
    }

    /// Construye una advertencia.
    pub fn warning<M: Display>(location: Option<Location>, message: M) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(location, message)
        }
    }

    /// Agrega un diagnóstico hijo.
    pub fn with_child(mut self, child: Diagnostic) -> Self {
        self.children.push(child);
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn children(&self) -> &[Diagnostic] {
        &self.children
    }

    /// Determina si este diagnóstico o alguno de sus hijos es un error.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error || self.children.iter().any(Diagnostic::is_error)
    }

    fn leaves<'a>(&'a self, out: &mut Vec<&'a Diagnostic>) {
        if self.children.is_empty() {
            out.push(self);
        } else {
            for child in &self.children {
                child.leaves(out);
            }
        }
    }

    fn write(&self, fmt: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(
            fmt,
            "{:indent$}{}: {}",
            "",
            self.severity,
            self.message,
            indent = depth * 2
        )?;

        if let Some(location) = &self.location {
            writeln!(fmt, "{:indent$} --> {}", "", location, indent = depth * 2)?;
        }

        for child in &self.children {
            child.write(fmt, depth + 1)?;
        }

        Ok(())
    }
}

impl<E: Error> From<Located<E>> for Diagnostic {
    fn from(error: Located<E>) -> Self {
        let (location, error) = error.split();
        Diagnostic::error(Some(location), error)
    }
}

/// Lista de diagnósticos de una unidad de compilación.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    unit: String,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Crea una lista vacía asociada a un nombre de unidad.
    pub fn new<S: Into<String>>(unit: S) -> Self {
        Diagnostics {
            unit: unit.into(),
            entries: Vec::new(),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Agrega un diagnóstico arbitrario.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Warning {
            log::warn!("{}: {}", self.unit, diagnostic.message);
        }

        self.entries.push(diagnostic);
    }

    /// Agrega un error fatal con ubicación.
    pub fn fatal<E: Error>(&mut self, error: Located<E>) {
        self.push(error.into());
    }

    /// Agrega una advertencia.
    pub fn warn<M: Display>(&mut self, location: Option<Location>, message: M) {
        self.push(Diagnostic::warning(location, message));
    }

    /// Absorbe los diagnósticos de otra lista.
    pub fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, diagnostics: I) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(Diagnostic::is_error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnósticos de nivel superior con severidad de error.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|entry| entry.is_error())
    }

    /// Diagnósticos de nivel superior con severidad de advertencia.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|entry| entry.severity == Severity::Warning)
    }

    /// Aplana los diagnósticos compuestos en sus hojas.
    pub fn leaves(&self) -> Vec<&Diagnostic> {
        let mut leaves = Vec::new();
        for entry in &self.entries {
            entry.leaves(&mut leaves);
        }

        leaves
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for entry in &self.entries {
            entry.write(fmt, 0)?;
            writeln!(fmt)?;
        }

        let errors = self.errors().count();
        if errors > 0 {
            let error_or_errors = if errors == 1 { "error" } else { "errors" };
            writeln!(
                fmt,
                "Build of {} failed with {} {}",
                self.unit, errors, error_or_errors
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_error_marks_unit_failed() {
        let mut diagnostics = Diagnostics::new("test");
        let composite = Diagnostic::warning(None, "values out of range")
            .with_child(Diagnostic::error(None, "first"))
            .with_child(Diagnostic::error(None, "second"));

        diagnostics.push(composite);

        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.leaves().len(), 2);
    }

    #[test]
    fn warnings_alone_do_not_fail() {
        let mut diagnostics = Diagnostics::new("test");
        diagnostics.warn(None, "unused method `blink`");

        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warnings().count(), 1);
    }

    #[test]
    fn display_reports_error_count() {
        let mut diagnostics = Diagnostics::new("top");
        diagnostics.push(Diagnostic::error(Some(Location::new("top.spin2", 4, 2)), "boom"));

        let text = diagnostics.to_string();
        assert!(text.contains("error: boom"));
        assert!(text.contains(" --> top.spin2:4:2"));
        assert!(text.contains("Build of top failed with 1 error"));
    }
}
