//! Tabla de símbolos.
//!
//! Los alcances forman una cadena global → objeto → método → bloque. En
//! vez de que cada marco posea a su padre, todos los marcos viven en una
//! arena ([`Scopes`]) y se refieren entre sí por [`ScopeId`]. Cada marco
//! distingue tres tablas: símbolos del usuario, símbolos predefinidos y
//! definiciones de preprocesador.

use crate::{
    ast::Identifier,
    expr::{Address, ContextRef, EvalContext, Expression, NumberLiteral},
};

use std::collections::HashMap;
use thiserror::Error;

/// Direcciones fijas de los registros especiales de un cog.
const REGISTERS: &[(&str, u32)] = &[
    ("IJMP3", 0x1F0),
    ("IRET3", 0x1F1),
    ("IJMP2", 0x1F2),
    ("IRET2", 0x1F3),
    ("IJMP1", 0x1F4),
    ("IRET1", 0x1F5),
    ("PA", 0x1F6),
    ("PB", 0x1F7),
    ("PTRA", 0x1F8),
    ("PTRB", 0x1F9),
    ("DIRA", 0x1FA),
    ("DIRB", 0x1FB),
    ("OUTA", 0x1FC),
    ("OUTB", 0x1FD),
    ("INA", 0x1FE),
    ("INB", 0x1FF),
];

const CONSTANTS: &[(&str, i64)] = &[
    ("TRUE", -1),
    ("FALSE", 0),
    ("POSX", 0x7FFF_FFFF),
    ("NEGX", -0x8000_0000),
];

/// Identificador de un marco de alcance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// Advertencias al registrar símbolos.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScopeWarning {
    #[error("Symbol `{0}` is already defined")]
    Duplicate(Identifier),

    #[error("Symbol `{0}` shadows a preprocessor definition")]
    Definition(Identifier),
}

/// Definición de preprocesador (`#define`).
#[derive(Clone, Debug)]
pub struct Definition {
    pub tokens: Vec<String>,

    /// Valor cuando la definición consta de un solo literal o nombre.
    expression: Option<Expression>,
}

#[derive(Debug, Default)]
struct Frame {
    parent: Option<ScopeId>,
    symbols: HashMap<Identifier, Expression>,
    builtins: HashMap<Identifier, Expression>,
    definitions: HashMap<Identifier, Definition>,
}

/// Arena de marcos de alcance.
#[derive(Debug)]
pub struct Scopes {
    frames: Vec<Frame>,
}

impl Scopes {
    /// Crea la arena con el alcance global y sus símbolos predefinidos.
    pub fn new() -> Self {
        let mut scopes = Scopes {
            frames: vec![Frame::default()],
        };

        let root = scopes.root();
        for &(name, address) in REGISTERS {
            scopes.add_builtin_symbol(root, name.into(), Expression::Register(address));
        }

        for &(name, value) in CONSTANTS {
            scopes.add_builtin_symbol(root, name.into(), Expression::int(value));
        }

        scopes
    }

    /// El alcance global.
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Abre un alcance hijo.
    pub fn push(&mut self, parent: ScopeId) -> ScopeId {
        self.frames.push(Frame {
            parent: Some(parent),
            ..Default::default()
        });

        ScopeId(self.frames.len() - 1)
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.frames[scope.0].parent
    }

    /// Registra o sobrescribe un símbolo.
    ///
    /// El registro siempre ocurre; la advertencia señala que el nombre ya
    /// era alcanzable como símbolo o definición.
    pub fn add_symbol(
        &mut self,
        scope: ScopeId,
        name: Identifier,
        value: Expression,
    ) -> Option<ScopeWarning> {
        let warning = if self.lookup(scope, &name, |frame| &frame.symbols).is_some() {
            Some(ScopeWarning::Duplicate(name.clone()))
        } else if self.get_definition(scope, &name).is_some() {
            Some(ScopeWarning::Definition(name.clone()))
        } else {
            None
        };

        self.frames[scope.0].symbols.insert(name, value);
        warning
    }

    pub fn add_builtin_symbol(&mut self, scope: ScopeId, name: Identifier, value: Expression) {
        self.frames[scope.0].builtins.insert(name, value);
    }

    pub fn has_symbol(&self, scope: ScopeId, name: &Identifier) -> bool {
        self.get_symbol(scope, name).is_some()
    }

    /// Busca un símbolo desde el alcance más interno hacia afuera.
    ///
    /// Dentro de cada marco, los predefinidos tienen prioridad sobre los
    /// símbolos del usuario, y estos sobre las definiciones.
    pub fn get_symbol(&self, scope: ScopeId, name: &Identifier) -> Option<&Expression> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = &self.frames[id.0];
            let found = frame
                .builtins
                .get(name)
                .or_else(|| frame.symbols.get(name))
                .or_else(|| {
                    frame
                        .definitions
                        .get(name)
                        .and_then(|definition| definition.expression.as_ref())
                });

            if found.is_some() {
                return found;
            }

            current = frame.parent;
        }

        None
    }

    /// Registra una definición de preprocesador.
    pub fn add_definition(&mut self, scope: ScopeId, name: Identifier, tokens: Vec<String>) {
        let expression = match tokens.as_slice() {
            [token] => Some(match NumberLiteral::parse(token) {
                Some(literal) => Expression::Number(literal),
                None => Expression::Symbol(scope, Identifier::new(token.as_str())),
            }),

            _ => None,
        };

        let definition = Definition { tokens, expression };
        self.frames[scope.0].definitions.insert(name, definition);
    }

    pub fn is_defined(&self, scope: ScopeId, name: &Identifier) -> bool {
        self.get_definition(scope, name).is_some()
    }

    pub fn get_definition(&self, scope: ScopeId, name: &Identifier) -> Option<&Definition> {
        self.lookup(scope, name, |frame| &frame.definitions)
    }

    /// Libera las tablas de un alcance que ya no se usará.
    ///
    /// El identificador sigue siendo válido, pero el marco queda vacío.
    pub fn release(&mut self, scope: ScopeId) {
        let frame = &mut self.frames[scope.0];
        frame.symbols = HashMap::new();
        frame.builtins = HashMap::new();
        frame.definitions = HashMap::new();
    }

    fn lookup<'a, T, F>(&'a self, scope: ScopeId, name: &Identifier, table: F) -> Option<&'a T>
    where
        F: Fn(&'a Frame) -> &'a HashMap<Identifier, T>,
    {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = &self.frames[id.0];
            if let Some(found) = table(frame).get(name) {
                return Some(found);
            }

            current = frame.parent;
        }

        None
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes::new()
    }
}

impl EvalContext for Scopes {
    fn symbol(&self, scope: ScopeId, name: &Identifier) -> Option<&Expression> {
        self.get_symbol(scope, name)
    }

    fn address(&self, _context: ContextRef) -> Option<Address> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        let method = scopes.push(root);

        assert_eq!(scopes.add_symbol(root, "x".into(), Expression::int(1)), None);

        let warning = scopes.add_symbol(method, "X".into(), Expression::int(2));
        assert_eq!(warning, Some(ScopeWarning::Duplicate("x".into())));

        let x = Identifier::new("x");
        assert_eq!(scopes.get_symbol(method, &x).unwrap().int_value(&scopes), Ok(2));
        assert_eq!(scopes.get_symbol(root, &x).unwrap().int_value(&scopes), Ok(1));
    }

    #[test]
    fn builtins_take_precedence() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        scopes.add_symbol(root, "outa".into(), Expression::int(7));

        let outa = scopes.get_symbol(root, &"OUTA".into()).unwrap();
        assert!(matches!(outa, Expression::Register(0x1FC)));
    }

    #[test]
    fn single_token_definitions_are_expressions() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        scopes.add_definition(root, "LED".into(), vec!["$38".to_string()]);
        scopes.add_definition(root, "EMPTY".into(), Vec::new());

        assert!(scopes.is_defined(root, &"led".into()));
        assert!(scopes.is_defined(root, &"EMPTY".into()));
        assert!(!scopes.has_symbol(root, &"EMPTY".into()));

        let led = scopes.get_symbol(root, &"LED".into()).unwrap();
        assert_eq!(led.int_value(&scopes), Ok(0x38));

        let warning = scopes.add_symbol(root, "led".into(), Expression::int(1));
        assert_eq!(warning, Some(ScopeWarning::Definition("led".into())));
    }

    #[test]
    fn released_scopes_are_empty() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        let block = scopes.push(root);
        scopes.add_symbol(block, "i".into(), Expression::int(0));

        scopes.release(block);
        assert!(!scopes.has_symbol(block, &"i".into()));
        assert!(scopes.has_symbol(block, &"PA".into()));
    }
}
