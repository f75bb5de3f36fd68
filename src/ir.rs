//! Representación intermedia.
//!
//! Hay dos formas de código antes de la resolución de direcciones:
//!
//! - Líneas de ensamblador ([`AsmLine`]), producidas por bloques `DAT` y
//!   por bloques `ORG`...`END` dentro de métodos. Cada línea puede tener
//!   una etiqueta, la cual es un [`ContextRef`] hacia la tabla de
//!   direcciones ([`Addresses`]).
//!
//! - Árboles de líneas de bytecode ([`MethodBody`]), uno por método. Las
//!   construcciones de control se representan como nodos con hijos, y
//!   los destinos de `break`/`continue` se registran en el nodo que
//!   abre el ciclo. El código se dispone en preorden.

use crate::{
    bytecode::Bytecode,
    expr::{Address, ContextRef, Expression},
    isa::{DataDirective, InstructionObject},
    scope::ScopeId,
    source::Location,
};

use std::rc::Rc;

/// Tabla de direcciones resueltas de líneas de ensamblador.
#[derive(Debug, Default)]
pub struct Addresses {
    table: Vec<Option<Address>>,
}

impl Addresses {
    /// Reserva una entrada sin resolver.
    pub fn alloc(&mut self) -> ContextRef {
        self.table.push(None);
        ContextRef(self.table.len() - 1)
    }

    pub fn get(&self, context: ContextRef) -> Option<Address> {
        self.table.get(context.0).copied().flatten()
    }

    /// Asigna una dirección e indica si cambió respecto a la anterior.
    pub fn set(&mut self, context: ContextRef, address: Address) -> bool {
        let slot = &mut self.table[context.0];
        let changed = *slot != Some(address);
        *slot = Some(address);

        changed
    }
}

/// Contenido de una línea de ensamblador.
#[derive(Debug)]
pub enum LineContent {
    /// Solo etiqueta.
    Empty,
    Instruction(InstructionObject),
    Data(DataDirective),
    File(Rc<[u8]>),
    Res(Expression),
    Align(u32),
    Org(Option<Expression>),
    Orgh(Option<Expression>),
    Orgf(Expression),
    Fit(Option<Expression>),
}

#[derive(Debug)]
pub struct AsmLine {
    pub label: Option<ContextRef>,
    pub scope: ScopeId,
    pub content: LineContent,
    pub location: Location,
}

/// Identificador de una línea dentro de un [`MethodBody`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LineId(usize);

impl LineId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Destino con nombre de una construcción de control.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Break,
    Continue,
}

#[derive(Debug, Default)]
struct LineNode {
    parent: Option<LineId>,
    children: Vec<LineId>,
    code: Vec<Bytecode>,
    targets: Vec<(Target, LineId)>,

    /// Longs que la construcción mantiene en la pila mientras se
    /// ejecutan sus hijos.
    stack: u32,
}

/// Árbol de líneas de un método.
#[derive(Debug)]
pub struct MethodBody {
    lines: Vec<LineNode>,
}

impl MethodBody {
    pub fn new() -> Self {
        MethodBody {
            lines: vec![LineNode::default()],
        }
    }

    pub fn root(&self) -> LineId {
        LineId(0)
    }

    /// Agrega una línea como último hijo de `parent`.
    pub fn add(&mut self, parent: LineId) -> LineId {
        let id = LineId(self.lines.len());
        self.lines.push(LineNode {
            parent: Some(parent),
            ..Default::default()
        });

        self.lines[parent.0].children.push(id);
        id
    }

    /// Crea una línea aún sin ubicar, para usarla como destino de saltos
    /// antes de que exista su contenido.
    pub fn reserve(&mut self) -> LineId {
        self.lines.push(LineNode::default());
        LineId(self.lines.len() - 1)
    }

    /// Ubica una línea reservada como último hijo de `parent`.
    pub fn place(&mut self, parent: LineId, line: LineId) {
        self.lines[line.0].parent = Some(parent);
        self.lines[parent.0].children.push(line);
    }

    pub fn push(&mut self, line: LineId, code: Bytecode) {
        self.lines[line.0].code.push(code);
    }

    pub fn code(&self, line: LineId) -> &[Bytecode] {
        &self.lines[line.0].code
    }

    pub fn code_mut(&mut self, line: LineId) -> &mut [Bytecode] {
        &mut self.lines[line.0].code
    }

    pub fn children(&self, line: LineId) -> &[LineId] {
        &self.lines[line.0].children
    }

    pub fn parent(&self, line: LineId) -> Option<LineId> {
        self.lines[line.0].parent
    }

    pub fn set_target(&mut self, line: LineId, target: Target, destination: LineId) {
        self.lines[line.0].targets.push((target, destination));
    }

    pub fn set_stack(&mut self, line: LineId, longs: u32) {
        self.lines[line.0].stack = longs;
    }

    /// Busca el destino más cercano hacia arriba desde `from`.
    ///
    /// Retorna la línea destino y la cantidad de longs que se deben
    /// descartar de la pila. Un `break` abandona también la pila del
    /// ciclo mismo; un `continue` la conserva.
    pub fn find_target(&self, from: LineId, target: Target) -> Option<(LineId, u32)> {
        let mut pops = 0;
        let mut current = Some(from);

        while let Some(id) = current {
            let node = &self.lines[id.0];
            let found = node
                .targets
                .iter()
                .find(|(kind, _)| *kind == target)
                .map(|&(_, destination)| destination);

            if let Some(destination) = found {
                if target == Target::Break {
                    pops += node.stack;
                }

                return Some((destination, pops));
            }

            pops += node.stack;
            current = node.parent;
        }

        None
    }

    /// Todas las líneas en el orden en que se emiten.
    pub fn order(&self) -> Vec<LineId> {
        let mut order = Vec::with_capacity(self.lines.len());
        let mut pending = vec![self.root()];

        while let Some(line) = pending.pop() {
            order.push(line);
            pending.extend(self.lines[line.0].children.iter().rev());
        }

        order
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.len() <= 1 && self.lines[0].code.is_empty()
    }
}

impl Default for MethodBody {
    fn default() -> Self {
        MethodBody::new()
    }
}
