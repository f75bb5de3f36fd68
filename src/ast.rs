//! Árbol sintáctico de entrada.
//!
//! El análisis léxico y sintáctico ocurre fuera de este crate. El parser
//! externo entrega un [`Object`] por cada archivo fuente: una secuencia
//! ordenada de nodos tipados (bloques `CON`, `VAR`, `OBJ`, `DAT`, métodos
//! `PUB`/`PRI` y directivas de preprocesador) donde cada elemento
//! conserva su ubicación original.
//!
//! Las construcciones de control del frontend tipo C (`while`, `for`,
//! `switch`, `break`, `continue`) comparten este mismo árbol, por lo cual
//! el compilador de sentencias no distingue entre dialectos.

use crate::{
    expr::{BinaryOp, NumberLiteral, UnaryOp},
    source::Located,
};

use std::{
    fmt::{self, Display},
    rc::Rc,
};

// Case-insensitive
pub use unicase::Ascii as NoCase;

/// Un identificador.
///
/// Los identificadores del lenguaje no distinguen mayúsculas de
/// minúsculas, por lo cual `OUTA`, `outa` y `OutA` son iguales.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<NoCase<String>>);

impl Identifier {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Identifier(Rc::new(NoCase::new(name.into())))
    }

    /// Une dos identificadores con un punto, como en `serial.start`.
    pub fn qualified(&self, member: &Identifier) -> Identifier {
        Identifier::new(format!("{}.{}", self, member))
    }

    /// Las etiquetas locales de ensamblador comienzan con `.`.
    pub fn is_local_label(&self) -> bool {
        self.as_ref().starts_with('.')
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier::new(name)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(fmt)
    }
}

/// Un archivo fuente ya analizado.
#[derive(Debug)]
pub struct Object {
    pub name: String,
    pub nodes: Vec<Node>,
}

/// Nodo de nivel superior.
#[derive(Debug)]
pub enum Node {
    /// Bloque `CON`.
    Constants(Vec<Located<ConstantDecl>>),

    /// Bloque `VAR`.
    Variables(Vec<Located<VariableDecl>>),

    /// Bloque `OBJ`.
    Objects(Vec<Located<ObjectDecl>>),

    /// Bloque `DAT`.
    Data(Vec<Located<DataLine>>),

    /// Método `PUB` o `PRI`.
    Method(Located<MethodDecl>),

    /// `#define NAME tokens...`
    Define {
        name: Located<Identifier>,
        tokens: Vec<String>,
    },

    /// `#ifdef NAME` / `#ifndef NAME` con sus dos ramas.
    IfDefined {
        name: Identifier,
        negate: bool,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// Tamaño de un dato.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    Byte,
    Word,
    Long,
}

impl DataType {
    /// Tamaño en bytes.
    pub fn size(self) -> u32 {
        match self {
            DataType::Byte => 1,
            DataType::Word => 2,
            DataType::Long => 4,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Byte => fmt.write_str("byte"),
            DataType::Word => fmt.write_str("word"),
            DataType::Long => fmt.write_str("long"),
        }
    }
}

#[derive(Debug)]
pub enum ConstantDecl {
    /// `NAME = expr`
    Assign {
        name: Located<Identifier>,
        value: Located<Expr>,
    },

    /// `#start[step], A, B[step], C`
    Enum {
        start: Option<Located<Expr>>,
        step: Option<Located<Expr>>,
        items: Vec<EnumItem>,
    },
}

#[derive(Debug)]
pub struct EnumItem {
    pub name: Located<Identifier>,
    pub step: Option<Located<Expr>>,
}

#[derive(Debug)]
pub struct VariableDecl {
    pub kind: DataType,
    pub name: Located<Identifier>,
    pub count: Option<Located<Expr>>,
}

/// `alias[count] : "path"`
#[derive(Debug)]
pub struct ObjectDecl {
    pub name: Located<Identifier>,
    pub path: Located<String>,
    pub count: Option<Located<Expr>>,
}

/// Una línea de ensamblador o de datos.
#[derive(Debug, Default)]
pub struct DataLine {
    pub label: Option<Located<Identifier>>,
    pub condition: Option<Located<Identifier>>,
    pub mnemonic: Option<Located<Identifier>>,
    pub operands: Vec<Located<Operand>>,
    pub effect: Option<Located<Identifier>>,
}

/// Prefijo de un operando de ensamblador.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Prefix {
    /// Registro o dirección.
    None,

    /// `#`
    Immediate,

    /// `##`
    LongLiteral,
}

#[derive(Debug)]
pub struct Operand {
    pub prefix: Prefix,

    /// `\`, fuerza direccionamiento absoluto en saltos.
    pub absolute: bool,

    pub value: Located<Expr>,

    /// Repetición en directivas de datos, `value[count]`.
    pub count: Option<Located<Expr>>,

    /// Tamaño explícito de un valor, como en `byte 1, word 2`.
    pub size: Option<DataType>,
}

impl Operand {
    pub fn new(prefix: Prefix, value: Located<Expr>) -> Self {
        Operand {
            prefix,
            absolute: false,
            value,
            count: None,
            size: None,
        }
    }
}

#[derive(Debug)]
pub struct MethodDecl {
    pub public: bool,
    pub name: Located<Identifier>,
    pub parameters: Vec<Located<Identifier>>,
    pub results: Vec<Located<Identifier>>,
    pub locals: Vec<LocalDecl>,
    pub body: Vec<Located<Statement>>,
}

#[derive(Debug)]
pub struct LocalDecl {
    pub kind: DataType,
    pub name: Located<Identifier>,
    pub count: Option<Located<Expr>>,
}

#[derive(Debug)]
pub enum Statement {
    /// `if`/`ifnot`, `elseif`/`elseifnot` y `else`.
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Located<Statement>>>,
    },

    /// `repeat while`/`repeat until` y sus formas post-condicionadas
    /// (`do ... while` en el frontend tipo C).
    While {
        condition: Located<Expr>,
        until: bool,
        post: bool,
        body: Vec<Located<Statement>>,
    },

    /// `repeat` infinito o `repeat count`.
    Repeat {
        count: Option<Located<Expr>>,
        body: Vec<Located<Statement>>,
    },

    /// `repeat var from a to b step s`
    RepeatRange {
        variable: Located<Expr>,
        from: Located<Expr>,
        to: Located<Expr>,
        step: Option<Located<Expr>>,
        body: Vec<Located<Statement>>,
    },

    /// `for (init; condition; step)`
    For {
        init: Vec<Located<Statement>>,
        condition: Option<Located<Expr>>,
        step: Vec<Located<Statement>>,
        body: Vec<Located<Statement>>,
    },

    /// `case`/`switch`.
    ///
    /// Con `breakable`, un `break` dentro de los casos abandona el
    /// `switch` (frontend tipo C); de lo contrario se refiere al ciclo
    /// exterior.
    Switch {
        value: Located<Expr>,
        cases: Vec<Case>,
        default: Option<Vec<Located<Statement>>>,
        breakable: bool,
    },

    /// `quit`/`break`
    Break,

    /// `next`/`continue`
    Continue,

    Return(Option<Located<Expr>>),

    Abort(Option<Located<Expr>>),

    /// `target := value` o `target op= value`.
    Assign {
        target: Located<Expr>,
        op: Option<BinaryOp>,
        value: Located<Expr>,
    },

    /// Expresión evaluada por sus efectos, típicamente una llamada.
    Expression(Located<Expr>),

    /// `org` ... `end` dentro de un método.
    InlineAsm(Vec<Located<DataLine>>),

    /// `debug(...)`
    Debug(Vec<DebugArg>),
}

#[derive(Debug)]
pub struct Branch {
    pub condition: Located<Expr>,
    pub negate: bool,
    pub body: Vec<Located<Statement>>,
}

#[derive(Debug)]
pub struct Case {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Located<Statement>>,
}

#[derive(Debug)]
pub enum CaseLabel {
    Value(Located<Expr>),
    Range(Located<Expr>, Located<Expr>),
}

#[derive(Debug)]
pub enum DebugArg {
    Text(String),
    Value {
        format: DebugFormat,
        expr: Located<Expr>,
        name: String,
    },
}

/// Formato de despliegue de un valor en `debug()`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugFormat {
    Udec,
    Sdec,
    Uhex,
    Ubin,
}

#[derive(Debug)]
pub enum Expr {
    Literal(NumberLiteral),
    String(String),
    Id(Identifier),

    /// `alias.CONSTANT` o `alias[i].CONSTANT`
    Member {
        object: Located<Identifier>,
        index: Option<Box<Located<Expr>>>,
        member: Located<Identifier>,
    },

    /// `name[index]`
    Index {
        base: Located<Identifier>,
        index: Box<Located<Expr>>,
    },

    Unary(UnaryOp, Box<Located<Expr>>),
    Binary(Box<Located<Expr>>, BinaryOp, Box<Located<Expr>>),
    Ternary(Box<Located<Expr>>, Box<Located<Expr>>, Box<Located<Expr>>),

    /// `@name`
    AddressOf(Box<Located<Expr>>),

    /// `method(args)`, `alias.method(args)` o `alias[i].method(args)`.
    Call {
        object: Option<Located<Identifier>>,
        index: Option<Box<Located<Expr>>>,
        method: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },
}

impl Expr {
    /// Literal entero decimal.
    pub fn number(value: i64) -> Self {
        Expr::Literal(NumberLiteral::new(value, 10))
    }

    pub fn id(name: &str) -> Self {
        Expr::Id(Identifier::new(name))
    }
}
