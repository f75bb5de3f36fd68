//! Modelo de expresiones.
//!
//! Una [`Expression`] es un árbol de nodos tipados que se evalúa de forma
//! perezosa. El mismo árbol sirve para plegar constantes en tiempo de
//! compilación y para diferir valores que solo se conocen al terminar la
//! resolución de direcciones (etiquetas de `DAT`, índices de métodos).
//!
//! # Aritmética
//! Todas las operaciones enteras se realizan en 64 bits con signo. Las
//! variantes sin signo (`+<`, `+<=`, `+>`, `+>=`, `+/`, `+//`) enmascaran
//! ambos operandos a 32 bits antes de operar. Las operaciones que
//! producen patrones de bits (`>>`, `<<`, `ROR`, `ROL`, `REV`, `DECOD`,
//! `BMASK`, `ZEROX`) entregan el patrón de 32 bits sin signo.
//!
//! # Booleanos
//! Toda expresión booleana produce exactamente `-1` (verdadero) o `0`
//! (falso), nunca `1`.

use crate::{
    ast::{DataType, Identifier},
    scope::ScopeId,
};

use std::{
    cell::Cell,
    fmt::{self, Display},
    rc::Rc,
};

use thiserror::Error;

/// Profundidad máxima al seguir símbolos que refieren a otros símbolos.
const MAX_DEPTH: usize = 64;

/// Error de evaluación.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Expression is not constant: `{0}`")]
    NotConstant(String),

    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("Address is not resolved yet")]
    Unresolved,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("String `{0}` cannot be used as a number")]
    StringValue(String),

    #[error("Operator `{0}` cannot mix integer and float operands")]
    MixedTypes(&'static str),

    #[error("Symbol `{0}` is defined in terms of itself")]
    Recursive(Identifier),
}

/// Valor numérico.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f32),
}

impl Number {
    /// Valor entero, fallando para flotantes.
    pub fn int(self) -> Result<i64, EvalError> {
        match self {
            Number::Int(value) => Ok(value),
            Number::Float(_) => Err(EvalError::MixedTypes("integer")),
        }
    }

    /// Valor de 64 bits tal como se emite; los flotantes se codifican
    /// como IEEE-754 de precisión simple.
    pub fn long(self) -> i64 {
        match self {
            Number::Int(value) => value,
            Number::Float(value) => value.to_bits() as i64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Number::Float(_))
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

/// Literal numérico con la base en que fue escrito.
///
/// La base solo afecta la representación textual, nunca el valor.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NumberLiteral {
    pub value: Number,
    pub base: u32,
}

impl NumberLiteral {
    pub fn new(value: i64, base: u32) -> Self {
        NumberLiteral {
            value: Number::Int(value),
            base,
        }
    }

    pub fn float(value: f32) -> Self {
        NumberLiteral {
            value: Number::Float(value),
            base: 10,
        }
    }

    /// Interpreta un literal: `$1F`, `%1010`, `%%123`, `42`, `1.5`,
    /// opcionalmente con signo y separadores `_`.
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, text) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let (base, digits) = if let Some(digits) = text.strip_prefix("%%") {
            (4, digits)
        } else if let Some(digits) = text.strip_prefix('%') {
            (2, digits)
        } else if let Some(digits) = text.strip_prefix('$') {
            (16, digits)
        } else {
            (10, text)
        };

        let digits: String = digits.chars().filter(|&c| c != '_').collect();
        if digits.is_empty() {
            return None;
        }

        if base == 10 && digits.contains(|c| matches!(c, '.' | 'e' | 'E')) {
            let value: f32 = digits.parse().ok()?;
            let value = if negative { -value } else { value };
            return Some(NumberLiteral::float(value));
        }

        let magnitude = i64::from_str_radix(&digits, base).ok()?;
        let value = if negative { -magnitude } else { magnitude };

        Some(NumberLiteral::new(value, base))
    }
}

impl Display for NumberLiteral {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self.value {
            Number::Float(value) => return write!(fmt, "{:?}", value),
            Number::Int(value) => value,
        };

        if value < 0 {
            fmt.write_str("-")?;
        }

        let magnitude = value.unsigned_abs();
        match self.base {
            2 => write!(fmt, "%{:b}", magnitude),
            4 => write!(fmt, "%%{}", radix(magnitude, 4)),
            16 => write!(fmt, "${:X}", magnitude),
            _ => write!(fmt, "{}", magnitude),
        }
    }
}

fn radix(mut value: u64, base: u64) -> String {
    let mut digits = Vec::new();
    loop {
        digits.push(std::char::from_digit((value % base) as u32, base as u32).unwrap_or('0'));
        value /= base;

        if value == 0 {
            break;
        }
    }

    digits.iter().rev().collect()
}

/// Operadores unarios.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Negate,
    /// `!`
    Not,
    /// `!!`, `NOT`
    LogicalNot,
    Abs,
    Encod,
    Decod,
    Bmask,
    Ones,
    Sqrt,
    /// `FLOAT()`
    Float,
    /// `ROUND()`
    Round,
    /// `TRUNC()`
    Trunc,
    /// `-.`
    FNegate,
    FAbs,
    FSqrt,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        use UnaryOp::*;

        match self {
            Negate => "-",
            Not => "!",
            LogicalNot => "!!",
            Abs => "ABS",
            Encod => "ENCOD",
            Decod => "DECOD",
            Bmask => "BMASK",
            Ones => "ONES",
            Sqrt => "SQRT",
            Float => "FLOAT",
            Round => "ROUND",
            Trunc => "TRUNC",
            FNegate => "-.",
            FAbs => "FABS",
            FSqrt => "FSQRT",
        }
    }
}

/// Operadores binarios.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Shr,
    Shl,
    Sar,
    Ror,
    Rol,
    Rev,
    ZeroX,
    SignX,
    And,
    Xor,
    Or,
    Mul,
    Div,
    /// `+/`
    DivUnsigned,
    /// `//`
    Mod,
    /// `+//`
    ModUnsigned,
    Sca,
    Scas,
    Frac,
    Add,
    Sub,
    /// `#>`
    LimitMin,
    /// `<#`
    LimitMax,
    Less,
    LessUnsigned,
    LessOrEqual,
    LessOrEqualUnsigned,
    Equal,
    NotEqual,
    GreaterOrEqual,
    GreaterOrEqualUnsigned,
    Greater,
    GreaterUnsigned,
    /// `<=>`
    Compare,
    /// `&&`, `AND`
    LogicalAnd,
    /// `^^`, `XOR`
    LogicalXor,
    /// `||`, `OR`
    LogicalOr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FLess,
    FGreater,
    FEqual,
    FNotEqual,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        use BinaryOp::*;

        match self {
            Shr => ">>",
            Shl => "<<",
            Sar => "SAR",
            Ror => "ROR",
            Rol => "ROL",
            Rev => "REV",
            ZeroX => "ZEROX",
            SignX => "SIGNX",
            And => "&",
            Xor => "^",
            Or => "|",
            Mul => "*",
            Div => "/",
            DivUnsigned => "+/",
            Mod => "//",
            ModUnsigned => "+//",
            Sca => "SCA",
            Scas => "SCAS",
            Frac => "FRAC",
            Add => "+",
            Sub => "-",
            LimitMin => "#>",
            LimitMax => "<#",
            Less => "<",
            LessUnsigned => "+<",
            LessOrEqual => "<=",
            LessOrEqualUnsigned => "+<=",
            Equal => "==",
            NotEqual => "<>",
            GreaterOrEqual => ">=",
            GreaterOrEqualUnsigned => "+>=",
            Greater => ">",
            GreaterUnsigned => "+>",
            Compare => "<=>",
            LogicalAnd => "&&",
            LogicalXor => "^^",
            LogicalOr => "||",
            FAdd => "+.",
            FSub => "-.",
            FMul => "*.",
            FDiv => "/.",
            FLess => "<.",
            FGreater => ">.",
            FEqual => "==.",
            FNotEqual => "<>.",
        }
    }

    fn is_float(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            FAdd | FSub | FMul | FDiv | FLess | FGreater | FEqual | FNotEqual
        )
    }
}

/// Manejador diferido de la dirección de una línea.
///
/// Es un índice hacia la tabla de direcciones que el resolvedor llena
/// una vez por convergencia.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextRef(pub usize);

/// Dirección resuelta de una línea.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Address {
    /// Dirección lógica: en longs para cog/LUT, en bytes para hub.
    pub address: i64,

    /// Desplazamiento físico en bytes dentro de la imagen.
    pub object_address: i64,

    pub hub: bool,
}

/// Variable de bloque `VAR`.
#[derive(Debug)]
pub struct Variable {
    pub name: Identifier,
    pub kind: DataType,
    pub count: u32,
    offset: Cell<Option<u32>>,
    usage: Cell<u32>,
}

impl Variable {
    pub fn new(name: Identifier, kind: DataType, count: u32) -> Self {
        Variable {
            name,
            kind,
            count,
            offset: Cell::new(None),
            usage: Cell::new(0),
        }
    }

    /// Tamaño total en bytes.
    pub fn size(&self) -> u32 {
        self.kind.size() * self.count
    }

    /// Desplazamiento en el bloque de variables, asignado al enlazar.
    pub fn offset(&self) -> Option<u32> {
        self.offset.get()
    }

    pub fn set_offset(&self, offset: u32) {
        self.offset.set(Some(offset));
    }

    pub fn mark_used(&self) {
        self.usage.set(self.usage.get() + 1);
    }

    pub fn usage(&self) -> u32 {
        self.usage.get()
    }
}

/// Parámetro, resultado o variable local de un método.
#[derive(Debug)]
pub struct LocalVariable {
    pub name: Identifier,
    pub kind: DataType,
    pub count: u32,

    /// Desplazamiento en bytes dentro del marco del método.
    pub offset: u32,

    usage: Cell<u32>,
}

impl LocalVariable {
    pub fn new(name: Identifier, kind: DataType, count: u32, offset: u32) -> Self {
        LocalVariable {
            name,
            kind,
            count,
            offset,
            usage: Cell::new(0),
        }
    }

    pub fn mark_used(&self) {
        self.usage.set(self.usage.get() + 1);
    }

    pub fn usage(&self) -> u32 {
        self.usage.get()
    }
}

/// Referencia a un método, propio o de un objeto hijo.
#[derive(Debug)]
pub struct MethodRef {
    pub name: Identifier,
    pub parameters: u32,
    pub returns: u32,
    pub public: bool,

    /// Posición del objeto hijo en la tabla de enlaces, si aplica.
    pub object: Option<u32>,

    index: Cell<u32>,
    usage: Cell<u32>,
}

impl MethodRef {
    pub fn new(name: Identifier, parameters: u32, returns: u32, public: bool) -> Self {
        MethodRef {
            name,
            parameters,
            returns,
            public,
            object: None,
            index: Cell::new(0),
            usage: Cell::new(0),
        }
    }

    /// Copia de un método exportado por un objeto hijo.
    pub fn linked(name: Identifier, parameters: u32, returns: u32, object: u32, index: u32) -> Self {
        MethodRef {
            object: Some(object),
            index: Cell::new(index),
            ..MethodRef::new(name, parameters, returns, true)
        }
    }

    /// Índice en la tabla de métodos, asignado al enlazar.
    pub fn index(&self) -> u32 {
        self.index.get()
    }

    pub fn set_index(&self, index: u32) {
        self.index.set(index);
    }

    pub fn mark_used(&self) {
        self.usage.set(self.usage.get() + 1);
    }

    pub fn unmark_used(&self) {
        self.usage.set(self.usage.get().saturating_sub(1));
    }

    pub fn usage(&self) -> u32 {
        self.usage.get()
    }
}

/// Contexto de evaluación.
///
/// Provee búsqueda perezosa de símbolos (lo cual permite referencias
/// hacia adelante) y las direcciones ya resueltas.
pub trait EvalContext {
    /// Busca un símbolo a partir de un marco de alcance.
    fn symbol(&self, scope: ScopeId, name: &Identifier) -> Option<&Expression>;

    /// Dirección resuelta de una línea, si ya se conoce.
    fn address(&self, context: ContextRef) -> Option<Address>;
}

/// Nodo del modelo de expresiones.
#[derive(Clone, Debug)]
pub enum Expression {
    Number(NumberLiteral),
    String(Rc<str>),
    Unary(UnaryOp, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    Ternary(Box<Expression>, Box<Expression>, Box<Expression>),

    /// Símbolo que se busca al evaluar.
    Symbol(ScopeId, Identifier),

    Variable(Rc<Variable>),
    Local(Rc<LocalVariable>),
    Method(Rc<MethodRef>),

    /// Registro de cog con dirección fija.
    Register(u32),

    /// Dirección lógica de una línea.
    Context(ContextRef),

    /// Dirección física (`@label`) de una línea.
    HubAddress(ContextRef),
}

impl Expression {
    pub fn int(value: i64) -> Self {
        Expression::Number(NumberLiteral::new(value, 10))
    }

    /// Evalúa a un número.
    pub fn number(&self, cx: &dyn EvalContext) -> Result<Number, EvalError> {
        self.eval(cx, 0)
    }

    /// Evalúa a un entero.
    pub fn int_value(&self, cx: &dyn EvalContext) -> Result<i64, EvalError> {
        self.number(cx)?.int()
    }

    /// Determina si la expresión puede plegarse en este momento.
    pub fn is_constant(&self, cx: &dyn EvalContext) -> bool {
        self.is_string() || self.number(cx).is_ok()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Expression::String(_))
    }

    pub fn string(&self) -> Option<&str> {
        match self {
            Expression::String(string) => Some(string),
            _ => None,
        }
    }

    /// Dirección de la línea a la que refiere la expresión, siguiendo
    /// símbolos intermedios. Solo aplica a etiquetas.
    pub fn target(&self, cx: &dyn EvalContext) -> Option<Address> {
        let mut current = self;
        for _ in 0..MAX_DEPTH {
            match current {
                Expression::Context(context) | Expression::HubAddress(context) => {
                    return cx.address(*context)
                }

                Expression::Symbol(scope, name) => current = cx.symbol(*scope, name)?,
                _ => return None,
            }
        }

        None
    }

    fn eval(&self, cx: &dyn EvalContext, depth: usize) -> Result<Number, EvalError> {
        match self {
            Expression::Number(literal) => Ok(literal.value),

            // Un carácter suelto vale su código
            Expression::String(string) => {
                let mut bytes = string.bytes();
                match (bytes.next(), bytes.next()) {
                    (Some(byte), None) => Ok(Number::Int(byte as i64)),
                    _ => Err(EvalError::StringValue(string.to_string())),
                }
            }

            Expression::Unary(op, operand) => apply_unary(*op, operand.eval(cx, depth)?),

            Expression::Binary(op, left, right) => {
                apply_binary(*op, left.eval(cx, depth)?, right.eval(cx, depth)?)
            }

            Expression::Ternary(condition, then, otherwise) => {
                if condition.eval(cx, depth)?.int()? != 0 {
                    then.eval(cx, depth)
                } else {
                    otherwise.eval(cx, depth)
                }
            }

            Expression::Symbol(scope, name) => {
                if depth >= MAX_DEPTH {
                    return Err(EvalError::Recursive(name.clone()));
                }

                cx.symbol(*scope, name)
                    .ok_or_else(|| EvalError::Undefined(name.clone()))?
                    .eval(cx, depth + 1)
            }

            Expression::Variable(var) => Err(EvalError::NotConstant(var.name.to_string())),
            Expression::Local(local) => Err(EvalError::NotConstant(local.name.to_string())),
            Expression::Method(method) => Err(EvalError::NotConstant(method.name.to_string())),

            Expression::Register(address) => Ok(Number::Int(*address as i64)),

            Expression::Context(context) => cx
                .address(*context)
                .map(|address| Number::Int(address.address))
                .ok_or(EvalError::Unresolved),

            Expression::HubAddress(context) => cx
                .address(*context)
                .map(|address| Number::Int(address.object_address))
                .ok_or(EvalError::Unresolved),
        }
    }
}

fn bool_value(value: bool) -> i64 {
    if value {
        -1
    } else {
        0
    }
}

fn pattern(value: i64) -> u32 {
    value as u32
}

fn bitmask(bits: i64) -> u32 {
    match bits & 31 {
        31 => u32::MAX,
        bits => (2u32 << bits) - 1,
    }
}

fn float(value: Number, op: &'static str) -> Result<f32, EvalError> {
    match value {
        Number::Float(value) => Ok(value),
        Number::Int(_) => Err(EvalError::MixedTypes(op)),
    }
}

fn integer(value: Number, op: &'static str) -> Result<i64, EvalError> {
    match value {
        Number::Int(value) => Ok(value),
        Number::Float(_) => Err(EvalError::MixedTypes(op)),
    }
}

/// Aplica un operador unario.
pub fn apply_unary(op: UnaryOp, value: Number) -> Result<Number, EvalError> {
    use UnaryOp::*;

    let symbol = op.symbol();
    let result = match (op, value) {
        (Negate | FNegate, Number::Float(value)) => return Ok(Number::Float(-value)),
        (Abs | FAbs, Number::Float(value)) => return Ok(Number::Float(value.abs())),
        (FSqrt, value) => return Ok(Number::Float(float(value, symbol)?.sqrt())),
        (FNegate | FAbs, _) => return Err(EvalError::MixedTypes(symbol)),

        (Float, value) => return Ok(Number::Float(integer(value, symbol)? as f32)),
        (Round, value) => float(value, symbol)?.round() as i64,
        (Trunc, value) => float(value, symbol)?.trunc() as i64,

        (op, value) => {
            let value = integer(value, symbol)?;
            match op {
                Negate => value.wrapping_neg(),
                Not => !value,
                LogicalNot => bool_value(value == 0),
                Abs => value.wrapping_abs(),
                Encod => match pattern(value) {
                    0 => 0,
                    bits => (31 - bits.leading_zeros()) as i64,
                },
                Decod => (1u32 << (value & 31)) as i64,
                Bmask => bitmask(value) as i64,
                Ones => pattern(value).count_ones() as i64,
                Sqrt => (pattern(value) as f64).sqrt() as i64,
                _ => unreachable!(),
            }
        }
    };

    Ok(Number::Int(result))
}

/// Aplica un operador binario.
pub fn apply_binary(op: BinaryOp, left: Number, right: Number) -> Result<Number, EvalError> {
    use BinaryOp::*;

    let symbol = op.symbol();
    if op.is_float() {
        let (l, r) = (float(left, symbol)?, float(right, symbol)?);
        let result = match op {
            FAdd => l + r,
            FSub => l - r,
            FMul => l * r,
            FDiv => l / r,
            FLess => return Ok(Number::Int(bool_value(l < r))),
            FGreater => return Ok(Number::Int(bool_value(l > r))),
            FEqual => return Ok(Number::Int(bool_value(l == r))),
            _ => return Ok(Number::Int(bool_value(l != r))),
        };

        return Ok(Number::Float(result));
    }

    let (l, r) = (integer(left, symbol)?, integer(right, symbol)?);
    let (ul, ur) = (pattern(l), pattern(r));
    let shift = (r & 31) as u32;

    let result = match op {
        Shr => (ul >> shift) as i64,
        Shl => (ul << shift) as i64,
        Sar => ((l as i32) >> shift) as i64,
        Ror => ul.rotate_right(shift) as i64,
        Rol => ul.rotate_left(shift) as i64,
        Rev => (ul.reverse_bits() >> (31 - shift)) as i64,
        ZeroX => (ul & bitmask(r)) as i64,
        SignX => {
            let unused = 31 - shift;
            (((l as i32) << unused) >> unused) as i64
        }

        And => l & r,
        Xor => l ^ r,
        Or => l | r,
        Mul => l.wrapping_mul(r),

        Div | Mod if r == 0 => return Err(EvalError::DivisionByZero),

        // Los operadores sin signo solo ven los 32 bits bajos
        DivUnsigned | ModUnsigned | Frac if ur == 0 => return Err(EvalError::DivisionByZero),

        Div => l.wrapping_div(r),
        Mod => l.wrapping_rem(r),
        DivUnsigned => (ul / ur) as i64,
        ModUnsigned => (ul % ur) as i64,
        Frac => (((ul as u64) << 32) / ur as u64) as u32 as i64,
        Sca => ((ul as u64 * ur as u64) >> 32) as i64,
        Scas => ((l as i32 as i64 * r as i32 as i64) >> 30) as i32 as i64,

        Add => l.wrapping_add(r),
        Sub => l.wrapping_sub(r),
        LimitMin => l.max(r),
        LimitMax => l.min(r),

        Less => bool_value(l < r),
        LessOrEqual => bool_value(l <= r),
        Greater => bool_value(l > r),
        GreaterOrEqual => bool_value(l >= r),
        LessUnsigned => bool_value(ul < ur),
        LessOrEqualUnsigned => bool_value(ul <= ur),
        GreaterUnsigned => bool_value(ul > ur),
        GreaterOrEqualUnsigned => bool_value(ul >= ur),

        // Un mismo long puede tener representaciones distintas en 64 bits
        Equal => bool_value(ul == ur),
        NotEqual => bool_value(ul != ur),

        Compare => match l.cmp(&r) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        },

        LogicalAnd => bool_value(l != 0 && r != 0),
        LogicalXor => bool_value((l != 0) != (r != 0)),
        LogicalOr => bool_value(l != 0 || r != 0),

        FAdd | FSub | FMul | FDiv | FLess | FGreater | FEqual | FNotEqual => unreachable!(),
    };

    Ok(Number::Int(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Empty;

    impl EvalContext for Empty {
        fn symbol(&self, _scope: ScopeId, _name: &Identifier) -> Option<&Expression> {
            None
        }

        fn address(&self, _context: ContextRef) -> Option<Address> {
            None
        }
    }

    fn binary(op: BinaryOp, left: i64, right: i64) -> i64 {
        let expr = Expression::Binary(
            op,
            Box::new(Expression::int(left)),
            Box::new(Expression::int(right)),
        );

        expr.int_value(&Empty).unwrap()
    }

    #[test]
    fn unsigned_compare_masks_to_32_bits() {
        assert_eq!(binary(BinaryOp::GreaterOrEqualUnsigned, -1, 1), -1);
        assert_eq!(binary(BinaryOp::GreaterOrEqual, -1, 1), 0);
        assert_eq!(binary(BinaryOp::LessUnsigned, 1, -1), -1);
    }

    #[test]
    fn booleans_are_minus_one_or_zero() {
        let ops = [
            BinaryOp::Less,
            BinaryOp::Equal,
            BinaryOp::NotEqual,
            BinaryOp::Greater,
            BinaryOp::LogicalAnd,
            BinaryOp::LogicalOr,
            BinaryOp::LogicalXor,
        ];

        for op in ops.iter().copied() {
            for &(l, r) in &[(0, 0), (1, 2), (2, 1), (-5, 7)] {
                let result = binary(op, l, r);
                assert!(result == 0 || result == -1, "{:?} gave {}", op, result);
            }
        }

        let not = apply_unary(UnaryOp::LogicalNot, Number::Int(0)).unwrap();
        assert_eq!(not, Number::Int(-1));
    }

    #[test]
    fn bit_operators() {
        assert_eq!(binary(BinaryOp::Shr, -1, 28), 0xF);
        assert_eq!(binary(BinaryOp::Sar, -16, 2), -4);
        assert_eq!(binary(BinaryOp::Rol, 0x8000_0001, 1), 3);
        assert_eq!(binary(BinaryOp::ZeroX, 0x1FF, 7), 0xFF);
        assert_eq!(binary(BinaryOp::SignX, 0x80, 7), -128);
        assert_eq!(binary(BinaryOp::Rev, 1, 7), 0x80);
        assert_eq!(binary(BinaryOp::LimitMin, 3, 10), 10);
        assert_eq!(binary(BinaryOp::LimitMax, 3, 10), 3);
        assert_eq!(binary(BinaryOp::Frac, 1, 2), 0x8000_0000);
    }

    #[test]
    fn unary_operators() {
        let unary = |op, value| apply_unary(op, Number::Int(value)).unwrap();

        assert_eq!(unary(UnaryOp::Encod, 0x80), Number::Int(7));
        assert_eq!(unary(UnaryOp::Decod, 4), Number::Int(16));
        assert_eq!(unary(UnaryOp::Bmask, 3), Number::Int(15));
        assert_eq!(unary(UnaryOp::Ones, 0xF0F), Number::Int(8));
        assert_eq!(unary(UnaryOp::Sqrt, 1000), Number::Int(31));
    }

    #[test]
    fn division_by_zero_fails() {
        let expr = Expression::Binary(
            BinaryOp::Div,
            Box::new(Expression::int(1)),
            Box::new(Expression::int(0)),
        );

        assert_eq!(expr.number(&Empty), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn unsigned_division_checks_low_32_bits() {
        for op in [BinaryOp::DivUnsigned, BinaryOp::ModUnsigned, BinaryOp::Frac] {
            let result = apply_binary(op, Number::Int(5), Number::Int(1 << 32));
            assert_eq!(result, Err(EvalError::DivisionByZero));
        }

        assert_eq!(binary(BinaryOp::DivUnsigned, 10, (1 << 32) | 3), 3);
        assert_eq!(binary(BinaryOp::ModUnsigned, 10, (1 << 32) | 3), 1);
    }

    #[test]
    fn floats_do_not_mix_with_integer_operators() {
        let result = apply_binary(BinaryOp::Add, Number::Float(1.0), Number::Int(2));
        assert_eq!(result, Err(EvalError::MixedTypes("+")));

        let sum = apply_binary(BinaryOp::FAdd, Number::Float(1.0), Number::Float(0.5));
        assert_eq!(sum, Ok(Number::Float(1.5)));
        assert_eq!(Number::Float(1.0).long(), 0x3F80_0000);
    }

    #[test]
    fn variables_are_not_constant() {
        let var = Rc::new(Variable::new(Identifier::new("x"), DataType::Long, 1));
        let expr = Expression::Variable(var);

        assert!(!expr.is_constant(&Empty));
        assert!(matches!(expr.number(&Empty), Err(EvalError::NotConstant(_))));
    }

    #[test]
    fn single_character_strings_are_numbers() {
        let expr = Expression::String(Rc::from("A"));
        assert_eq!(expr.int_value(&Empty), Ok(65));
        assert!(expr.is_constant(&Empty));
    }

    #[test]
    fn literal_rendering() {
        assert_eq!(NumberLiteral::new(10, 2).to_string(), "%1010");
        assert_eq!(NumberLiteral::new(27, 4).to_string(), "%%123");
        assert_eq!(NumberLiteral::new(255, 16).to_string(), "$FF");
        assert_eq!(NumberLiteral::new(-42, 10).to_string(), "-42");
    }

    proptest! {
        #[test]
        fn literal_round_trip(value in any::<i32>(), base in prop::sample::select(vec![2u32, 4, 10, 16])) {
            let literal = NumberLiteral::new(value as i64, base);
            let parsed = NumberLiteral::parse(&literal.to_string()).unwrap();

            prop_assert_eq!(parsed.value, Number::Int(value as i64));
            prop_assert_eq!(parsed.base, base);
        }
    }
}
