//! Bytecode del intérprete.
//!
//! Los métodos se compilan a un bytecode de pila. Cada instrucción es un
//! opcode de un byte seguido opcionalmente de operandos en formato
//! `rfvar` (entero sin signo de longitud variable, 7 bits por byte con
//! bit de continuación) o `rfvars` (la variante con signo).
//!
//! El tamaño de un salto depende de la distancia a su destino, y la
//! distancia depende a su vez del tamaño de todo lo que está entre
//! ambos. Por esto los tamaños se recalculan en cada iteración del
//! resolvedor de métodos hasta que nada cambie.
//!
//! La numeración de [`Op`] es propia de este crate y no coincide con la
//! del intérprete de la ROM del P2.

use crate::{
    ast::DataType,
    expr::{EvalContext, EvalError, Expression, LocalVariable, MethodRef, Variable},
    ir::LineId,
    isa::EncodeError,
};

use std::rc::Rc;

/// Opcodes del intérprete.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Marco de llamada cuyo resultado se descarta.
    Anchor = 0x00,
    /// Marco de llamada cuyo resultado queda en la pila.
    AnchorPush = 0x01,
    AnchorTrap = 0x02,
    AnchorTrapPush = 0x03,
    ReturnResults = 0x04,
    ReturnArgs = 0x05,
    Abort = 0x06,
    AbortArg = 0x07,
    CallObjSub = 0x08,
    CallObjiSub = 0x09,
    CallSub = 0x0A,

    Jmp = 0x12,
    Jz = 0x13,
    Jnz = 0x14,
    Tjz = 0x15,
    Djnz = 0x16,
    Pop = 0x17,

    CaseValue = 0x1C,
    CaseRange = 0x1D,
    CaseDone = 0x1E,

    FLess = 0x20,
    FGreater = 0x21,
    FEqual = 0x22,
    FNotEqual = 0x23,

    /// Empuja una dirección relativa, usada como salida de `case`.
    PushTarget = 0x27,
    Inline = 0x28,
    Debug = 0x29,
    RepeatVarInit = 0x2A,
    RepeatVarLoop = 0x2B,

    ConByte = 0x40,
    ConByteNot = 0x41,
    ConWord = 0x42,
    ConWordNot = 0x43,
    ConLong = 0x44,
    ConDecod = 0x45,
    ConDecodNot = 0x46,
    ConBmask = 0x47,
    ConBmaskNot = 0x48,

    SetupReg = 0x49,

    Neg = 0x60,
    BitNot = 0x61,
    LogNot = 0x62,
    Abs = 0x63,
    Encod = 0x64,
    Decod = 0x65,
    Bmask = 0x66,
    Ones = 0x67,
    Sqrt = 0x68,
    Shr = 0x69,
    Shl = 0x6A,
    Sar = 0x6B,
    Ror = 0x6C,
    Rol = 0x6D,
    Rev = 0x6E,
    ZeroX = 0x6F,
    SignX = 0x70,
    Add = 0x71,
    Sub = 0x72,
    Mul = 0x73,
    Div = 0x74,
    DivU = 0x75,
    Rem = 0x76,
    RemU = 0x77,
    BitAnd = 0x78,
    BitOr = 0x79,
    BitXor = 0x7A,
    LogAnd = 0x7B,
    LogOr = 0x7C,
    LogXor = 0x7D,
    LimitMin = 0x7E,
    LimitMax = 0x7F,

    Read = 0x80,
    Write = 0x81,
    WritePush = 0x82,
    Address = 0x83,
    Float = 0x84,
    Round = 0x85,
    Trunc = 0x86,

    FNeg = 0x88,
    FAbs = 0x89,
    FSqrt = 0x8A,
    FAdd = 0x8B,
    FSub = 0x8C,
    FMul = 0x8D,
    FDiv = 0x8E,

    Lt = 0x90,
    LtU = 0x91,
    Lte = 0x92,
    LteU = 0x93,
    Eq = 0x94,
    Ne = 0x95,
    Gte = 0x96,
    GteU = 0x97,
    Gt = 0x98,
    GtU = 0x99,
    Compare = 0x9A,
    Sca = 0x9B,
    Scas = 0x9C,
    Frac = 0x9D,
}

/// Constantes de -1 a 14 en un solo byte.
const CON_SMALL: u8 = 0xA0;

/// Setup de variables por base y tamaño; los indexados siguen a
/// continuación.
const SETUP_BASE: u8 = 0x4A;
const SETUP_INDEXED: u8 = SETUP_BASE + 9;

const SETUP_VBASE_FAST: u8 = 0xB0;
const SETUP_DBASE_FAST: u8 = 0xC0;
const READ_LOCAL_FAST: u8 = 0xD0;
const WRITE_LOCAL_FAST: u8 = 0xE0;

impl Op {
    pub fn unary(op: crate::expr::UnaryOp) -> Op {
        use crate::expr::UnaryOp::*;

        match op {
            Negate => Op::Neg,
            Not => Op::BitNot,
            LogicalNot => Op::LogNot,
            Abs => Op::Abs,
            Encod => Op::Encod,
            Decod => Op::Decod,
            Bmask => Op::Bmask,
            Ones => Op::Ones,
            Sqrt => Op::Sqrt,
            Float => Op::Float,
            Round => Op::Round,
            Trunc => Op::Trunc,
            FNegate => Op::FNeg,
            FAbs => Op::FAbs,
            FSqrt => Op::FSqrt,
        }
    }

    pub fn binary(op: crate::expr::BinaryOp) -> Op {
        use crate::expr::BinaryOp::*;

        match op {
            Shr => Op::Shr,
            Shl => Op::Shl,
            Sar => Op::Sar,
            Ror => Op::Ror,
            Rol => Op::Rol,
            Rev => Op::Rev,
            ZeroX => Op::ZeroX,
            SignX => Op::SignX,
            And => Op::BitAnd,
            Xor => Op::BitXor,
            Or => Op::BitOr,
            Mul => Op::Mul,
            Div => Op::Div,
            DivUnsigned => Op::DivU,
            Mod => Op::Rem,
            ModUnsigned => Op::RemU,
            Sca => Op::Sca,
            Scas => Op::Scas,
            Frac => Op::Frac,
            Add => Op::Add,
            Sub => Op::Sub,
            LimitMin => Op::LimitMin,
            LimitMax => Op::LimitMax,
            Less => Op::Lt,
            LessUnsigned => Op::LtU,
            LessOrEqual => Op::Lte,
            LessOrEqualUnsigned => Op::LteU,
            Equal => Op::Eq,
            NotEqual => Op::Ne,
            GreaterOrEqual => Op::Gte,
            GreaterOrEqualUnsigned => Op::GteU,
            Greater => Op::Gt,
            GreaterUnsigned => Op::GtU,
            Compare => Op::Compare,
            LogicalAnd => Op::LogAnd,
            LogicalXor => Op::LogXor,
            LogicalOr => Op::LogOr,
            FAdd => Op::FAdd,
            FSub => Op::FSub,
            FMul => Op::FMul,
            FDiv => Op::FDiv,
            FLess => Op::FLess,
            FGreater => Op::FGreater,
            FEqual => Op::FEqual,
            FNotEqual => Op::FNotEqual,
        }
    }
}

fn var_length(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    }
}

fn encode_var(value: u32, length: usize, out: &mut Vec<u8>) {
    for i in 0..length {
        let chunk = value >> (7 * i);
        if i + 1 < length {
            out.push((chunk & 0x7F) as u8 | 0x80);
        } else if i == 3 {
            out.push(chunk as u8);
        } else {
            out.push((chunk & 0x7F) as u8);
        }
    }
}

/// Codifica un `rfvar`: hasta 29 bits sin signo.
pub fn rfvar(value: u32, out: &mut Vec<u8>) {
    encode_var(value, var_length(value), out);
}

/// Codifica un `rfvars`: hasta 29 bits con signo.
pub fn rfvars(value: i32, out: &mut Vec<u8>) {
    let length = match value {
        -0x40..=0x3F => 1,
        -0x2000..=0x1FFF => 2,
        -0x10_0000..=0xF_FFFF => 3,
        _ => 4,
    };

    encode_var(value as u32, length, out);
}

/// Codifica una constante en su forma más compacta.
pub fn constant(value: u32, out: &mut Vec<u8>) {
    let signed = value as i32;
    let inverse = !value;

    if (-1..=14).contains(&signed) {
        out.push(CON_SMALL + (signed + 1) as u8);
    } else if value <= 0xFF {
        out.extend_from_slice(&[Op::ConByte as u8, value as u8]);
    } else if inverse <= 0xFF {
        out.extend_from_slice(&[Op::ConByteNot as u8, inverse as u8]);
    } else if value.is_power_of_two() {
        out.extend_from_slice(&[Op::ConDecod as u8, value.trailing_zeros() as u8]);
    } else if inverse.is_power_of_two() {
        out.extend_from_slice(&[Op::ConDecodNot as u8, inverse.trailing_zeros() as u8]);
    } else if value.wrapping_add(1).is_power_of_two() {
        out.extend_from_slice(&[Op::ConBmask as u8, value.trailing_ones() as u8 - 1]);
    } else if inverse.wrapping_add(1).is_power_of_two() {
        out.extend_from_slice(&[Op::ConBmaskNot as u8, inverse.trailing_ones() as u8 - 1]);
    } else if value <= 0xFFFF {
        out.push(Op::ConWord as u8);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if inverse <= 0xFFFF {
        out.push(Op::ConWordNot as u8);
        out.extend_from_slice(&(inverse as u16).to_le_bytes());
    } else {
        out.push(Op::ConLong as u8);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Base de direccionamiento de una variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Base {
    /// Inicio del objeto, para `DAT`.
    Pbase = 0,
    /// Bloque `VAR` de la instancia.
    Vbase = 1,
    /// Marco del método, para locales.
    Dbase = 2,
}

/// Ubicación de una variable.
#[derive(Clone, Debug)]
pub enum Slot {
    Register(Expression),
    Var(Rc<Variable>),
    Local(Rc<LocalVariable>),

    /// Dirección física de una etiqueta de `DAT`.
    Dat(Expression),
}

/// Acceso a una variable, con el índice ya en la pila si `indexed`.
#[derive(Clone, Debug)]
pub struct Setup {
    pub slot: Slot,
    pub kind: DataType,
    pub indexed: bool,
}

impl Setup {
    fn encode(&self, access: Op, cx: &dyn EvalContext, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let (base, offset) = match &self.slot {
            Slot::Register(register) => {
                let register = register.int_value(cx)?;
                out.push(Op::SetupReg as u8);
                rfvar(register as u32, out);
                out.push(access as u8);

                return Ok(());
            }

            Slot::Var(var) => (Base::Vbase, var.offset().ok_or(EvalError::Unresolved)?),
            Slot::Local(local) => (Base::Dbase, local.offset),
            Slot::Dat(label) => (Base::Pbase, label.int_value(cx)? as u32),
        };

        let fast = offset / 4;
        if self.kind == DataType::Long && !self.indexed && offset % 4 == 0 && fast < 16 {
            match (base, access) {
                (Base::Dbase, Op::Read) => {
                    out.push(READ_LOCAL_FAST + fast as u8);
                    return Ok(());
                }

                (Base::Dbase, Op::Write) => {
                    out.push(WRITE_LOCAL_FAST + fast as u8);
                    return Ok(());
                }

                (Base::Dbase, _) => out.push(SETUP_DBASE_FAST + fast as u8),
                (Base::Vbase, _) => out.push(SETUP_VBASE_FAST + fast as u8),
                (Base::Pbase, _) => self.general(base, offset, out),
            }
        } else {
            self.general(base, offset, out);
        }

        out.push(access as u8);
        Ok(())
    }

    fn general(&self, base: Base, offset: u32, out: &mut Vec<u8>) {
        let kind = match self.kind {
            DataType::Byte => 0,
            DataType::Word => 1,
            DataType::Long => 2,
        };

        let first = if self.indexed { SETUP_INDEXED } else { SETUP_BASE };
        out.push(first + base as u8 * 3 + kind);
        rfvar(offset, out);
    }
}

/// Saltos y demás instrucciones con destino relativo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Branch {
    Jmp,
    Jz,
    Jnz,
    Tjz,
    Djnz,
    CaseValue,
    CaseRange,
    PushTarget,
    RepeatLoop,
}

impl Branch {
    fn op(self) -> Op {
        match self {
            Branch::Jmp => Op::Jmp,
            Branch::Jz => Op::Jz,
            Branch::Jnz => Op::Jnz,
            Branch::Tjz => Op::Tjz,
            Branch::Djnz => Op::Djnz,
            Branch::CaseValue => Op::CaseValue,
            Branch::CaseRange => Op::CaseRange,
            Branch::PushTarget => Op::PushTarget,
            Branch::RepeatLoop => Op::RepeatVarLoop,
        }
    }
}

/// Elemento de código de una línea de método.
#[derive(Clone, Debug)]
pub enum Bytecode {
    Op(Op),
    Constant(Expression),

    /// Salto relativo hacia el inicio de otra línea.
    Branch(Branch, LineId),

    /// Descarta bytes de la pila.
    Pop(u32),

    Variable(Setup, Op),

    Call {
        method: Rc<MethodRef>,
        indexed: bool,
    },

    /// Bloque de ensamblador en línea ya codificado.
    Inline { origin: u32, code: Vec<u8> },

    Debug { values: u8, record: u8 },
}

impl Bytecode {
    /// Codifica en la dirección `here`, con las direcciones de todas las
    /// líneas del método en `lines`.
    pub fn encode(
        &self,
        cx: &dyn EvalContext,
        here: i64,
        lines: &[i64],
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        match self {
            Bytecode::Op(op) => out.push(*op as u8),

            Bytecode::Constant(value) => constant(value.number(cx)?.long() as u32, out),

            Bytecode::Branch(branch, target) => {
                let target = lines[target.index()];

                // El desplazamiento es relativo al final de la instrucción
                let mut scratch = Vec::with_capacity(4);
                for size in 2..=5 {
                    scratch.clear();

                    let offset = target - (here + size);
                    rfvars(offset as i32, &mut scratch);

                    if scratch.len() as i64 + 1 == size || size == 5 {
                        break;
                    }
                }

                out.push(branch.op() as u8);
                out.extend_from_slice(&scratch);
            }

            Bytecode::Pop(bytes) => {
                out.push(Op::Pop as u8);
                rfvar(*bytes, out);
            }

            Bytecode::Variable(setup, access) => setup.encode(*access, cx, out)?,

            Bytecode::Call { method, indexed } => match method.object {
                Some(object) => {
                    let op = if *indexed { Op::CallObjiSub } else { Op::CallObjSub };
                    out.push(op as u8);
                    rfvar(object, out);
                    rfvar(method.index(), out);
                }

                None => {
                    out.push(Op::CallSub as u8);
                    rfvar(method.index(), out);
                }
            },

            Bytecode::Inline { origin, code } => {
                let longs = (code.len() / 4) as u32;
                out.push(Op::Inline as u8);
                rfvar(*origin, out);
                rfvar(longs.saturating_sub(1), out);
                out.extend_from_slice(code);
            }

            Bytecode::Debug { values, record } => {
                out.extend_from_slice(&[Op::Debug as u8, *values, *record]);
            }
        }

        Ok(())
    }

    /// Tamaño en la dirección `here`.
    ///
    /// Un valor aún sin resolver se mide con su forma más larga.
    pub fn size(&self, cx: &dyn EvalContext, here: i64, lines: &[i64]) -> u32 {
        let mut scratch = Vec::new();
        match self.encode(cx, here, lines, &mut scratch) {
            Ok(()) => scratch.len() as u32,
            Err(_) => match self {
                Bytecode::Constant(_) => 5,
                _ => 6,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scopes;

    fn encoded(code: Bytecode, here: i64, lines: &[i64]) -> Vec<u8> {
        let mut out = Vec::new();
        code.encode(&Scopes::new(), here, lines, &mut out).unwrap();
        out
    }

    #[test]
    fn variable_length_integers() {
        let mut out = Vec::new();
        rfvar(0x7F, &mut out);
        assert_eq!(out, vec![0x7F]);

        out.clear();
        rfvar(0x80, &mut out);
        assert_eq!(out, vec![0x80, 0x01]);

        out.clear();
        rfvars(-1, &mut out);
        assert_eq!(out, vec![0x7F]);

        out.clear();
        rfvars(-65, &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn compact_constants() {
        let sizes = [
            (0, 1),
            (-1i32 as u32, 1),
            (14, 1),
            (15, 2),
            (!0x20, 2),
            (0x8000_0000, 2),
            (0x0FFF_FFFF, 2),
            (0x1234, 3),
            (0x1234_5678, 5),
        ];

        for &(value, size) in &sizes {
            let mut out = Vec::new();
            constant(value, &mut out);
            assert_eq!(out.len(), size, "constant {:#x}", value);
        }

        let mut out = Vec::new();
        constant(3, &mut out);
        assert_eq!(out, vec![0xA4]);
    }

    #[test]
    fn branch_offsets_are_relative_to_the_next_instruction() {
        let lines = [0, 10];
        let mut body = crate::ir::MethodBody::new();
        let root = body.root();
        let target = body.add(root);

        assert_eq!(encoded(Bytecode::Branch(Branch::Jmp, target), 0, &lines), vec![0x12, 8]);
        assert_eq!(
            encoded(Bytecode::Branch(Branch::Jmp, root), 10, &lines),
            vec![0x12, (-12i32 as u8) & 0x7F]
        );
    }

    #[test]
    fn fast_local_access() {
        let local = Rc::new(LocalVariable::new("x".into(), DataType::Long, 1, 8));
        let setup = Setup {
            slot: Slot::Local(local),
            kind: DataType::Long,
            indexed: false,
        };

        assert_eq!(encoded(Bytecode::Variable(setup.clone(), Op::Read), 0, &[]), vec![0xD2]);
        assert_eq!(encoded(Bytecode::Variable(setup.clone(), Op::Write), 0, &[]), vec![0xE2]);
        assert_eq!(encoded(Bytecode::Variable(setup, Op::Address), 0, &[]), vec![0xC2, 0x83]);
    }

    #[test]
    fn byte_variable_setup() {
        let var = Rc::new(Variable::new("flags".into(), DataType::Byte, 4));
        var.set_offset(3);

        let setup = Setup {
            slot: Slot::Var(var),
            kind: DataType::Byte,
            indexed: true,
        };

        assert_eq!(
            encoded(Bytecode::Variable(setup, Op::Read), 0, &[]),
            vec![SETUP_INDEXED + 3, 3, 0x80]
        );
    }
}
