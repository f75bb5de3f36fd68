//! Registro de codificadores de instrucciones.
//!
//! Cada instrucción PASM2 ocupa un long con la forma
//!
//! ```text
//! EEEE OOOOOOO CZI DDDDDDDDD SSSSSSSSS
//! ```
//!
//! donde `EEEE` es la condición de ejecución, `O` el opcode, `C`/`Z` los
//! efectos sobre banderas, `I` indica un operando fuente inmediato, y
//! `D`/`S` son los campos de destino y fuente. Los mnemónicos forman una
//! enumeración cerrada generada desde una tabla en [`table`]; el
//! esquema de cada uno determina cómo se validan y colocan sus
//! operandos.
//!
//! Un valor inmediato que no cabe en su campo se extiende con una
//! instrucción `AUGS` o `AUGD` previa que carga los 23 bits superiores.

mod data;
mod table;

pub use data::{DataDirective, DataValue, Directive};
pub use table::Mnemonic;

use crate::{
    ast::Prefix,
    expr::{EvalContext, EvalError, Expression},
};

use bitflags::bitflags;
use std::str::FromStr;
use thiserror::Error;

/// Límite de un campo de registro o inmediato.
const FIELD: u32 = 0x1FF;

/// Límite de un inmediato fuente en transferencias con hub.
const HUB_FIELD: u32 = 0xFF;

const AUGS: u32 = 0b11110 << 23;
const AUGD: u32 = 0b11111 << 23;

/// Error de codificación.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("Unknown instruction or directive `{0}`")]
    UnknownMnemonic(String),

    #[error("Unknown condition `{0}`")]
    UnknownCondition(String),

    #[error("Unknown effect `{0}`, expected WC, WZ or WCZ")]
    UnknownEffect(String),

    #[error("Invalid operands for `{mnemonic}`, expected `{expected}`")]
    InvalidArguments {
        mnemonic: &'static str,
        expected: &'static str,
    },

    #[error("Effect `{effect}` is not allowed for `{mnemonic}`")]
    InvalidEffect {
        mnemonic: &'static str,
        effect: String,
    },

    #[error("Instruction `{0}` cannot be conditional")]
    InvalidCondition(&'static str),

    #[error("Register address ${0:X} out of range")]
    RegisterOutOfRange(i64),

    #[error("Value {value} exceeds range {range}")]
    ValueOutOfRange { value: i64, range: &'static str },

    #[error("Branch offset {0} exceeds range -256..255")]
    BranchOutOfRange(i64),

    #[error("Address {0} exceeds the 20-bit branch range")]
    AddressOutOfRange(i64),

    #[error("Relative hub branch to an address that is not long aligned")]
    UnalignedBranch,

    #[error("Expected PA, PB, PTRA or PTRB")]
    PointerRegister,

    #[error(transparent)]
    Eval(#[from] EvalError),
}

bitflags! {
    /// Efectos sobre banderas (`WC`, `WZ`, `WCZ`).
    ///
    /// Los valores coinciden con la posición de los bits `C` y `Z`.
    pub struct Effects: u32 {
        const NONE = 0;
        const WC = 1 << 20;
        const WZ = 1 << 19;
        const WCZ = Self::WC.bits | Self::WZ.bits;
    }
}

impl FromStr for Effects {
    type Err = EncodeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let effect = unicase::Ascii::new(name);
        if effect == unicase::Ascii::new("WC") {
            Ok(Effects::WC)
        } else if effect == unicase::Ascii::new("WZ") {
            Ok(Effects::WZ)
        } else if effect == unicase::Ascii::new("WCZ") {
            Ok(Effects::WCZ)
        } else {
            Err(EncodeError::UnknownEffect(name.to_string()))
        }
    }
}

const CONDITIONS: &[(&str, u32)] = &[
    ("_RET_", 0b0000),
    ("IF_NC_AND_NZ", 0b0001),
    ("IF_NZ_AND_NC", 0b0001),
    ("IF_GT", 0b0001),
    ("IF_A", 0b0001),
    ("IF_00", 0b0001),
    ("IF_NC_AND_Z", 0b0010),
    ("IF_Z_AND_NC", 0b0010),
    ("IF_01", 0b0010),
    ("IF_NC", 0b0011),
    ("IF_GE", 0b0011),
    ("IF_AE", 0b0011),
    ("IF_0X", 0b0011),
    ("IF_C_AND_NZ", 0b0100),
    ("IF_NZ_AND_C", 0b0100),
    ("IF_10", 0b0100),
    ("IF_NZ", 0b0101),
    ("IF_NE", 0b0101),
    ("IF_X0", 0b0101),
    ("IF_C_NE_Z", 0b0110),
    ("IF_Z_NE_C", 0b0110),
    ("IF_DIFF", 0b0110),
    ("IF_NC_OR_NZ", 0b0111),
    ("IF_NZ_OR_NC", 0b0111),
    ("IF_NOT_11", 0b0111),
    ("IF_C_AND_Z", 0b1000),
    ("IF_Z_AND_C", 0b1000),
    ("IF_11", 0b1000),
    ("IF_C_EQ_Z", 0b1001),
    ("IF_Z_EQ_C", 0b1001),
    ("IF_SAME", 0b1001),
    ("IF_Z", 0b1010),
    ("IF_E", 0b1010),
    ("IF_X1", 0b1010),
    ("IF_NC_OR_Z", 0b1011),
    ("IF_Z_OR_NC", 0b1011),
    ("IF_NOT_10", 0b1011),
    ("IF_C", 0b1100),
    ("IF_LT", 0b1100),
    ("IF_B", 0b1100),
    ("IF_1X", 0b1100),
    ("IF_C_OR_NZ", 0b1101),
    ("IF_NZ_OR_C", 0b1101),
    ("IF_NOT_01", 0b1101),
    ("IF_C_OR_Z", 0b1110),
    ("IF_Z_OR_C", 0b1110),
    ("IF_LE", 0b1110),
    ("IF_BE", 0b1110),
    ("IF_NOT_00", 0b1110),
    ("IF_ALWAYS", 0b1111),
];

/// Condición de ejecución, los cuatro bits superiores de cada long.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Condition(u32);

impl Condition {
    pub const ALWAYS: Condition = Condition(0b1111);

    /// `_RET_`: ejecuta la instrucción y luego retorna.
    pub const RETURN: Condition = Condition(0b0000);

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl FromStr for Condition {
    type Err = EncodeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let wanted = unicase::Ascii::new(name);
        CONDITIONS
            .iter()
            .find(|(condition, _)| unicase::Ascii::new(*condition) == wanted)
            .map(|&(_, bits)| Condition(bits))
            .ok_or_else(|| EncodeError::UnknownCondition(name.to_string()))
    }
}

/// Forma de los operandos de un mnemónico.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Schema {
    /// `D, {#}S`
    RegSource,

    /// `D {, {#}S}`, con `S = D` si se omite.
    RegOptSource,

    /// `{#}D, {#}S`, con el bit `L` en la posición 19.
    Pair,

    /// `{#}D`, con el bit `L` en la posición 18.
    Dest,

    /// `D`
    Reg,

    /// `D, {#}S, #N` con `N` de dos bits.
    Field2,

    /// `D, {#}S, #N` con `N` de un bit.
    Field1,

    /// `D, {#}S` donde `#S` es un desplazamiento relativo de 9 bits.
    RelBranch,

    /// `#{\}A` de 20 bits, o `D` con la codificación alterna.
    Jump,

    /// `PA/PB/PTRA/PTRB, #{\}A`
    PointerJump,

    /// `#N`, carga los 23 bits superiores del siguiente inmediato.
    Augment,

    /// Sin operandos.
    Bare,
}

impl Schema {
    fn describe(self) -> &'static str {
        match self {
            Schema::RegSource => "D, {#}S",
            Schema::RegOptSource => "D {, {#}S}",
            Schema::Pair => "{#}D, {#}S",
            Schema::Dest => "{#}D",
            Schema::Reg => "D",
            Schema::Field2 | Schema::Field1 => "D, {#}S, #N",
            Schema::RelBranch => "D, {#}S",
            Schema::Jump => "#{\\}A or D",
            Schema::PointerJump => "PA/PB/PTRA/PTRB, #{\\}A",
            Schema::Augment => "#N",
            Schema::Bare => "no operands",
        }
    }
}

/// Codificación de un mnemónico.
#[derive(Copy, Clone, Debug)]
pub struct Encoding {
    /// Bits fijos en su posición final, sin condición.
    pub base: u32,
    pub schema: Schema,

    /// Efectos permitidos.
    pub effects: Effects,

    /// Codificación con operando de registro para saltos.
    pub alternate: Option<u32>,
}

/// Operando ya convertido a expresión.
#[derive(Clone, Debug)]
pub struct AsmOperand {
    pub prefix: Prefix,
    pub absolute: bool,
    pub value: Expression,
}

impl AsmOperand {
    pub fn register(value: Expression) -> Self {
        AsmOperand {
            prefix: Prefix::None,
            absolute: false,
            value,
        }
    }

    pub fn immediate(value: Expression) -> Self {
        AsmOperand {
            prefix: Prefix::Immediate,
            ..AsmOperand::register(value)
        }
    }

    pub fn long_literal(value: Expression) -> Self {
        AsmOperand {
            prefix: Prefix::LongLiteral,
            ..AsmOperand::register(value)
        }
    }

    fn is_register(&self) -> bool {
        self.prefix == Prefix::None
    }
}

/// Dirección lógica y modo de la línea que se codifica.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    /// En longs para cog/LUT, en bytes para hub.
    pub address: i64,
    pub hub: bool,
}

impl Origin {
    /// Avance del contador de programa por instrucción.
    fn step(self) -> i64 {
        if self.hub {
            4
        } else {
            1
        }
    }
}

/// Instrucción validada, lista para medirse y codificarse.
#[derive(Clone, Debug)]
pub struct InstructionObject {
    condition: Condition,
    mnemonic: Mnemonic,
    operands: Vec<AsmOperand>,
    effects: Effects,
}

/// Valida operandos, condición y efectos contra el esquema del mnemónico.
pub fn create_object(
    condition: Option<Condition>,
    mnemonic: Mnemonic,
    operands: Vec<AsmOperand>,
    effects: Effects,
) -> Result<InstructionObject, EncodeError> {
    let encoding = mnemonic.encoding();

    let valid = match (encoding.schema, operands.as_slice()) {
        (Schema::RegSource, [d, _]) => d.is_register(),
        (Schema::RegOptSource, [d]) | (Schema::RegOptSource, [d, _]) => d.is_register(),
        (Schema::Pair, [_, _]) | (Schema::Dest, [_]) => true,
        (Schema::Reg, [d]) => d.is_register(),
        (Schema::Field2 | Schema::Field1, [d, _, n]) => {
            d.is_register() && n.prefix == Prefix::Immediate
        }

        (Schema::RelBranch, [d, s]) => d.is_register() && s.prefix != Prefix::LongLiteral,
        (Schema::Jump, [a]) => !a.is_register() || encoding.alternate.is_some(),
        (Schema::PointerJump, [p, a]) => p.is_register() && !a.is_register(),
        (Schema::Augment, [n]) => n.prefix == Prefix::Immediate,
        (Schema::Bare, []) => true,
        _ => false,
    };

    let misplaced_absolute = !matches!(encoding.schema, Schema::Jump | Schema::PointerJump)
        && operands.iter().any(|operand| operand.absolute);

    if !valid || misplaced_absolute {
        return Err(EncodeError::InvalidArguments {
            mnemonic: mnemonic.name(),
            expected: encoding.schema.describe(),
        });
    }

    // Los saltos inmediatos usan el bit C como bit relativo
    let immediate_jump = matches!(encoding.schema, Schema::Jump | Schema::PointerJump)
        && operands.iter().all(|operand| !operand.is_register());

    if !encoding.effects.contains(effects) || (immediate_jump && !effects.is_empty()) {
        let effect = if effects == Effects::WCZ {
            "WCZ"
        } else if effects == Effects::WC {
            "WC"
        } else {
            "WZ"
        };

        return Err(EncodeError::InvalidEffect {
            mnemonic: mnemonic.name(),
            effect: effect.to_string(),
        });
    }

    if mnemonic == Mnemonic::NOP && condition.is_some() {
        return Err(EncodeError::InvalidCondition(mnemonic.name()));
    }

    Ok(InstructionObject {
        condition: condition.unwrap_or(Condition::ALWAYS),
        mnemonic,
        operands,
        effects,
    })
}

impl InstructionObject {
    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    pub fn operands(&self) -> &[AsmOperand] {
        &self.operands
    }

    /// Tamaño en bytes: 4 por la instrucción más 4 por cada `AUGS`/`AUGD`.
    ///
    /// Un inmediato aún sin resolver se supone pequeño; el resolvedor
    /// vuelve a preguntar en cada pasada.
    pub fn size(&self, cx: &dyn EvalContext) -> u32 {
        let (d, s) = self.fields();
        let augments = [d.map(|d| (d, FIELD)), s.map(|s| (s, self.source_limit()))]
            .iter()
            .flatten()
            .filter(|(operand, limit)| needs_augment(operand, *limit, cx))
            .count() as u32;

        4 * (1 + augments)
    }

    /// Codifica la instrucción en la dirección dada.
    pub fn bytes(&self, cx: &dyn EvalContext, origin: Origin) -> Result<Vec<u8>, EncodeError> {
        let encoding = self.mnemonic.encoding();
        let condition = self.condition.bits() << 28;
        let mut words = Vec::with_capacity(3);

        let mut word = condition | encoding.base | self.effects.bits();
        let operands = &self.operands;

        match encoding.schema {
            Schema::RegSource | Schema::RegOptSource => {
                let d = register(&operands[0], cx)?;
                let source = operands.get(1).unwrap_or(&operands[0]);
                let (s, immediate) = self.source(source, self.source_limit(), AUGS, cx, &mut words)?;

                word |= immediate << 18 | d << 9 | s;
            }

            Schema::Pair => {
                let (d, long) = self.source(&operands[0], FIELD, AUGD, cx, &mut words)?;
                let (s, immediate) = self.source(&operands[1], self.source_limit(), AUGS, cx, &mut words)?;

                word |= long << 19 | immediate << 18 | d << 9 | s;
            }

            Schema::Dest => {
                let (d, long) = self.source(&operands[0], FIELD, AUGD, cx, &mut words)?;
                word |= long << 18 | d << 9;
            }

            Schema::Reg => word |= register(&operands[0], cx)? << 9,

            Schema::Field2 | Schema::Field1 => {
                let d = register(&operands[0], cx)?;
                let (s, immediate) = self.source(&operands[1], FIELD, AUGS, cx, &mut words)?;

                let mask = if encoding.schema == Schema::Field2 { 0b11 } else { 0b1 };
                let n = operands[2].value.int_value(cx)?;
                if !(0..=mask).contains(&n) {
                    return Err(EncodeError::ValueOutOfRange {
                        value: n,
                        range: if mask == 0b11 { "0..3" } else { "0..1" },
                    });
                }

                word |= (n as u32) << 19 | immediate << 18 | d << 9 | s;
            }

            Schema::RelBranch => {
                let d = register(&operands[0], cx)?;
                let s = if operands[1].is_register() {
                    register(&operands[1], cx)?
                } else {
                    word |= 1 << 18;

                    let target = operands[1].value.int_value(cx)?;
                    let offset = target - (origin.address + origin.step());
                    if origin.hub && offset % 4 != 0 {
                        return Err(EncodeError::UnalignedBranch);
                    }

                    let offset = offset / origin.step();
                    if !(-256..=255).contains(&offset) {
                        return Err(EncodeError::BranchOutOfRange(offset));
                    }

                    offset as u32 & FIELD
                };

                word |= d << 9 | s;
            }

            Schema::Jump if operands[0].is_register() => {
                let alternate = encoding.alternate.ok_or(EncodeError::InvalidArguments {
                    mnemonic: self.mnemonic.name(),
                    expected: encoding.schema.describe(),
                })?;

                let d = register(&operands[0], cx)?;
                word = condition | alternate | self.effects.bits() | d << 9;
            }

            Schema::Jump => word = condition | encoding.base | jump_field(&operands[0], cx, origin)?,

            Schema::PointerJump => {
                let pointer = operands[0].value.int_value(cx)?;
                if !(0x1F6..=0x1F9).contains(&pointer) {
                    return Err(EncodeError::PointerRegister);
                }

                word |= ((pointer - 0x1F6) as u32) << 21 | jump_field(&operands[1], cx, origin)?;
            }

            Schema::Augment => {
                let value = operands[0].value.number(cx)?.long() as u32;
                word |= (value >> 9) & 0x7F_FFFF;
            }

            Schema::Bare if self.mnemonic == Mnemonic::NOP => word = 0,
            Schema::Bare => (),
        }

        words.push(word);
        Ok(words.iter().flat_map(|word| word.to_le_bytes()).collect())
    }

    /// Posiciones de operandos que se colocan en `D` y en `S` y que
    /// admiten inmediatos extendidos.
    fn fields(&self) -> (Option<&AsmOperand>, Option<&AsmOperand>) {
        let operands = &self.operands;
        match self.mnemonic.encoding().schema {
            Schema::RegSource | Schema::RegOptSource | Schema::Field2 | Schema::Field1 => {
                (None, operands.get(1))
            }

            Schema::Pair => (operands.get(0), operands.get(1)),
            Schema::Dest => (operands.get(0), None),
            _ => (None, None),
        }
    }

    fn source_limit(&self) -> u32 {
        if self.mnemonic.is_hub_transfer() {
            HUB_FIELD
        } else {
            FIELD
        }
    }

    /// Codifica un operando de campo, agregando `AUGS`/`AUGD` si hace falta.
    fn source(
        &self,
        operand: &AsmOperand,
        limit: u32,
        augment: u32,
        cx: &dyn EvalContext,
        words: &mut Vec<u32>,
    ) -> Result<(u32, u32), EncodeError> {
        if operand.is_register() {
            return Ok((register(operand, cx)?, 0));
        }

        let value = operand.value.number(cx)?.long() as u32;
        if operand.prefix == Prefix::LongLiteral || value > limit {
            let condition = self.condition.bits() << 28;
            words.push(condition | augment | (value >> 9) & 0x7F_FFFF);
        }

        Ok((value & FIELD, 1))
    }
}

fn needs_augment(operand: &AsmOperand, limit: u32, cx: &dyn EvalContext) -> bool {
    match operand.prefix {
        Prefix::None => false,
        Prefix::LongLiteral => true,
        Prefix::Immediate => match operand.value.number(cx) {
            Ok(value) => value.long() as u32 > limit,
            Err(_) => false,
        },
    }
}

fn register(operand: &AsmOperand, cx: &dyn EvalContext) -> Result<u32, EncodeError> {
    let address = operand.value.int_value(cx)?;
    if (0..=FIELD as i64).contains(&address) {
        Ok(address as u32)
    } else {
        Err(EncodeError::RegisterOutOfRange(address))
    }
}

/// Campo `R` y `A` de un salto de 20 bits.
///
/// El salto es relativo salvo que se fuerce con `\` o que el destino se
/// encuentre en el otro dominio de memoria.
fn jump_field(operand: &AsmOperand, cx: &dyn EvalContext, origin: Origin) -> Result<u32, EncodeError> {
    let target = operand.value.int_value(cx)?;
    let target_hub = match operand.value.target(cx) {
        Some(address) => address.hub,
        None => target >= 0x400,
    };

    if !operand.absolute && target_hub == origin.hub {
        let offset = target - (origin.address + origin.step());
        if !(-(1 << 19)..(1 << 19)).contains(&offset) {
            return Err(EncodeError::AddressOutOfRange(offset));
        }

        Ok(1 << 20 | (offset as u32 & 0xF_FFFF))
    } else if (0..(1 << 20)).contains(&target) {
        Ok(target as u32)
    } else {
        Err(EncodeError::AddressOutOfRange(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scopes;

    fn encode(mnemonic: Mnemonic, operands: Vec<AsmOperand>, origin: Origin) -> (u32, Vec<u8>) {
        let scopes = Scopes::new();
        let object = create_object(None, mnemonic, operands, Effects::NONE).unwrap();
        let bytes = object.bytes(&scopes, origin).unwrap();

        assert_eq!(bytes.len() as u32, object.size(&scopes));
        (object.size(&scopes), bytes)
    }

    fn word(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    const COG: Origin = Origin {
        address: 0,
        hub: false,
    };

    #[test]
    fn register_and_immediate_operands() {
        let (size, bytes) = encode(
            Mnemonic::MOV,
            vec![
                AsmOperand::register(Expression::int(0x10)),
                AsmOperand::immediate(Expression::int(5)),
            ],
            COG,
        );

        assert_eq!(size, 4);
        assert_eq!(word(&bytes), 0xF604_2005);
    }

    #[test]
    fn long_literals_are_augmented() {
        let (size, bytes) = encode(
            Mnemonic::MOV,
            vec![
                AsmOperand::register(Expression::int(0x10)),
                AsmOperand::long_literal(Expression::int(0x1234_5678)),
            ],
            COG,
        );

        assert_eq!(size, 8);
        assert_eq!(word(&bytes[..4]), 0xFF00_0000 | (0x1234_5678 >> 9));
        assert_eq!(word(&bytes[4..]) & FIELD, 0x1234_5678 & FIELD);
    }

    #[test]
    fn wide_immediates_are_augmented() {
        let (size, _) = encode(
            Mnemonic::MOV,
            vec![
                AsmOperand::register(Expression::int(0)),
                AsmOperand::immediate(Expression::int(0x200)),
            ],
            COG,
        );

        assert_eq!(size, 8);
    }

    #[test]
    fn relative_jump_in_cog() {
        let (_, bytes) = encode(
            Mnemonic::JMP,
            vec![AsmOperand::immediate(Expression::int(0))],
            Origin {
                address: 4,
                hub: false,
            },
        );

        // 0 - (4 + 1) = -5
        assert_eq!(word(&bytes), 0xFD90_0000 | (-5i32 as u32 & 0xF_FFFF));
    }

    #[test]
    fn absolute_jump() {
        let mut target = AsmOperand::immediate(Expression::int(0x10));
        target.absolute = true;

        let (_, bytes) = encode(Mnemonic::JMP, vec![target], COG);
        assert_eq!(word(&bytes), 0xFD80_0010);
    }

    #[test]
    fn djnz_range_is_checked() {
        let scopes = Scopes::new();
        let object = create_object(
            None,
            Mnemonic::DJNZ,
            vec![
                AsmOperand::register(Expression::int(0)),
                AsmOperand::immediate(Expression::int(400)),
            ],
            Effects::NONE,
        )
        .unwrap();

        let result = object.bytes(&scopes, COG);
        assert_eq!(result, Err(EncodeError::BranchOutOfRange(399)));
    }

    #[test]
    fn ret_and_nop() {
        let (_, ret) = encode(Mnemonic::RET, vec![], COG);
        assert_eq!(word(&ret), 0xFD64_002D);

        let (_, nop) = encode(Mnemonic::NOP, vec![], COG);
        assert_eq!(word(&nop), 0);
    }

    #[test]
    fn schema_violations_are_rejected() {
        let result = create_object(
            None,
            Mnemonic::MOV,
            vec![AsmOperand::immediate(Expression::int(1))],
            Effects::NONE,
        );

        assert!(matches!(result, Err(EncodeError::InvalidArguments { mnemonic: "MOV", .. })));

        let result = create_object(
            None,
            Mnemonic::DJNZ,
            vec![
                AsmOperand::register(Expression::int(0)),
                AsmOperand::immediate(Expression::int(0)),
            ],
            Effects::WC,
        );

        assert!(matches!(result, Err(EncodeError::InvalidEffect { .. })));
    }

    #[test]
    fn conditions_and_mnemonics_ignore_case() {
        assert_eq!("if_c".parse::<Condition>(), "IF_LT".parse::<Condition>());
        assert_eq!("mov".parse::<Mnemonic>(), Ok(Mnemonic::MOV));
        assert!("bogus".parse::<Mnemonic>().is_err());
    }
}
