//! Resolución de direcciones.
//!
//! # Ensamblador
//! El resolvedor de ensamblador es una máquina de estados con la
//! dirección lógica actual, la dirección física dentro del objeto y el
//! modo (cog o hub). Internamente toda dirección se cuenta en bytes; una
//! etiqueta en modo cog vale su dirección dividida entre cuatro.
//!
//! La primera pasada asigna direcciones a etiquetas. Como el tamaño de
//! una instrucción puede depender del valor de una etiqueta posterior
//! (un inmediato que requiere `AUGS`), la pasada se repite hasta que
//! ninguna etiqueta cambie. La segunda pasada emite los bytes.
//!
//! # Métodos
//! Los métodos se disponen uno tras otro después de la región `DAT`. El
//! tamaño de un salto depende de su distancia, por lo cual se itera de
//! igual forma hasta que ninguna línea cambie de dirección.

use crate::{
    ast::Identifier,
    error::{Diagnostic, Diagnostics},
    expr::{Address, ContextRef, EvalContext, EvalError, Expression},
    ir::{Addresses, AsmLine, LineContent, MethodBody},
    isa::{EncodeError, Origin},
    scope::{ScopeId, Scopes},
    source::Located,
};

use thiserror::Error;

/// Límite de código en cog, en longs.
const COG_LIMIT: i64 = 0x1F8;

/// Límite de código en LUT, en longs.
const LUT_LIMIT: i64 = 0x400;

/// Límite de `FIT` sin argumento.
const FIT_DEFAULT: i64 = 0x1F0;

/// Límite de la memoria hub, en bytes.
const HUB_LIMIT: i64 = 0x10_0000;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Cog address is not long aligned")]
    Misaligned,

    #[error("Code exceeds the cog limit by {0} longs")]
    Overflow(i64),

    #[error("Code does not fit below ${limit:X}, address is ${address:X}")]
    Fit { limit: i64, address: i64 },

    #[error("ORG address ${0:X} out of range")]
    OrgRange(i64),

    #[error("ORGF address ${target:X} is below the current address ${address:X}")]
    OrgfBackwards { target: i64, address: i64 },

    #[error("`{0}` is only allowed in cog mode")]
    CogOnly(&'static str),

    #[error("Address resolution did not converge after {0} iterations")]
    Diverged(usize),

    #[error("Method `{0}` exceeds the hub address range")]
    HubOverflow(Identifier),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Contexto de evaluación con símbolos y direcciones resueltas.
pub struct Environment<'a> {
    pub scopes: &'a Scopes,
    pub addresses: &'a Addresses,
}

impl<'a> Environment<'a> {
    pub fn new(scopes: &'a Scopes, addresses: &'a Addresses) -> Self {
        Environment { scopes, addresses }
    }
}

impl EvalContext for Environment<'_> {
    fn symbol(&self, scope: ScopeId, name: &Identifier) -> Option<&Expression> {
        self.scopes.get_symbol(scope, name)
    }

    fn address(&self, context: ContextRef) -> Option<Address> {
        self.addresses.get(context)
    }
}

/// Estado inicial del resolvedor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Start {
    /// Dirección lógica inicial: en longs para cog, en bytes para hub.
    pub address: i64,

    /// Desplazamiento físico dentro del objeto.
    pub object: i64,

    pub hub: bool,
}

impl Start {
    /// Región `DAT`: comienza en modo hub, donde la dirección lógica es
    /// la física.
    pub fn hub(object: i64) -> Self {
        Start {
            address: object,
            object,
            hub: true,
        }
    }

    /// Bloque en línea dentro de un método.
    pub fn cog(origin: i64) -> Self {
        Start {
            address: origin,
            object: 0,
            hub: false,
        }
    }
}

/// Ubicación final de una línea.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Dirección en bytes, lógica.
    pub address: i64,
    pub object: i64,
    pub hub: bool,
    pub size: u32,
}

impl Placement {
    fn origin(&self) -> Origin {
        Origin {
            address: if self.hub { self.address } else { self.address / 4 },
            hub: self.hub,
        }
    }
}

struct State {
    address: i64,
    object: i64,
    hub: bool,
    limit: i64,
}

impl State {
    fn new(start: Start) -> Self {
        let mut state = State {
            address: 0,
            object: start.object,
            hub: start.hub,
            limit: 0,
        };

        if start.hub {
            state.address = start.address;
            state.limit = HUB_LIMIT;
        } else {
            state.org(start.address);
        }

        state
    }

    fn org(&mut self, origin: i64) {
        self.hub = false;
        self.address = origin * 4;
        self.limit = if origin >= 0x200 { LUT_LIMIT } else { COG_LIMIT } * 4;
    }

    fn label(&self) -> Address {
        Address {
            address: if self.hub { self.address } else { self.address / 4 },
            object_address: self.object,
            hub: self.hub,
        }
    }
}

/// Resolvedor de líneas de ensamblador.
pub struct AsmResolver<'a> {
    scopes: &'a Scopes,
    addresses: &'a mut Addresses,
    iteration_limit: usize,
}

impl<'a> AsmResolver<'a> {
    pub fn new(scopes: &'a Scopes, addresses: &'a mut Addresses, iteration_limit: usize) -> Self {
        AsmResolver {
            scopes,
            addresses,
            iteration_limit,
        }
    }

    /// Primera pasada. Indica si alguna etiqueta cambió de dirección.
    pub fn pass1(
        &mut self,
        lines: &[AsmLine],
        start: Start,
    ) -> Result<(Vec<Placement>, bool), Located<ResolveError>> {
        let mut state = State::new(start);
        let mut placements = Vec::with_capacity(lines.len());
        let mut changed = false;

        for line in lines {
            let env = Environment::new(self.scopes, self.addresses);
            let placement = place(line, &mut state, &env).map_err(|error| located!(line.location, error))?;

            if let Some(label) = line.label {
                let address = Address {
                    address: if placement.hub {
                        placement.address
                    } else {
                        placement.address / 4
                    },
                    object_address: placement.object,
                    hub: placement.hub,
                };

                if !placement.hub && placement.address % 4 != 0 {
                    return Err(located!(line.location, ResolveError::Misaligned));
                }

                changed |= self.addresses.set(label, address);
            }

            log::trace!("{} -> {:?}", line.location, placement);
            placements.push(placement);
        }

        Ok((placements, changed))
    }

    /// Repite la primera pasada hasta alcanzar un punto fijo.
    pub fn converge(
        &mut self,
        lines: &[AsmLine],
        start: Start,
    ) -> Result<Vec<Placement>, Located<ResolveError>> {
        for iteration in 1..=self.iteration_limit {
            let (placements, changed) = self.pass1(lines, start)?;
            if !changed {
                log::debug!("Assembly converged after {} iterations", iteration);
                return Ok(placements);
            }
        }

        let location = lines
            .first()
            .map(|line| line.location.clone())
            .unwrap_or_default();

        log::warn!("Assembly did not converge");
        Err(Located::at(ResolveError::Diverged(self.iteration_limit), location))
    }

    /// Resuelve y emite. Los errores se depositan en `diagnostics`.
    pub fn resolve(&mut self, lines: &[AsmLine], start: Start, diagnostics: &mut Diagnostics) -> Vec<u8> {
        let placements = match self.converge(lines, start) {
            Ok(placements) => placements,
            Err(error) => {
                diagnostics.fatal(error);
                return Vec::new();
            }
        };

        self.pass2(lines, &placements, start, diagnostics)
    }

    /// Segunda pasada: emite cada línea en su dirección física.
    pub fn pass2(
        &self,
        lines: &[AsmLine],
        placements: &[Placement],
        start: Start,
        diagnostics: &mut Diagnostics,
    ) -> Vec<u8> {
        let env = Environment::new(self.scopes, self.addresses);
        let mut out = Vec::new();

        for (line, placement) in lines.iter().zip(placements) {
            let offset = (placement.object - start.object) as usize;
            if out.len() < offset {
                out.resize(offset, 0);
            }

            let bytes = match &line.content {
                LineContent::Instruction(instruction) => instruction
                    .bytes(&env, placement.origin())
                    .map_err(|error| vec![Located::at(error, line.location.clone())]),

                LineContent::Data(data) => data.bytes(&env),
                LineContent::File(contents) => Ok(contents.to_vec()),
                _ => Ok(Vec::new()),
            };

            match bytes {
                Ok(bytes) => {
                    debug_assert_eq!(bytes.len() as u32, placement.size);
                    out.extend_from_slice(&bytes);
                }

                Err(errors) => {
                    diagnostics.push(composite(errors));
                    out.resize(out.len() + placement.size as usize, 0);
                }
            }
        }

        out
    }
}

/// Una violación produce un diagnóstico simple; varias se agrupan.
pub fn composite<E: std::error::Error>(mut errors: Vec<Located<E>>) -> Diagnostic {
    if errors.len() == 1 {
        if let Some(error) = errors.pop() {
            return error.into();
        }
    }

    let location = errors.first().map(|error| error.location().clone());
    let message = format!("{} values are out of range", errors.len());

    errors
        .into_iter()
        .fold(Diagnostic::error(location, message), |composite, error| {
            composite.with_child(error.into())
        })
}

fn place(line: &AsmLine, state: &mut State, env: &Environment) -> Result<Placement, ResolveError> {
    let mut fill = 0;

    match &line.content {
        LineContent::Org(origin) => {
            let origin = match origin {
                Some(origin) => origin.int_value(env)?,
                None => 0,
            };

            if !(0..LUT_LIMIT).contains(&origin) {
                return Err(ResolveError::OrgRange(origin));
            }

            state.org(origin);
        }

        LineContent::Orgh(origin) => {
            state.hub = true;
            state.limit = HUB_LIMIT;
            state.address = match origin {
                Some(origin) => origin.int_value(env)?,
                None => state.object,
            };

            if !(0..HUB_LIMIT).contains(&state.address) {
                return Err(ResolveError::OrgRange(state.address));
            }
        }

        LineContent::Orgf(target) => {
            if state.hub {
                return Err(ResolveError::CogOnly("ORGF"));
            }

            let target = target.int_value(env)? * 4;
            if target < state.address {
                return Err(ResolveError::OrgfBackwards {
                    target: target / 4,
                    address: state.address / 4,
                });
            }

            fill = (target - state.address) as u32;
        }

        LineContent::Align(alignment) => {
            let alignment = *alignment as i64;
            let current = if state.hub { state.object } else { state.address };
            fill = ((alignment - current % alignment) % alignment) as u32;
        }

        LineContent::Fit(limit) => {
            if state.hub {
                return Err(ResolveError::CogOnly("FIT"));
            }

            let limit = match limit {
                Some(limit) => limit.int_value(env)?,
                None => FIT_DEFAULT,
            };

            if state.address > limit * 4 {
                return Err(ResolveError::Fit {
                    limit,
                    address: state.address / 4,
                });
            }
        }

        _ => (),
    }

    state.address += fill as i64;
    state.object += fill as i64;

    let (size, advance_object) = match &line.content {
        LineContent::Instruction(instruction) => {
            if !state.hub && state.address % 4 != 0 {
                return Err(ResolveError::Misaligned);
            }

            (instruction.size(env), true)
        }

        LineContent::Data(data) => (data.size(env).map_err(|error| error.into_inner())?, true),
        LineContent::File(contents) => (contents.len() as u32, true),

        LineContent::Res(count) => {
            if state.hub {
                return Err(ResolveError::CogOnly("RES"));
            }

            // Se compara en longs antes de convertir el tamaño
            let longs = count.int_value(env)?.max(0);
            let room = (state.limit - state.address).max(0) / 4;
            if longs > room {
                return Err(ResolveError::Overflow(longs - room));
            }

            (longs as u32 * 4, false)
        }

        _ => (0, true),
    };

    let placement = Placement {
        address: state.address,
        object: state.object,
        hub: state.hub,
        size: if advance_object { size } else { 0 },
    };

    state.address += size as i64;
    if advance_object {
        state.object += size as i64;
    }

    if state.address > state.limit {
        let excess = state.address - state.limit;
        return Err(if state.hub {
            ResolveError::OrgRange(state.address)
        } else {
            ResolveError::Overflow((excess + 3) / 4)
        });
    }

    Ok(placement)
}

/// Direcciones resueltas de un método.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodLayout {
    pub address: i64,
    pub size: u32,

    /// Dirección de cada línea, indexada por [`crate::ir::LineId`].
    pub lines: Vec<i64>,
}

/// Dispone todos los métodos a partir de `start` hasta un punto fijo.
pub fn layout_methods(
    bodies: &[&MethodBody],
    start: i64,
    cx: &dyn EvalContext,
    iteration_limit: usize,
) -> Result<Vec<MethodLayout>, ResolveError> {
    let mut layouts: Vec<MethodLayout> = bodies
        .iter()
        .map(|body| MethodLayout {
            lines: vec![0; body.len()],
            ..Default::default()
        })
        .collect();

    for iteration in 1..=iteration_limit {
        let mut changed = false;
        let mut here = start;

        for (body, layout) in bodies.iter().zip(layouts.iter_mut()) {
            changed |= layout.address != here;
            layout.address = here;

            for line in body.order() {
                let slot = &mut layout.lines[line.index()];
                changed |= *slot != here;
                *slot = here;

                for code in body.code(line) {
                    here += code.size(cx, here, &layout.lines) as i64;
                }
            }

            layout.size = (here - layout.address) as u32;
        }

        if !changed {
            log::debug!("Methods converged after {} iterations", iteration);
            return Ok(layouts);
        }
    }

    log::warn!("Method layout did not converge");
    Err(ResolveError::Diverged(iteration_limit))
}

/// Emite el bytecode de un método ya dispuesto.
pub fn emit_method(
    body: &MethodBody,
    layout: &MethodLayout,
    cx: &dyn EvalContext,
    out: &mut Vec<u8>,
) -> Result<(), ResolveError> {
    let mut here = layout.address;
    for line in body.order() {
        for code in body.code(line) {
            let before = out.len();
            code.encode(cx, here, &layout.lines, out)?;
            here += (out.len() - before) as i64;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{DataType, Prefix},
        isa::{self, AsmOperand, DataDirective, DataValue, Effects, Mnemonic},
        source::Location,
    };

    struct Fixture {
        scopes: Scopes,
        addresses: Addresses,
        lines: Vec<AsmLine>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                scopes: Scopes::new(),
                addresses: Addresses::default(),
                lines: Vec::new(),
            }
        }

        fn line(&mut self, label: Option<&str>, content: LineContent) -> Option<ContextRef> {
            let root = self.scopes.root();
            let label = label.map(|name| {
                let context = self.addresses.alloc();
                self.scopes.add_symbol(root, name.into(), Expression::Context(context));
                context
            });

            self.lines.push(AsmLine {
                label,
                scope: root,
                content,
                location: Location::new("test.spin2", self.lines.len() as u32 + 1, 1),
            });

            label
        }

        fn instruction(&mut self, label: Option<&str>, mnemonic: Mnemonic, operands: Vec<AsmOperand>) {
            let object = isa::create_object(None, mnemonic, operands, Effects::NONE).unwrap();
            self.line(label, LineContent::Instruction(object));
        }

        fn symbol(&self, name: &str) -> Expression {
            Expression::Symbol(self.scopes.root(), name.into())
        }
    }

    #[test]
    fn cog_labels_count_longs() {
        let mut fixture = Fixture::new();
        fixture.line(None, LineContent::Org(None));
        fixture.instruction(
            Some("entry"),
            Mnemonic::MOV,
            vec![
                AsmOperand::register(Expression::int(0)),
                AsmOperand::immediate(Expression::int(1)),
            ],
        );

        let value = fixture.symbol("value");
        fixture.instruction(
            Some("next"),
            Mnemonic::MOV,
            vec![AsmOperand::register(Expression::int(1)), AsmOperand::long_literal(value)],
        );

        let value = fixture.line(Some("value"), LineContent::Res(Expression::int(1))).unwrap();

        let Fixture {
            scopes,
            mut addresses,
            lines,
        } = fixture;

        let mut diagnostics = Diagnostics::new("test");
        let bytes = AsmResolver::new(&scopes, &mut addresses, 16).resolve(&lines, Start::hub(0), &mut diagnostics);

        assert!(!diagnostics.has_errors(), "{}", diagnostics);
        assert_eq!(bytes.len(), 12);
        assert_eq!(addresses.get(value).map(|address| address.address), Some(3));
    }

    #[test]
    fn fixed_point_is_stable() {
        let mut fixture = Fixture::new();

        // Un inmediato hacia una etiqueta posterior en hub requiere AUGS
        let far = fixture.symbol("far");
        fixture.instruction(
            None,
            Mnemonic::MOV,
            vec![AsmOperand::register(Expression::int(0)), AsmOperand::immediate(far)],
        );

        let padding = Located::at(
            DataValue {
                value: Expression::int(0),
                count: Some(Expression::int(0x200)),
                size: None,
            },
            Location::default(),
        );

        fixture.line(
            None,
            LineContent::Data(DataDirective {
                kind: DataType::Byte,
                values: vec![padding],
            }),
        );

        let far = fixture.line(Some("far"), LineContent::Empty).unwrap();

        let Fixture {
            scopes,
            mut addresses,
            lines,
        } = fixture;

        let mut resolver = AsmResolver::new(&scopes, &mut addresses, 16);
        let placements = resolver.converge(&lines, Start::hub(0)).unwrap();
        let (again, changed) = resolver.pass1(&lines, Start::hub(0)).unwrap();

        assert!(!changed);
        assert_eq!(placements, again);
        assert_eq!(placements[0].size, 8);
        assert_eq!(addresses.get(far).map(|address| address.address), Some(8 + 0x200));
    }

    #[test]
    fn misaligned_cog_instruction_is_fatal() {
        let mut fixture = Fixture::new();
        fixture.line(None, LineContent::Org(None));
        fixture.line(
            None,
            LineContent::Data(DataDirective {
                kind: DataType::Byte,
                values: vec![Located::at(
                    DataValue {
                        value: Expression::int(1),
                        count: None,
                        size: None,
                    },
                    Location::default(),
                )],
            }),
        );

        fixture.instruction(None, Mnemonic::NOP, vec![]);

        let mut diagnostics = Diagnostics::new("test");
        AsmResolver::new(&fixture.scopes, &mut fixture.addresses, 16).resolve(
            &fixture.lines,
            Start::hub(0),
            &mut diagnostics,
        );

        let errors: Vec<_> = diagnostics.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message(), "Cog address is not long aligned");
    }

    #[test]
    fn cog_overflow_reports_longs() {
        let mut fixture = Fixture::new();
        fixture.line(None, LineContent::Org(Some(Expression::int(0x1F0))));
        fixture.line(None, LineContent::Res(Expression::int(10)));

        let result = AsmResolver::new(&fixture.scopes, &mut fixture.addresses, 16)
            .converge(&fixture.lines, Start::hub(0));

        assert_eq!(result.unwrap_err().into_inner(), ResolveError::Overflow(2));
    }

    #[test]
    fn huge_reservations_overflow_without_wrapping() {
        for count in [1 << 30, (1 << 32) + 1] {
            let mut fixture = Fixture::new();
            fixture.line(None, LineContent::Org(None));
            fixture.line(None, LineContent::Res(Expression::int(count)));

            let result = AsmResolver::new(&fixture.scopes, &mut fixture.addresses, 16)
                .converge(&fixture.lines, Start::hub(0));

            assert_eq!(result.unwrap_err().into_inner(), ResolveError::Overflow(count - 0x1F8));
        }
    }

    #[test]
    fn jump_and_register_prefixes() {
        let mut fixture = Fixture::new();
        fixture.line(None, LineContent::Org(None));

        let top = fixture.symbol("top");
        fixture.instruction(Some("top"), Mnemonic::NOP, vec![]);
        fixture.instruction(
            None,
            Mnemonic::JMP,
            vec![AsmOperand {
                prefix: Prefix::Immediate,
                absolute: false,
                value: top,
            }],
        );

        let mut diagnostics = Diagnostics::new("test");
        let bytes = AsmResolver::new(&fixture.scopes, &mut fixture.addresses, 16).resolve(
            &fixture.lines,
            Start::hub(0),
            &mut diagnostics,
        );

        // 0 - (1 + 1) = -2
        let jump = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(jump, 0xFD90_0000 | (-2i32 as u32 & 0xF_FFFF));
    }
}
