//! Conversión de líneas de ensamblador del árbol a [`AsmLine`].

use super::{eval, Compile, CompileError, Unit};
use crate::{
    ast::{DataLine, DataType, Expr, Operand},
    expr::Expression,
    ir::{AsmLine, LineContent},
    isa::{self, AsmOperand, Condition, DataDirective, DataValue, Directive, EncodeError, Effects, Mnemonic},
    link::LinkError,
    scope::ScopeId,
    source::{Located, Location},
};

impl Unit<'_> {
    /// Convierte una secuencia de líneas.
    ///
    /// Todas las etiquetas se registran antes de convertir operandos, de
    /// modo que `@etiqueta` funcione hacia adelante. Las etiquetas
    /// globales viven en `scope`; cada una abre un alcance propio para
    /// las etiquetas locales (`.nombre`) que la siguen.
    pub(super) fn assemble(&mut self, lines: &[&Located<DataLine>], scope: ScopeId) -> Vec<AsmLine> {
        let mut local = self.scopes.push(scope);
        let mut labels = Vec::with_capacity(lines.len());

        for line in lines {
            let data = line.val();
            let label = match &data.label {
                None => None,
                Some(name) => {
                    let context = self.addresses.alloc();
                    let target = if name.val().is_local_label() {
                        local
                    } else {
                        local = self.scopes.push(scope);
                        scope
                    };

                    self.define(target, name, Expression::Context(context));
                    self.labels.insert(context, label_kind(data));
                    Some(context)
                }
            };

            labels.push((label, local));
        }

        let mut out = Vec::with_capacity(lines.len());
        for (line, (label, scope)) in lines.iter().zip(labels) {
            match self.line_content(line, scope) {
                Ok(content) => out.push(AsmLine {
                    label,
                    scope,
                    content,
                    location: line.location().clone(),
                }),

                Err(error) => self.diagnostics.fatal(error),
            }
        }

        out
    }

    fn line_content(&self, line: &Located<DataLine>, scope: ScopeId) -> Compile<LineContent> {
        let (location, data) = (line.location(), line.val());
        let mnemonic = match &data.mnemonic {
            Some(mnemonic) => mnemonic,
            None => return Ok(LineContent::Empty),
        };

        let name = mnemonic.val().as_ref();
        if let Ok(directive) = name.parse::<Directive>() {
            if data.condition.is_some() || data.effect.is_some() {
                return Err(located!(location, CompileError::DirectiveModifiers(name.to_string())));
            }

            return self.directive(directive, &data.operands, scope, location);
        }

        let encode_error = |error: EncodeError, location: &Location| -> Located<CompileError> {
            located!(location, error.into())
        };

        let instruction: Mnemonic = name
            .parse()
            .map_err(|error| encode_error(error, mnemonic.location()))?;

        let condition = match &data.condition {
            Some(condition) => Some(
                condition
                    .val()
                    .as_ref()
                    .parse::<Condition>()
                    .map_err(|error| encode_error(error, condition.location()))?,
            ),

            None => None,
        };

        let effects = match &data.effect {
            Some(effect) => effect
                .val()
                .as_ref()
                .parse::<Effects>()
                .map_err(|error| encode_error(error, effect.location()))?,

            None => Effects::NONE,
        };

        let operands = data
            .operands
            .iter()
            .map(|operand| {
                let value = eval::lower(&self.scopes, scope, &operand.val().value)?;
                Ok(AsmOperand {
                    prefix: operand.val().prefix,
                    absolute: operand.val().absolute,
                    value,
                })
            })
            .collect::<Compile<Vec<_>>>()?;

        let object = isa::create_object(condition, instruction, operands, effects)
            .map_err(|error| encode_error(error, location))?;

        Ok(LineContent::Instruction(object))
    }

    fn directive(
        &self,
        directive: Directive,
        operands: &[Located<Operand>],
        scope: ScopeId,
        location: &Location,
    ) -> Compile<LineContent> {
        let operand = |index: usize| -> Compile<Option<Expression>> {
            match operands.get(index) {
                Some(operand) => Ok(Some(eval::lower(&self.scopes, scope, &operand.val().value)?)),
                None => Ok(None),
            }
        };

        let content = match directive {
            Directive::Byte | Directive::Word | Directive::Long => {
                let kind = match directive {
                    Directive::Byte => DataType::Byte,
                    Directive::Word => DataType::Word,
                    _ => DataType::Long,
                };

                let values = operands
                    .iter()
                    .map(|operand| {
                        let (location, operand) = (operand.location(), operand.val());
                        let count = match &operand.count {
                            Some(count) => Some(eval::lower(&self.scopes, scope, count)?),
                            None => None,
                        };

                        let value = DataValue {
                            value: eval::lower(&self.scopes, scope, &operand.value)?,
                            count,
                            size: operand.size,
                        };

                        Ok(Located::at(value, location.clone()))
                    })
                    .collect::<Compile<Vec<_>>>()?;

                LineContent::Data(DataDirective { kind, values })
            }

            Directive::File => {
                let name = match operands.first().map(|operand| operand.val().value.val()) {
                    Some(Expr::String(name)) => name,
                    _ => return Err(located!(location, CompileError::ExpectedFileName)),
                };

                let contents = self
                    .compiler
                    .loader
                    .load(name)
                    .ok_or_else(|| located!(location, CompileError::from(LinkError::FileNotFound(name.clone()))))?;

                LineContent::File(contents)
            }

            Directive::Res => LineContent::Res(operand(0)?.unwrap_or_else(|| Expression::int(1))),
            Directive::AlignW => LineContent::Align(2),
            Directive::AlignL => LineContent::Align(4),
            Directive::Org => LineContent::Org(operand(0)?),
            Directive::Orgh => LineContent::Orgh(operand(0)?),
            Directive::Fit => LineContent::Fit(operand(0)?),

            Directive::Orgf => match operand(0)? {
                Some(target) => LineContent::Orgf(target),
                None => {
                    let error = EncodeError::InvalidArguments {
                        mnemonic: "ORGF",
                        expected: "address",
                    };

                    return Err(located!(location, error.into()));
                }
            },
        };

        Ok(content)
    }
}

/// Tamaño de dato que se asocia a una etiqueta al leerla desde un método.
fn label_kind(line: &DataLine) -> DataType {
    let directive = line
        .mnemonic
        .as_ref()
        .and_then(|mnemonic| mnemonic.val().as_ref().parse::<Directive>().ok());

    match directive {
        Some(Directive::Byte) => DataType::Byte,
        Some(Directive::Word) => DataType::Word,
        _ => DataType::Long,
    }
}
