//! Expresiones: conversión al modelo de [`Expression`] y generación de
//! bytecode para las que solo pueden evaluarse en tiempo de ejecución.

use super::{stmt::Context, Compile, CompileError};
use crate::{
    ast::{DataType, Expr, Identifier},
    bytecode::{Branch, Bytecode, Op, Setup, Slot},
    expr::{EvalError, Expression},
    scope::{ScopeId, Scopes},
    source::{Located, Location},
};

use std::rc::Rc;

/// Saltos máximos al seguir un símbolo definido como otro símbolo.
const MAX_ALIASES: usize = 16;

/// Convierte una expresión del árbol al modelo de expresiones.
///
/// Los nombres se convierten en símbolos diferidos, de modo que un
/// nombre definido más adelante en el objeto se resuelve al evaluar.
pub(super) fn lower(scopes: &Scopes, scope: ScopeId, expr: &Located<Expr>) -> Compile<Expression> {
    let lowered = match expr.val() {
        Expr::Literal(literal) => Expression::Number(*literal),
        Expr::String(string) => Expression::String(Rc::from(string.as_str())),
        Expr::Id(name) => Expression::Symbol(scope, name.clone()),

        Expr::Member { object, member, .. } => {
            Expression::Symbol(scope, object.val().qualified(member.val()))
        }

        Expr::Unary(op, operand) => Expression::Unary(*op, Box::new(lower(scopes, scope, operand)?)),

        Expr::Binary(left, op, right) => Expression::Binary(
            *op,
            Box::new(lower(scopes, scope, left)?),
            Box::new(lower(scopes, scope, right)?),
        ),

        Expr::Ternary(condition, then, otherwise) => Expression::Ternary(
            Box::new(lower(scopes, scope, condition)?),
            Box::new(lower(scopes, scope, then)?),
            Box::new(lower(scopes, scope, otherwise)?),
        ),

        Expr::AddressOf(inner) => match inner.val() {
            Expr::Id(name) => match resolve(scopes, scope, name) {
                Some(Expression::Context(context)) => Expression::HubAddress(context),
                Some(_) => return Err(not_constant(expr)),
                None => return Err(located!(inner.location(), CompileError::Undefined(name.clone()))),
            },

            _ => return Err(not_constant(expr)),
        },

        Expr::Index { .. } | Expr::Call { .. } => return Err(not_constant(expr)),
    };

    Ok(lowered)
}

/// Busca un símbolo siguiendo los que solo renombran a otro.
fn resolve(scopes: &Scopes, scope: ScopeId, name: &Identifier) -> Option<Expression> {
    let mut value = scopes.get_symbol(scope, name)?;
    for _ in 0..MAX_ALIASES {
        match value {
            Expression::Symbol(scope, name) => value = scopes.get_symbol(*scope, name)?,
            _ => break,
        }
    }

    Some(value.clone())
}

fn not_constant(expr: &Located<Expr>) -> Located<CompileError> {
    located!(expr.location(), EvalError::NotConstant(describe(expr.val())).into())
}

/// Texto breve de una expresión para mensajes de error.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Literal(literal) => literal.to_string(),
        Expr::String(string) => format!("\"{}\"", string),
        Expr::Id(name) => name.to_string(),
        Expr::Member { object, member, .. } => format!("{}.{}", object.val(), member.val()),
        Expr::Index { base, .. } => format!("{}[...]", base.val()),
        Expr::AddressOf(inner) => format!("@{}", describe(inner.val())),
        Expr::Call { method, .. } => format!("{}(...)", method.val()),
        Expr::Unary(op, _) => format!("{} ...", op.symbol()),
        Expr::Binary(_, op, _) => format!("... {} ...", op.symbol()),
        Expr::Ternary(..) => "... ? ... : ...".to_string(),
    }
}

impl Context<'_, '_> {
    fn symbol(&self, name: &Identifier) -> Option<Expression> {
        resolve(&self.unit.scopes, self.scope, name)
    }

    /// Determina si una expresión se pliega a una constante.
    fn is_static(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Literal(_) | Expr::String(_) => true,

            Expr::Id(name) => !matches!(
                self.symbol(name),
                None | Some(
                    Expression::Variable(_)
                        | Expression::Local(_)
                        | Expression::Method(_)
                        | Expression::Register(_)
                        | Expression::Context(_)
                )
            ),

            Expr::Member { object, member, .. } => {
                let name = object.val().qualified(member.val());
                !matches!(self.symbol(&name), None | Some(Expression::Method(_)))
            }

            Expr::Unary(_, operand) => self.is_static(operand.val()),
            Expr::Binary(left, _, right) => self.is_static(left.val()) && self.is_static(right.val()),
            Expr::Ternary(condition, then, otherwise) => {
                self.is_static(condition.val()) && self.is_static(then.val()) && self.is_static(otherwise.val())
            }

            Expr::AddressOf(_) | Expr::Index { .. } | Expr::Call { .. } => false,
        }
    }

    /// Genera el código que deja el valor de `expr` en la pila.
    pub(super) fn push_expr(&mut self, expr: &Located<Expr>) -> Compile<()> {
        let location = expr.location();

        if self.is_static(expr.val()) {
            let value = lower(&self.unit.scopes, self.scope, expr)?;
            return match value.number(&self.unit.scopes) {
                // Las direcciones de `DAT` se conocen al enlazar
                Ok(_) | Err(EvalError::Unresolved) => {
                    self.emit(Bytecode::Constant(value));
                    Ok(())
                }

                Err(error) => Err(located!(location, error.into())),
            };
        }

        match expr.val() {
            Expr::Id(name) => {
                if let Some(Expression::Method(_)) = self.symbol(name) {
                    let method = Located::at(name.clone(), location.clone());
                    return self.call(None, None, &method, &[], true, location);
                }

                let setup = self.variable(name, false, location)?;
                self.emit(Bytecode::Variable(setup, Op::Read));
            }

            Expr::Member { object, index, member } => {
                let index = index.as_deref();
                return self.call(Some(object), index, member, &[], true, location);
            }

            Expr::Index { base, index } => {
                self.push_expr(index)?;
                let setup = self.variable(base.val(), true, base.location())?;
                self.emit(Bytecode::Variable(setup, Op::Read));
            }

            Expr::Unary(op, operand) => {
                self.push_expr(operand)?;
                self.emit(Bytecode::Op(Op::unary(*op)));
            }

            Expr::Binary(left, op, right) => {
                self.push_expr(left)?;
                self.push_expr(right)?;
                self.emit(Bytecode::Op(Op::binary(*op)));
            }

            Expr::Ternary(condition, then, otherwise) => {
                let (alternative, exit) = (self.body.reserve(), self.body.reserve());

                self.push_expr(condition)?;
                self.emit(Bytecode::Branch(Branch::Jz, alternative));
                self.push_expr(then)?;
                self.emit(Bytecode::Branch(Branch::Jmp, exit));

                self.open_at(alternative);
                self.push_expr(otherwise)?;
                self.open_at(exit);
            }

            Expr::AddressOf(inner) => match inner.val() {
                Expr::Id(name) => {
                    let setup = self.variable(name, false, inner.location())?;
                    self.emit(Bytecode::Variable(setup, Op::Address));
                }

                Expr::Index { base, index } => {
                    self.push_expr(index)?;
                    let setup = self.variable(base.val(), true, base.location())?;
                    self.emit(Bytecode::Variable(setup, Op::Address));
                }

                _ => return Err(not_constant(expr)),
            },

            Expr::Call {
                object,
                index,
                method,
                args,
            } => {
                let index = index.as_deref();
                return self.call(object.as_ref(), index, method, args, true, location);
            }

            Expr::Literal(_) | Expr::String(_) => return Err(not_constant(expr)),
        }

        Ok(())
    }

    /// Acceso a una variable por nombre. Con `indexed`, el índice ya debe
    /// estar en la pila.
    pub(super) fn variable(&mut self, name: &Identifier, indexed: bool, location: &Location) -> Compile<Setup> {
        let (slot, kind) = match self.symbol(name) {
            Some(Expression::Local(local)) => {
                local.mark_used();
                let kind = local.kind;
                (Slot::Local(local), kind)
            }

            Some(Expression::Variable(var)) => {
                var.mark_used();
                let kind = var.kind;
                (Slot::Var(var), kind)
            }

            Some(Expression::Context(context)) => {
                let kind = self.unit.labels.get(&context).copied().unwrap_or(DataType::Long);
                (Slot::Dat(Expression::HubAddress(context)), kind)
            }

            Some(Expression::Register(register)) => (Slot::Register(Expression::Register(register)), DataType::Long),

            Some(_) if indexed => return Err(located!(location, CompileError::NotIndexable(name.clone()))),
            Some(_) => return Err(located!(location, CompileError::NotAssignable)),
            None => return Err(located!(location, CompileError::Undefined(name.clone()))),
        };

        if indexed && matches!(slot, Slot::Register(_)) {
            return Err(located!(location, CompileError::NotIndexable(name.clone())));
        }

        Ok(Setup { slot, kind, indexed })
    }

    /// Destino de una asignación: el acceso y, si lo hay, el índice que
    /// debe empujarse justo antes de usarlo.
    pub(super) fn target<'e>(&mut self, target: &'e Located<Expr>) -> Compile<(Setup, Option<&'e Located<Expr>>)> {
        match target.val() {
            Expr::Id(name) => {
                if let Some(Expression::Variable(_) | Expression::Local(_) | Expression::Context(_) | Expression::Register(_)) =
                    self.symbol(name)
                {
                    Ok((self.variable(name, false, target.location())?, None))
                } else if self.symbol(name).is_none() {
                    Err(located!(target.location(), CompileError::Undefined(name.clone())))
                } else {
                    Err(located!(target.location(), CompileError::NotAssignable))
                }
            }

            Expr::Index { base, index } => Ok((self.variable(base.val(), true, base.location())?, Some(&**index))),
            _ => Err(located!(target.location(), CompileError::NotAssignable)),
        }
    }

    /// Llamada a un método propio o de un objeto hijo.
    ///
    /// Con `push`, el primer resultado queda en la pila; de lo contrario
    /// se descarta.
    pub(super) fn call(
        &mut self,
        object: Option<&Located<Identifier>>,
        index: Option<&Located<Expr>>,
        method: &Located<Identifier>,
        args: &[Located<Expr>],
        push: bool,
        location: &Location,
    ) -> Compile<()> {
        let name = match object {
            Some(object) => {
                if self.unit.links.get(object.val()).is_none() {
                    let error = CompileError::NotAnObject(object.val().clone());
                    return Err(located!(object.location(), error));
                }

                object.val().qualified(method.val())
            }

            None => method.val().clone(),
        };

        let reference = match self.symbol(&name) {
            Some(Expression::Method(reference)) => reference,
            Some(_) => return Err(located!(method.location(), CompileError::NotAMethod(name))),
            None => return Err(located!(method.location(), CompileError::Undefined(name))),
        };

        if args.len() != reference.parameters as usize {
            let error = CompileError::ArgumentCount {
                method: name,
                expected: reference.parameters,
                found: args.len(),
            };

            return Err(located!(location, error));
        } else if push && reference.returns == 0 {
            return Err(located!(location, CompileError::NoResult(name)));
        }

        self.emit(Bytecode::Op(if push { Op::AnchorPush } else { Op::Anchor }));
        for arg in args {
            self.push_expr(arg)?;
        }

        if let Some(index) = index {
            self.push_expr(index)?;
        }

        reference.mark_used();
        self.calls.push(Rc::clone(&reference));
        self.emit(Bytecode::Call {
            method: reference,
            indexed: index.is_some(),
        });

        Ok(())
    }
}
