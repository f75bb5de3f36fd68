//! Compilación de sentencias.
//!
//! Cada sentencia abre una o más líneas en el árbol del método. Las
//! construcciones de control abren una línea contenedora cuyos hijos son
//! sus propias líneas; las líneas de salida que aún no tienen contenido
//! se reservan con [`MethodBody::reserve`] y se ubican cuando se conoce
//! su posición.

use super::{Compile, CompileError, CompileOptions, InlineBlock, Unit};
use crate::{
    ast::{Branch as IfBranch, CaseLabel, DataLine, DataType, DebugArg, Expr, Identifier, Statement},
    bytecode::{Branch, Bytecode, Op},
    expr::{Expression, MethodRef},
    ir::{AsmLine, LineContent, LineId, MethodBody, Target},
    isa::{self, Directive, Effects, Mnemonic},
    scope::ScopeId,
    source::{Located, Location},
};

use std::rc::Rc;

/// Registro de cog donde se copian las primeras locales de un método
/// antes de ejecutar ensamblador en línea.
const INLINE_LOCALS: u32 = 0x1E0;
const INLINE_LOCAL_COUNT: u32 = 16;

/// Estado de la compilación de un cuerpo de método.
pub(super) struct Context<'u, 'a> {
    pub(super) unit: &'u mut Unit<'a>,
    pub(super) scope: ScopeId,
    pub(super) body: MethodBody,
    pub(super) calls: Vec<Rc<MethodRef>>,
    method: usize,

    /// Línea cuyos hijos se están generando.
    parent: LineId,

    /// Línea que recibe el código emitido.
    line: LineId,
}

impl<'u, 'a> Context<'u, 'a> {
    pub(super) fn new(unit: &'u mut Unit<'a>, method: usize, scope: ScopeId) -> Self {
        let body = MethodBody::new();
        let root = body.root();

        Context {
            unit,
            scope,
            body,
            calls: Vec::new(),
            method,
            parent: root,
            line: root,
        }
    }

    /// Compila una secuencia de sentencias. Un error fatal se reporta y
    /// la compilación sigue con la próxima sentencia.
    pub(super) fn block(&mut self, statements: &[Located<Statement>]) {
        for statement in statements {
            let parent = self.parent;
            if let Err(error) = self.statement(statement) {
                self.unit.diagnostics.fatal(error);
            }

            self.parent = parent;
        }
    }

    /// Retorno implícito al final del método.
    pub(super) fn terminate(&mut self) {
        self.parent = self.body.root();
        self.open();
        self.emit(Bytecode::Op(Op::ReturnResults));
    }

    pub(super) fn finish(self) -> (MethodBody, Vec<Rc<MethodRef>>) {
        (self.body, self.calls)
    }

    pub(super) fn emit(&mut self, code: Bytecode) {
        self.body.push(self.line, code);
    }

    /// Abre una línea nueva al final del padre actual.
    pub(super) fn open(&mut self) -> LineId {
        self.line = self.body.add(self.parent);
        self.line
    }

    /// Ubica una línea reservada al final del padre actual.
    pub(super) fn open_at(&mut self, line: LineId) {
        self.body.place(self.parent, line);
        self.line = line;
    }

    /// Abre una línea contenedora y la convierte en el padre actual.
    /// Retorna el contenedor y el padre anterior.
    fn container(&mut self) -> (LineId, LineId) {
        let saved = self.parent;
        let container = self.open();
        self.parent = container;

        (container, saved)
    }

    /// Cierra un contenedor y ubica su línea de salida tras él.
    fn close(&mut self, saved: LineId, exit: LineId) {
        self.parent = saved;
        self.open_at(exit);
    }

    fn statement(&mut self, statement: &Located<Statement>) -> Compile<()> {
        let location = statement.location();

        match statement.val() {
            Statement::If { branches, otherwise } => self.conditional(branches, otherwise.as_deref())?,

            Statement::While {
                condition,
                until,
                post,
                body,
            } => self.pre_or_post(condition, *until, *post, body)?,

            Statement::Repeat { count: None, body } => {
                let (container, saved) = self.container();
                let (next, exit) = (self.body.reserve(), self.body.reserve());
                self.loop_targets(container, next, exit);

                let top = self.open();
                self.block(body);

                self.open_at(next);
                self.emit(Bytecode::Branch(Branch::Jmp, top));
                self.close(saved, exit);
            }

            Statement::Repeat { count: Some(count), body } => {
                let (container, saved) = self.container();
                let (next, exit) = (self.body.reserve(), self.body.reserve());
                self.body.set_stack(container, 1);

                self.open();
                self.push_expr(count)?;
                self.emit(Bytecode::Branch(Branch::Tjz, exit));

                self.loop_targets(container, next, exit);
                let top = self.open();
                self.block(body);

                self.open_at(next);
                self.emit(Bytecode::Branch(Branch::Djnz, top));
                self.close(saved, exit);
            }

            Statement::RepeatRange {
                variable,
                from,
                to,
                step,
                body,
            } => {
                let (container, saved) = self.container();
                let (next, exit) = (self.body.reserve(), self.body.reserve());

                // Inicio, fin, paso y dirección de la variable
                self.body.set_stack(container, 4);

                self.open();
                self.push_expr(from)?;
                self.push_expr(to)?;
                match step {
                    Some(step) => self.push_expr(step)?,
                    None => self.emit(Bytecode::Constant(Expression::int(1))),
                }

                let (setup, index) = self.target(variable)?;
                if let Some(index) = index {
                    self.push_expr(index)?;
                }

                self.emit(Bytecode::Variable(setup, Op::RepeatVarInit));

                self.loop_targets(container, next, exit);
                let top = self.open();
                self.block(body);

                self.open_at(next);
                self.emit(Bytecode::Branch(Branch::RepeatLoop, top));
                self.close(saved, exit);
            }

            Statement::For {
                init,
                condition,
                step,
                body,
            } => {
                self.block(init);

                let (container, saved) = self.container();
                let (next, exit) = (self.body.reserve(), self.body.reserve());
                self.loop_targets(container, next, exit);

                let top = self.open();
                if let Some(condition) = condition {
                    self.push_expr(condition)?;
                    self.emit(Bytecode::Branch(Branch::Jz, exit));
                }

                self.block(body);

                self.open_at(next);
                self.block(step);
                self.open();
                self.emit(Bytecode::Branch(Branch::Jmp, top));
                self.close(saved, exit);
            }

            Statement::Switch {
                value,
                cases,
                default,
                breakable,
            } => {
                let (container, saved) = self.container();
                let exit = self.body.reserve();

                // Dirección de salida y valor evaluado
                self.body.set_stack(container, 2);
                if *breakable {
                    self.body.set_target(container, Target::Break, exit);
                }

                self.open();
                self.emit(Bytecode::Branch(Branch::PushTarget, exit));
                self.push_expr(value)?;

                let bodies: Vec<LineId> = cases.iter().map(|_| self.body.reserve()).collect();
                for (case, &line) in cases.iter().zip(&bodies) {
                    for label in &case.labels {
                        match label {
                            CaseLabel::Value(value) => {
                                self.push_expr(value)?;
                                self.emit(Bytecode::Branch(Branch::CaseValue, line));
                            }

                            CaseLabel::Range(low, high) => {
                                self.push_expr(low)?;
                                self.push_expr(high)?;
                                self.emit(Bytecode::Branch(Branch::CaseRange, line));
                            }
                        }
                    }
                }

                // Sin coincidencias se ejecuta `default`, o se sale
                if let Some(default) = default {
                    self.block(default);
                }

                self.open();
                self.emit(Bytecode::Op(Op::CaseDone));

                for (case, line) in cases.iter().zip(bodies) {
                    self.open_at(line);
                    self.block(&case.body);
                    self.open();
                    self.emit(Bytecode::Op(Op::CaseDone));
                }

                self.close(saved, exit);
            }

            Statement::Break => self.jump(Target::Break, location)?,
            Statement::Continue => self.jump(Target::Continue, location)?,

            Statement::Return(value) => {
                self.open();
                match value {
                    None => self.emit(Bytecode::Op(Op::ReturnResults)),
                    Some(value) => {
                        self.push_expr(value)?;
                        self.emit(Bytecode::Op(Op::ReturnArgs));
                    }
                }
            }

            Statement::Abort(value) => {
                self.open();
                match value {
                    None => self.emit(Bytecode::Op(Op::Abort)),
                    Some(value) => {
                        self.push_expr(value)?;
                        self.emit(Bytecode::Op(Op::AbortArg));
                    }
                }
            }

            Statement::Assign { target, op, value } => {
                self.open();
                let (setup, index) = self.target(target)?;

                if let Some(op) = op {
                    if let Some(index) = index {
                        self.push_expr(index)?;
                    }

                    self.emit(Bytecode::Variable(setup.clone(), Op::Read));
                    self.push_expr(value)?;
                    self.emit(Bytecode::Op(Op::binary(*op)));
                } else {
                    self.push_expr(value)?;
                }

                if let Some(index) = index {
                    self.push_expr(index)?;
                }

                self.emit(Bytecode::Variable(setup, Op::Write));
            }

            Statement::Expression(expr) => {
                self.open();
                match expr.val() {
                    Expr::Call {
                        object,
                        index,
                        method,
                        args,
                    } => self.call(object.as_ref(), index.as_deref(), method, args, false, location)?,

                    Expr::Id(name) if self.is_method(name) => {
                        let method = Located::at(name.clone(), expr.location().clone());
                        self.call(None, None, &method, &[], false, location)?;
                    }

                    _ => {
                        self.push_expr(expr)?;
                        self.emit(Bytecode::Pop(4));
                    }
                }
            }

            Statement::InlineAsm(lines) => self.inline(lines, location)?,

            Statement::Debug(arguments) => {
                if !self.unit.options().contains(CompileOptions::DEBUG) {
                    return Ok(());
                }

                self.open();

                let mut values = 0u8;
                for argument in arguments {
                    if let DebugArg::Value { expr, .. } = argument {
                        self.push_expr(expr)?;
                        values = values.saturating_add(1);
                    }
                }

                let record = self
                    .unit
                    .debug
                    .add(arguments)
                    .map_err(|error| located!(location, CompileError::from(error)))?;

                self.emit(Bytecode::Debug { values, record });
            }
        }

        Ok(())
    }

    fn is_method(&self, name: &Identifier) -> bool {
        matches!(self.unit.scopes.get_symbol(self.scope, name), Some(Expression::Method(_)))
    }

    fn loop_targets(&mut self, container: LineId, next: LineId, exit: LineId) {
        self.body.set_target(container, Target::Break, exit);
        self.body.set_target(container, Target::Continue, next);
    }

    /// `if`, `elseif` y `else`.
    ///
    /// Cada condición salta a la siguiente prueba; sin `else`, la última
    /// salta directamente a la salida.
    fn conditional(&mut self, branches: &[IfBranch], otherwise: Option<&[Located<Statement>]>) -> Compile<()> {
        let (_, saved) = self.container();
        let exit = self.body.reserve();
        let mut next: Option<LineId> = None;

        for (i, branch) in branches.iter().enumerate() {
            match next.take() {
                Some(line) => self.open_at(line),
                None => {
                    self.open();
                }
            }

            let last = i + 1 == branches.len();
            let falls_out = last && otherwise.is_none();
            let target = if falls_out { exit } else { self.body.reserve() };

            self.push_expr(&branch.condition)?;
            let jump = if branch.negate { Branch::Jnz } else { Branch::Jz };
            self.emit(Bytecode::Branch(jump, target));

            self.block(&branch.body);

            if !falls_out {
                self.open();
                self.emit(Bytecode::Branch(Branch::Jmp, exit));
                next = Some(target);
            }
        }

        if let Some(otherwise) = otherwise {
            if let Some(line) = next.take() {
                self.open_at(line);
            }

            self.block(otherwise);
        }

        self.close(saved, exit);
        Ok(())
    }

    /// `repeat while`/`until` con la prueba al inicio o al final.
    fn pre_or_post(
        &mut self,
        condition: &Located<Expr>,
        until: bool,
        post: bool,
        body: &[Located<Statement>],
    ) -> Compile<()> {
        let (container, saved) = self.container();
        let exit = self.body.reserve();

        if post {
            let next = self.body.reserve();
            self.loop_targets(container, next, exit);

            let top = self.open();
            self.block(body);

            self.open_at(next);
            self.push_expr(condition)?;
            let jump = if until { Branch::Jz } else { Branch::Jnz };
            self.emit(Bytecode::Branch(jump, top));
        } else {
            let top = self.open();
            self.loop_targets(container, top, exit);

            self.push_expr(condition)?;
            let jump = if until { Branch::Jnz } else { Branch::Jz };
            self.emit(Bytecode::Branch(jump, exit));

            self.block(body);
            self.open();
            self.emit(Bytecode::Branch(Branch::Jmp, top));
        }

        self.close(saved, exit);
        Ok(())
    }

    /// `break` o `continue`, descartando lo que los contenedores
    /// intermedios mantienen en la pila.
    fn jump(&mut self, target: Target, location: &Location) -> Compile<()> {
        let (destination, pops) = match self.body.find_target(self.parent, target) {
            Some(found) => found,
            None => {
                let error = match target {
                    Target::Break => CompileError::MisplacedBreak,
                    Target::Continue => CompileError::MisplacedContinue,
                };

                return Err(located!(location, error));
            }
        };

        self.open();
        if pops > 0 {
            self.emit(Bytecode::Pop(pops * 4));
        }

        self.emit(Bytecode::Branch(Branch::Jmp, destination));
        Ok(())
    }

    /// Bloque `ORG`...`END`.
    ///
    /// Las primeras locales long del método quedan visibles como
    /// registros a partir de `$1E0`. El bloque se ensambla al resolver
    /// `DAT`, ya que puede referirse a sus etiquetas; mientras tanto el
    /// bytecode queda con el código vacío.
    fn inline(&mut self, lines: &[Located<DataLine>], location: &Location) -> Compile<()> {
        let scope = self.unit.scopes.push(self.scope);

        let registers: Vec<_> = self.unit.methods[self.method]
            .frame
            .iter()
            .filter(|local| local.kind == DataType::Long && local.offset % 4 == 0)
            .filter(|local| local.offset / 4 < INLINE_LOCAL_COUNT)
            .map(|local| {
                local.mark_used();
                (local.name.clone(), INLINE_LOCALS + local.offset / 4)
            })
            .collect();

        for (name, register) in registers {
            self.unit
                .scopes
                .add_builtin_symbol(scope, name, Expression::Register(register));
        }

        let mut origin = 0;
        let mut code = Vec::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            let data = line.val();
            let directive = data
                .mnemonic
                .as_ref()
                .and_then(|mnemonic| mnemonic.val().as_ref().parse::<Directive>().ok());

            // Un `ORG` inicial solo fija el origen
            if i == 0 && directive == Some(Directive::Org) && data.label.is_none() {
                if let Some(operand) = data.operands.first() {
                    origin = self.unit.constant_value(&operand.val().value, scope)?;
                }

                continue;
            }

            code.push(line);
        }

        let mut assembled = self.unit.assemble(&code, scope);

        let ret = isa::create_object(None, Mnemonic::RET, Vec::new(), Effects::NONE)
            .map_err(|error| located!(location, CompileError::from(error)))?;

        assembled.push(AsmLine {
            label: None,
            scope,
            content: LineContent::Instruction(ret),
            location: location.clone(),
        });

        self.open();
        self.emit(Bytecode::Inline {
            origin: origin as u32,
            code: Vec::new(),
        });

        let slot = self.body.code(self.line).len() - 1;
        self.unit.inline.push(InlineBlock {
            method: self.method,
            line: self.line,
            slot,
            origin,
            lines: assembled,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ast::{self, Branch, Case, CaseLabel, Expr, MethodDecl, Node, Statement},
        bytecode::Op,
        compile::{Compilation, Compiler, Config},
        error::Diagnostic,
        expr::BinaryOp,
        link::{MapLoader, MapResolver},
        source::{Located, Location},
    };

    fn at<T>(value: T) -> Located<T> {
        Located::at(value, Location::default())
    }

    fn method(name: &str, locals: &[&str], body: Vec<Statement>) -> Node {
        let locals = locals
            .iter()
            .map(|&name| ast::LocalDecl {
                kind: ast::DataType::Long,
                name: at(name.into()),
                count: None,
            })
            .collect();

        Node::Method(at(MethodDecl {
            public: true,
            name: at(name.into()),
            parameters: vec![],
            results: vec![],
            locals,
            body: body.into_iter().map(at).collect(),
        }))
    }

    fn compile(nodes: Vec<Node>) -> Compilation {
        let resolver = MapResolver::new();
        let loader = MapLoader::new();
        let object = ast::Object {
            name: "stmt".to_string(),
            nodes,
        };

        Compiler::new(&resolver, &loader, Config::default()).compile(&object)
    }

    fn assign(name: &str, value: i64) -> Statement {
        Statement::Assign {
            target: at(Expr::id(name)),
            op: None,
            value: at(Expr::number(value)),
        }
    }

    #[test]
    fn misplaced_break_is_fatal() {
        let compilation = compile(vec![method("main", &[], vec![Statement::Break])]);

        assert!(compilation.image.is_none());
        assert_eq!(
            compilation.diagnostics.errors().next().map(Diagnostic::message),
            Some("`break` outside of a loop or switch")
        );
    }

    #[test]
    fn method_body_bytes() {
        // x := 3, luego retorno implícito
        let compilation = compile(vec![method("main", &["x"], vec![assign("x", 3)])]);
        assert!(compilation.succeeded(), "{}", compilation.diagnostics);

        let bytes = compilation.image.unwrap().bytes;

        // Entrada de método, centinela, constante 3, escritura rápida y retorno
        assert_eq!(&bytes[8..], &[0xA4, 0xE0, Op::ReturnResults as u8]);
        assert_eq!(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0x8000_0008);
    }

    #[test]
    fn loops_pop_their_stack_on_break() {
        let body = vec![Statement::Repeat {
            count: Some(at(Expr::number(5))),
            body: vec![at(Statement::Break)],
        }];

        let compilation = compile(vec![method("main", &[], body)]);
        assert!(compilation.succeeded(), "{}", compilation.diagnostics);

        let bytes = compilation.image.unwrap().bytes;
        let code = &bytes[8..];

        // [5] TJZ salida, POP 4, JMP salida, DJNZ inicio, RETURN
        assert_eq!(code[0], 0xA6);
        assert_eq!(code[1], Op::Tjz as u8);
        assert_eq!(&code[3..5], &[Op::Pop as u8, 4]);
        assert_eq!(code[5], Op::Jmp as u8);
        assert_eq!(code[7], Op::Djnz as u8);
        assert_eq!(code[9], Op::ReturnResults as u8);
    }

    #[test]
    fn compound_assignment_reads_then_writes() {
        let body = vec![Statement::Assign {
            target: at(Expr::id("x")),
            op: Some(BinaryOp::Add),
            value: at(Expr::number(2)),
        }];

        let compilation = compile(vec![method("main", &["x"], body)]);
        let bytes = compilation.image.unwrap().bytes;

        assert_eq!(&bytes[8..], &[0xD0, 0xA3, Op::Add as u8, 0xE0, Op::ReturnResults as u8]);
    }

    #[test]
    fn switch_without_default_ends_tests_with_case_done() {
        let body = vec![Statement::Switch {
            value: at(Expr::id("x")),
            cases: vec![Case {
                labels: vec![CaseLabel::Value(at(Expr::number(1)))],
                body: vec![at(assign("x", 2))],
            }],
            default: None,
            breakable: false,
        }];

        let compilation = compile(vec![method("main", &["x"], body)]);
        let code = &compilation.image.unwrap().bytes[8..];

        // PUSHTARGET, x, [1] CASEVALUE, CASEDONE, caso, CASEDONE
        assert_eq!(code[0], Op::PushTarget as u8);
        assert_eq!(code[2], 0xD0);
        assert_eq!(code[3], 0xA2);
        assert_eq!(code[4], Op::CaseValue as u8);
        assert_eq!(code[6], Op::CaseDone as u8);
        assert_eq!(&code[7..10], &[0xA3, 0xE0, Op::CaseDone as u8]);
    }

    #[test]
    fn switch_default_follows_tests_and_break_pops_both_longs() {
        let body = vec![Statement::Switch {
            value: at(Expr::id("x")),
            cases: vec![Case {
                labels: vec![CaseLabel::Value(at(Expr::number(1)))],
                body: vec![at(assign("x", 2))],
            }],
            default: Some(vec![at(assign("x", 3)), at(Statement::Break)]),
            breakable: true,
        }];

        let compilation = compile(vec![method("main", &["x"], body)]);
        assert!(compilation.succeeded(), "{}", compilation.diagnostics);

        let code = &compilation.image.unwrap().bytes[8..];

        // PUSHTARGET salida, x, [1] CASEVALUE caso, x := 3, POP 8, JMP salida,
        // CASEDONE, caso, CASEDONE, RETURN
        assert_eq!(
            code,
            &[
                Op::PushTarget as u8,
                14,
                0xD0,
                0xA2,
                Op::CaseValue as u8,
                7,
                0xA4,
                0xE0,
                Op::Pop as u8,
                8,
                Op::Jmp as u8,
                4,
                Op::CaseDone as u8,
                0xA3,
                0xE0,
                Op::CaseDone as u8,
                Op::ReturnResults as u8,
            ]
        );
    }

    #[test]
    fn if_without_else_jumps_to_exit() {
        let body = vec![Statement::If {
            branches: vec![Branch {
                condition: at(Expr::id("x")),
                negate: false,
                body: vec![at(assign("x", 0))],
            }],
            otherwise: None,
        }];

        let compilation = compile(vec![method("main", &["x"], body)]);
        let code = &compilation.image.unwrap().bytes[8..];

        // x, JZ +2, x := 0, RETURN
        assert_eq!(code, &[0xD0, Op::Jz as u8, 2, 0xA1, 0xE0, Op::ReturnResults as u8]);
    }

    #[test]
    fn calls_check_arguments() {
        let call = Statement::Expression(at(Expr::Call {
            object: None,
            index: None,
            method: at("helper".into()),
            args: vec![at(Expr::number(1))],
        }));

        let compilation = compile(vec![method("main", &[], vec![call]), method("helper", &[], vec![])]);
        assert_eq!(
            compilation.diagnostics.errors().next().map(Diagnostic::message),
            Some("Method `helper` expects 0 arguments, found 1")
        );
    }

    #[test]
    fn calls_use_method_index() {
        let call = Statement::Expression(at(Expr::Call {
            object: None,
            index: None,
            method: at("helper".into()),
            args: vec![],
        }));

        let compilation = compile(vec![method("main", &[], vec![call]), method("helper", &[], vec![])]);
        assert!(compilation.succeeded(), "{}", compilation.diagnostics);

        // Dos entradas y el centinela
        let code = &compilation.image.unwrap().bytes[12..];
        assert_eq!(&code[..3], &[Op::Anchor as u8, Op::CallSub as u8, 1]);
    }
}
