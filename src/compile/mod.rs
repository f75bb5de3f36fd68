//! Compilación de objetos.
//!
//! Un [`Compiler`] recibe el árbol de un objeto y lo lleva hasta una
//! [`ObjectImage`]. Las fases ocurren en este orden:
//!
//! 1. Selección de nodos según `#define` e `#ifdef`.
//! 2. Constantes (`CON`), incluidas las enumeraciones, y derivación del
//!    modo de reloj a partir de los símbolos `_CLKFREQ` y similares.
//! 3. Objetos hijos (`OBJ`), cuyos símbolos se exponen como
//!    `alias.nombre`.
//! 4. Variables (`VAR`) y declaraciones de métodos.
//! 5. Líneas de ensamblador (`DAT`).
//! 6. Cuerpos de métodos, en [`stmt`] y [`eval`].
//! 7. Revisión de símbolos sin uso y eliminación de métodos muertos.
//! 8. Resolución de direcciones y enlazado.
//!
//! Un error fatal aborta únicamente la construcción que lo produjo; el
//! resto del objeto se sigue analizando para reportar tantos errores
//! como sea posible. La imagen solo se produce si no hubo errores.

mod asm;
mod eval;
mod stmt;

use crate::{
    ast::{self, ConstantDecl, DataType, Identifier, MethodDecl, Node},
    bytecode::Bytecode,
    clock::{self, ClockError, ClockRequest, ClockSetting, Source},
    debug::{DebugData, DebugError, DEBUG_LIMIT},
    error::{Diagnostic, Diagnostics},
    expr::{BinaryOp, ContextRef, EvalError, Expression, LocalVariable, MethodRef, Variable},
    ir::{Addresses, AsmLine, LineId, MethodBody},
    isa::EncodeError,
    link::{self, ExportedMethod, FileLoader, LinkError, Links, ObjectImage, ObjectResolver},
    resolve::{self, AsmResolver, Environment, ResolveError, Start},
    scope::{ScopeId, Scopes},
    source::{Located, Location},
};

use bitflags::bitflags;
use std::{collections::HashMap, rc::Rc};
use thiserror::Error;

bitflags! {
    /// Opciones de compilación.
    pub struct CompileOptions: u32 {
        /// Compilar sentencias `DEBUG()` y emitir datos de depuración.
        const DEBUG = 0x01;

        /// Eliminar métodos `PRI` que nadie llama.
        const REMOVE_UNUSED_METHODS = 0x02;

        /// No reservar espacio para variables `VAR` sin uso.
        const REMOVE_UNUSED_VARIABLES = 0x04;

        /// Advertir sobre métodos, variables y locales sin uso.
        const WARN_UNUSED = 0x08;
    }
}

/// Configuración de una compilación.
#[derive(Clone, Debug)]
pub struct Config {
    pub options: CompileOptions,

    /// Tolerancia del modo de reloj si no se define `_ERRFREQ`.
    pub clock_tolerance: u32,

    /// Máximo de iteraciones de los puntos fijos de resolución.
    pub iteration_limit: usize,

    /// Tamaño máximo de los datos de depuración.
    pub debug_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            options: CompileOptions::empty(),
            clock_tolerance: clock::DEFAULT_ERROR,
            iteration_limit: 256,
            debug_limit: DEBUG_LIMIT,
        }
    }
}

pub type Compile<T> = Result<T, Located<CompileError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("`{0}` is not a method")]
    NotAMethod(Identifier),

    #[error("`{0}` is not an object")]
    NotAnObject(Identifier),

    #[error("Method `{method}` expects {expected} arguments, found {found}")]
    ArgumentCount {
        method: Identifier,
        expected: u32,
        found: usize,
    },

    #[error("Method `{0}` does not return a value")]
    NoResult(Identifier),

    #[error("Expression is not assignable")]
    NotAssignable,

    #[error("`{0}` cannot be indexed")]
    NotIndexable(Identifier),

    #[error("`break` outside of a loop or switch")]
    MisplacedBreak,

    #[error("`continue` outside of a loop")]
    MisplacedContinue,

    #[error("Directive `{0}` takes no condition or effect")]
    DirectiveModifiers(String),

    #[error("Expected a file name")]
    ExpectedFileName,

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Debug(#[from] DebugError),
}

/// Resultado de compilar un objeto.
#[derive(Debug)]
pub struct Compilation {
    /// Imagen final, ausente si hubo errores.
    pub image: Option<ObjectImage>,

    /// Datos de depuración, solo con [`CompileOptions::DEBUG`].
    pub debug: Option<Vec<u8>>,

    pub diagnostics: Diagnostics,
}

impl Compilation {
    pub fn succeeded(&self) -> bool {
        self.image.is_some() && !self.diagnostics.has_errors()
    }
}

/// Compilador de objetos.
pub struct Compiler<'a> {
    resolver: &'a dyn ObjectResolver,
    loader: &'a dyn FileLoader,
    config: Config,
}

impl<'a> Compiler<'a> {
    pub fn new(resolver: &'a dyn ObjectResolver, loader: &'a dyn FileLoader, config: Config) -> Self {
        Compiler {
            resolver,
            loader,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn compile(&self, object: &ast::Object) -> Compilation {
        Unit::new(self, &object.name).run(object)
    }
}

/// Método en compilación.
struct Method {
    location: Location,
    reference: Rc<MethodRef>,
    scope: ScopeId,

    /// Resultados, parámetros y locales, en orden de marco.
    frame: Vec<Rc<LocalVariable>>,

    /// Locales declaradas, sujetas a advertencias de uso.
    locals: Vec<Located<Rc<LocalVariable>>>,

    body: MethodBody,
    calls: Vec<Rc<MethodRef>>,
    removed: bool,
}

/// Bloque `ORG`...`END` pendiente de ensamblar.
struct InlineBlock {
    method: usize,
    line: LineId,
    slot: usize,
    origin: i64,
    lines: Vec<AsmLine>,
}

/// Estado de la compilación de un objeto.
struct Unit<'a> {
    compiler: &'a Compiler<'a>,
    scopes: Scopes,
    addresses: Addresses,
    object: ScopeId,
    diagnostics: Diagnostics,
    links: Links,
    constants: Vec<Located<Identifier>>,
    variables: Vec<Located<Rc<Variable>>>,

    /// Tamaño de dato de cada etiqueta de `DAT`.
    labels: HashMap<ContextRef, DataType>,

    dat: Vec<AsmLine>,
    methods: Vec<Method>,
    inline: Vec<InlineBlock>,
    debug: DebugData,
    clock: Option<ClockSetting>,
}

impl<'a> Unit<'a> {
    fn new(compiler: &'a Compiler<'a>, name: &str) -> Self {
        let mut scopes = Scopes::new();
        let object = scopes.push(scopes.root());

        Unit {
            compiler,
            scopes,
            addresses: Addresses::default(),
            object,
            diagnostics: Diagnostics::new(name),
            links: Links::new(),
            constants: Vec::new(),
            variables: Vec::new(),
            labels: HashMap::new(),
            dat: Vec::new(),
            methods: Vec::new(),
            inline: Vec::new(),
            debug: DebugData::new(),
            clock: None,
        }
    }

    fn options(&self) -> CompileOptions {
        self.compiler.config.options
    }

    fn run(mut self, object: &ast::Object) -> Compilation {
        let mut nodes = Vec::new();
        self.select(&object.nodes, &mut nodes);

        for node in &nodes {
            if let Node::Constants(decls) = node {
                self.constants(decls);
            }
        }

        self.clock();

        for node in &nodes {
            if let Node::Objects(decls) = node {
                self.objects(decls);
            }
        }

        for warning in self.links.export(&mut self.scopes, self.object) {
            self.diagnostics.warn(None, warning);
        }

        let mut methods = Vec::new();
        let mut data = Vec::new();

        for node in &nodes {
            match node {
                Node::Variables(decls) => self.variables(decls),
                Node::Method(decl) => {
                    self.declare(decl);
                    methods.push(decl);
                }

                Node::Data(lines) => data.extend(lines.iter()),
                _ => (),
            }
        }

        self.dat = self.assemble(&data, self.object);

        for (index, decl) in methods.into_iter().enumerate() {
            self.method(index, decl);
        }

        self.unused();

        let image = if self.diagnostics.has_errors() {
            None
        } else {
            self.finish()
        };

        let debug = match self.options().contains(CompileOptions::DEBUG) {
            false => None,
            true => match self.debug.serialize(self.compiler.config.debug_limit) {
                Ok(debug) => Some(debug),
                Err(error) => {
                    self.diagnostics.push(Diagnostic::error(None, error));
                    None
                }
            },
        };

        let image = image.filter(|_| !self.diagnostics.has_errors());
        if let Some(image) = &image {
            log::debug!(
                "Compiled `{}`: {} bytes, {} bytes of variables",
                self.diagnostics.unit(),
                image.bytes.len(),
                image.var_size
            );
        }

        Compilation {
            image,
            debug,
            diagnostics: self.diagnostics,
        }
    }

    /// Aplana el árbol de nodos según las definiciones de preprocesador.
    fn select<'n>(&mut self, nodes: &'n [Node], out: &mut Vec<&'n Node>) {
        for node in nodes {
            match node {
                Node::Define { name, tokens } => {
                    if self.scopes.is_defined(self.object, name.val()) {
                        self.diagnostics.warn(
                            Some(name.location().clone()),
                            format!("`{}` is redefined", name.val()),
                        );
                    }

                    self.scopes
                        .add_definition(self.object, name.val().clone(), tokens.clone());
                }

                Node::IfDefined {
                    name,
                    negate,
                    then,
                    otherwise,
                } => {
                    let defined = self.scopes.is_defined(self.object, name);
                    let selected = if defined != *negate { then } else { otherwise };
                    self.select(selected, out);
                }

                _ => out.push(node),
            }
        }
    }

    fn define(&mut self, scope: ScopeId, name: &Located<Identifier>, value: Expression) {
        if let Some(warning) = self.scopes.add_symbol(scope, name.val().clone(), value) {
            self.diagnostics.warn(Some(name.location().clone()), warning);
        }
    }

    fn constants(&mut self, decls: &[Located<ConstantDecl>]) {
        for decl in decls {
            if let Err(error) = self.constant(decl.val()) {
                self.diagnostics.fatal(error);
            }
        }
    }

    fn constant(&mut self, decl: &ConstantDecl) -> Compile<()> {
        let object = self.object;
        match decl {
            ConstantDecl::Assign { name, value } => {
                let value = eval::lower(&self.scopes, object, value)?;
                self.define(object, name, value);
                self.constants.push(name.clone());
            }

            ConstantDecl::Enum { start, step, items } => {
                let mut current = match start {
                    Some(start) => eval::lower(&self.scopes, object, start)?,
                    None => Expression::int(0),
                };

                let step = match step {
                    Some(step) => eval::lower(&self.scopes, object, step)?,
                    None => Expression::int(1),
                };

                for item in items {
                    self.define(object, &item.name, current.clone());
                    self.constants.push(item.name.clone());

                    let increment = match &item.step {
                        Some(step) => eval::lower(&self.scopes, object, step)?,
                        None => step.clone(),
                    };

                    current = Expression::Binary(BinaryOp::Add, Box::new(current), Box::new(increment));
                }
            }
        }

        Ok(())
    }

    /// Evalúa un símbolo de reloj, si el objeto lo define.
    fn clock_symbol(&self, name: &str) -> Compile<Option<u32>> {
        let name = Identifier::from(name);
        let value = match self.scopes.get_symbol(self.object, &name) {
            Some(value) => value,
            None => return Ok(None),
        };

        let location = self
            .constants
            .iter()
            .find(|constant| constant.val() == &name)
            .map(|constant| constant.location().clone())
            .unwrap_or_default();

        let value = match value.int_value(&self.scopes) {
            Ok(value) => value,
            Err(error) => return Err(Located::at(error.into(), location)),
        };

        match u32::try_from(value) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(Located::at(ClockError::Range(name.to_string(), value).into(), location)),
        }
    }

    fn clock_request(&self) -> Compile<Option<ClockRequest>> {
        let crystal = self.clock_symbol("_XTLFREQ")?;
        let external = self.clock_symbol("_XINFREQ")?;
        let frequency = self.clock_symbol("_CLKFREQ")?;
        let fast = self.clock_symbol("_RCFAST")?.is_some();
        let slow = self.clock_symbol("_RCSLOW")?.is_some();
        let tolerance = self.clock_symbol("_ERRFREQ")?;

        let conflict = |first, second| -> Compile<Option<ClockRequest>> {
            Err(Located::at(ClockError::Conflict(first, second).into(), Location::default()))
        };

        if crystal.is_some() && external.is_some() {
            return conflict("_XTLFREQ", "_XINFREQ");
        } else if fast && slow {
            return conflict("_RCFAST", "_RCSLOW");
        }

        let pll = crystal.is_some() || external.is_some() || frequency.is_some();
        for (internal, name) in [(fast, "_RCFAST"), (slow, "_RCSLOW")] {
            if internal && pll {
                return conflict(name, "_CLKFREQ");
            }
        }

        let source = match (crystal, external) {
            (Some(input), _) => Source::Crystal(input),
            (_, Some(input)) => Source::External(input),
            _ if slow => Source::RcSlow,
            _ if fast => Source::RcFast,

            // Solo `_CLKFREQ`: cristal de 20 MHz
            _ if frequency.is_some() => Source::Crystal(20_000_000),
            _ => return Ok(None),
        };

        Ok(Some(ClockRequest {
            source,
            frequency,
            tolerance: tolerance.unwrap_or(self.compiler.config.clock_tolerance),
        }))
    }

    /// Deriva y publica `CLKMODE_` y `CLKFREQ_`.
    fn clock(&mut self) {
        let setting = match self.clock_request() {
            Ok(Some(request)) => match clock::derive(&request) {
                Ok(setting) => {
                    self.clock = Some(setting);
                    setting
                }

                Err(error) => {
                    let location = self
                        .constants
                        .iter()
                        .find(|constant| constant.val().as_ref().eq_ignore_ascii_case("_CLKFREQ"))
                        .map(|constant| constant.location().clone())
                        .unwrap_or_default();

                    self.diagnostics.fatal(Located::at(error, location));
                    return;
                }
            },

            Ok(None) => ClockSetting {
                mode: 0,
                frequency: clock::RCFAST_FREQUENCY,
            },

            Err(error) => {
                self.diagnostics.fatal(error);
                return;
            }
        };

        let object = self.object;
        self.scopes
            .add_builtin_symbol(object, "CLKMODE_".into(), Expression::int(setting.mode as i64));
        self.scopes
            .add_builtin_symbol(object, "CLKFREQ_".into(), Expression::int(setting.frequency as i64));
    }

    fn objects(&mut self, decls: &[Located<ast::ObjectDecl>]) {
        for decl in decls {
            if let Err(error) = self.child(decl.val()) {
                self.diagnostics.fatal(error);
            }
        }
    }

    fn child(&mut self, decl: &ast::ObjectDecl) -> Compile<()> {
        let count = match &decl.count {
            Some(count) => self.constant_value(count, self.object)?,
            None => 1,
        };

        let path = decl.path.val();
        let image = self
            .compiler
            .resolver
            .resolve(path)
            .map_err(|error| Located::at(error.into(), decl.path.location().clone()))?;

        self.links
            .add(decl.name.val().clone(), image, count.max(0) as u32)
            .map_err(|error| Located::at(error.into(), decl.name.location().clone()))?;

        Ok(())
    }

    fn variables(&mut self, decls: &[Located<ast::VariableDecl>]) {
        for decl in decls {
            let (location, decl) = (decl.location(), decl.val());
            let count = match &decl.count {
                Some(count) => match self.constant_value(count, self.object) {
                    Ok(count) => count.max(0) as u32,
                    Err(error) => {
                        self.diagnostics.fatal(error);
                        continue;
                    }
                },

                None => 1,
            };

            let var = Rc::new(Variable::new(decl.name.val().clone(), decl.kind, count));
            self.define(self.object, &decl.name, Expression::Variable(Rc::clone(&var)));
            self.variables.push(Located::at(var, location.clone()));
        }
    }

    /// Registra un método y su marco antes de compilar cualquier cuerpo,
    /// de modo que las llamadas puedan referirse a métodos posteriores.
    fn declare(&mut self, decl: &Located<MethodDecl>) {
        let (location, decl) = (decl.location(), decl.val());
        let reference = Rc::new(MethodRef::new(
            decl.name.val().clone(),
            decl.parameters.len() as u32,
            decl.results.len() as u32,
            decl.public,
        ));

        self.define(self.object, &decl.name, Expression::Method(Rc::clone(&reference)));

        let scope = self.scopes.push(self.object);
        let mut frame = Vec::new();
        let mut locals = Vec::new();
        let mut offset = 0;

        // Resultados primero, luego parámetros
        for name in decl.results.iter().chain(&decl.parameters) {
            let local = Rc::new(LocalVariable::new(name.val().clone(), DataType::Long, 1, offset));
            self.define(scope, name, Expression::Local(Rc::clone(&local)));

            frame.push(local);
            offset += 4;
        }

        for declared in &decl.locals {
            let count = match &declared.count {
                Some(count) => match self.constant_value(count, self.object) {
                    Ok(count) => count.max(0) as u32,
                    Err(error) => {
                        self.diagnostics.fatal(error);
                        1
                    }
                },

                None => 1,
            };

            let size = declared.kind.size();
            offset = (offset + size - 1) / size * size;

            let local = Rc::new(LocalVariable::new(declared.name.val().clone(), declared.kind, count, offset));
            self.define(scope, &declared.name, Expression::Local(Rc::clone(&local)));

            frame.push(Rc::clone(&local));
            locals.push(Located::at(local, declared.name.location().clone()));
            offset += size * count;
        }

        self.methods.push(Method {
            location: location.clone(),
            reference,
            scope,
            frame,
            locals,
            body: MethodBody::new(),
            calls: Vec::new(),
            removed: false,
        });
    }

    fn method(&mut self, index: usize, decl: &Located<MethodDecl>) {
        let scope = self.methods[index].scope;
        let body = &decl.val().body;

        let mut context = stmt::Context::new(self, index, scope);
        context.block(body);

        let returns = matches!(
            body.last().map(Located::val),
            Some(ast::Statement::Return(_) | ast::Statement::Abort(_))
        );

        if !returns {
            context.terminate();
        }

        let (body, calls) = context.finish();
        let method = &mut self.methods[index];
        method.body = body;
        method.calls = calls;
    }

    /// Advertencias de uso y eliminación de código muerto.
    fn unused(&mut self) {
        let options = self.options();

        if options.contains(CompileOptions::REMOVE_UNUSED_METHODS) {
            // Eliminar un método puede dejar sin uso a los que llamaba
            loop {
                let mut removed = false;
                for method in &mut self.methods {
                    let reference = &method.reference;
                    if !method.removed && !reference.public && reference.usage() == 0 {
                        log::debug!("Removing unused method `{}`", reference.name);

                        method.removed = true;
                        removed = true;
                        method.calls.iter().for_each(|callee| callee.unmark_used());
                    }
                }

                if !removed {
                    break;
                }
            }
        }

        if !options.contains(CompileOptions::WARN_UNUSED) {
            return;
        }

        let mut warnings = Vec::new();
        for method in &self.methods {
            let reference = &method.reference;
            if !reference.public && reference.usage() == 0 {
                warnings.push((method.location.clone(), format!("Method `{}` is never used", reference.name)));
            }

            if method.removed {
                continue;
            }

            for local in &method.locals {
                if local.val().usage() == 0 {
                    let message = format!("Local variable `{}` is never used", local.val().name);
                    warnings.push((local.location().clone(), message));
                }
            }
        }

        for var in &self.variables {
            if var.val().usage() == 0 {
                warnings.push((var.location().clone(), format!("Variable `{}` is never used", var.val().name)));
            }
        }

        for (location, message) in warnings {
            self.diagnostics.warn(Some(location), message);
        }
    }

    fn constant_value(&self, expr: &Located<ast::Expr>, scope: ScopeId) -> Compile<i64> {
        eval::lower(&self.scopes, scope, expr)?
            .int_value(&self.scopes)
            .map_err(|error| Located::at(error.into(), expr.location().clone()))
    }

    /// Dispone variables, resuelve direcciones y enlaza.
    fn finish(&mut self) -> Option<ObjectImage> {
        let limit = self.compiler.config.iteration_limit;

        // Los métodos públicos preceden a los privados en la tabla
        let mut order = Vec::with_capacity(self.methods.len());
        for public in [true, false] {
            order.extend(
                self.methods
                    .iter()
                    .enumerate()
                    .filter(|(_, method)| !method.removed && method.reference.public == public)
                    .map(|(index, _)| index),
            );
        }

        for (index, &method) in order.iter().enumerate() {
            self.methods[method].reference.set_index(index as u32);
        }

        let own_var_size = self.layout_variables();

        let header = self.links.header_size();
        let dat_start = header + (order.len() as u32 + 1) * 4;

        let dat = std::mem::take(&mut self.dat);
        let dat_bytes = AsmResolver::new(&self.scopes, &mut self.addresses, limit).resolve(
            &dat,
            Start::hub(dat_start as i64),
            &mut self.diagnostics,
        );

        log::debug!("DAT resolved: {} bytes at ${:X}", dat_bytes.len(), dat_start);

        for block in std::mem::take(&mut self.inline) {
            let code = AsmResolver::new(&self.scopes, &mut self.addresses, limit).resolve(
                &block.lines,
                Start::cog(block.origin),
                &mut self.diagnostics,
            );

            let codes = self.methods[block.method].body.code_mut(block.line);
            if let Some(Bytecode::Inline { code: slot, .. }) = codes.get_mut(block.slot) {
                *slot = code;
            }
        }

        if self.diagnostics.has_errors() {
            return None;
        }

        let env = Environment::new(&self.scopes, &self.addresses);
        let bodies: Vec<&MethodBody> = order.iter().map(|&method| &self.methods[method].body).collect();
        let method_start = dat_start as i64 + dat_bytes.len() as i64;

        let layouts = match resolve::layout_methods(&bodies, method_start, &env, limit) {
            Ok(layouts) => layouts,
            Err(error) => {
                let location = order
                    .first()
                    .map(|&method| self.methods[method].location.clone())
                    .unwrap_or_default();

                self.diagnostics.fatal(Located::at(error, location));
                return None;
            }
        };

        let mut bytes = vec![0; header as usize];
        for (&method, layout) in order.iter().zip(&layouts) {
            let reference = &self.methods[method].reference;
            let entry = 0x8000_0000
                | (reference.parameters & 0xF) << 24
                | (reference.returns & 0xF) << 20
                | (layout.address as u32 & 0xF_FFFF);

            bytes.extend_from_slice(&entry.to_le_bytes());
        }

        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&dat_bytes);

        for (&method, layout) in order.iter().zip(&layouts) {
            let method = &self.methods[method];
            if let Err(error) = resolve::emit_method(&method.body, layout, &env, &mut bytes) {
                self.diagnostics.fatal(Located::at(error, method.location.clone()));
            }
        }

        if self.diagnostics.has_errors() {
            return None;
        }

        let var_size = self.links.assemble(&mut bytes, own_var_size);

        let methods = order
            .iter()
            .map(|&method| &self.methods[method].reference)
            .filter(|reference| reference.public)
            .map(|reference| ExportedMethod {
                name: reference.name.clone(),
                parameters: reference.parameters,
                returns: reference.returns,
                index: reference.index(),
            })
            .collect();

        let constants = self
            .constants
            .iter()
            .filter_map(|name| {
                let value = self.scopes.get_symbol(self.object, name.val())?;
                let value = value.number(&env).ok()?;
                Some((name.val().clone(), value))
            })
            .collect();

        Some(ObjectImage {
            bytes,
            var_size,
            methods,
            constants,
            clock: self.clock,
        })
    }

    /// Ubica las variables en orden de declaración, cada una alineada a
    /// su tamaño. Retorna el tamaño del bloque propio.
    fn layout_variables(&self) -> u32 {
        let remove = self.options().contains(CompileOptions::REMOVE_UNUSED_VARIABLES);

        let mut offset = 0;
        for var in &self.variables {
            let var = var.val();
            if remove && var.usage() == 0 {
                continue;
            }

            let size = var.kind.size();
            offset = (offset + size - 1) / size * size;
            var.set_offset(offset);
            offset += var.size();
        }

        link::align4(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{DataLine, EnumItem, Expr, ObjectDecl, Operand, Prefix, VariableDecl},
        link::{MapLoader, MapResolver},
    };

    fn at<T>(value: T) -> Located<T> {
        Located::at(value, Location::default())
    }

    fn assign(name: &str, value: i64) -> Located<ConstantDecl> {
        at(ConstantDecl::Assign {
            name: at(name.into()),
            value: at(Expr::number(value)),
        })
    }

    fn compile(nodes: Vec<Node>, config: Config) -> Compilation {
        let resolver = MapResolver::new();
        let loader = MapLoader::new();
        let object = ast::Object {
            name: "test".to_string(),
            nodes,
        };

        Compiler::new(&resolver, &loader, config).compile(&object)
    }

    #[test]
    fn enumerations_and_clock_symbols() {
        let nodes = vec![Node::Constants(vec![
            assign("_XINFREQ", 20_000_000),
            assign("_CLKFREQ", 160_000_000),
            at(ConstantDecl::Enum {
                start: Some(at(Expr::number(5))),
                step: None,
                items: vec![
                    EnumItem {
                        name: at("A".into()),
                        step: Some(at(Expr::number(3))),
                    },
                    EnumItem {
                        name: at("B".into()),
                        step: None,
                    },
                ],
            }),
        ])];

        let compilation = compile(nodes, Config::default());
        assert!(compilation.succeeded(), "{}", compilation.diagnostics);

        let image = compilation.image.unwrap();
        let constant = |name: &str| image.constant(&name.into());

        assert_eq!(constant("A"), Some(crate::expr::Number::Int(5)));
        assert_eq!(constant("B"), Some(crate::expr::Number::Int(8)));
        assert_eq!(image.clock.map(|clock| clock.frequency), Some(160_000_000));
    }

    #[test]
    fn conflicting_clock_sources() {
        let nodes = vec![Node::Constants(vec![
            assign("_XTLFREQ", 20_000_000),
            assign("_XINFREQ", 20_000_000),
        ])];

        let compilation = compile(nodes, Config::default());
        assert!(!compilation.succeeded());
        assert_eq!(
            compilation.diagnostics.errors().next().map(Diagnostic::message),
            Some("Clock symbols `_XTLFREQ` and `_XINFREQ` are mutually exclusive")
        );
    }

    #[test]
    fn clock_frequencies_must_fit_in_32_bits() {
        for value in [1 << 32, -1] {
            let nodes = vec![Node::Constants(vec![assign("_CLKFREQ", value)])];

            let compilation = compile(nodes, Config::default());
            assert!(!compilation.succeeded());

            let message = format!("Clock symbol `_CLKFREQ` has out of range value {}", value);
            assert_eq!(
                compilation.diagnostics.errors().next().map(Diagnostic::message),
                Some(message.as_str())
            );
        }
    }

    #[test]
    fn ifdef_selects_nodes() {
        let nodes = vec![
            Node::Define {
                name: at("FAST".into()),
                tokens: vec![],
            },
            Node::IfDefined {
                name: "FAST".into(),
                negate: false,
                then: vec![Node::Constants(vec![assign("SPEED", 2)])],
                otherwise: vec![Node::Constants(vec![assign("SPEED", 1)])],
            },
            Node::IfDefined {
                name: "SLOW".into(),
                negate: true,
                then: vec![Node::Constants(vec![assign("MODE", 7)])],
                otherwise: vec![],
            },
        ];

        let image = compile(nodes, Config::default()).image.unwrap();
        assert_eq!(image.constant(&"SPEED".into()), Some(crate::expr::Number::Int(2)));
        assert_eq!(image.constant(&"MODE".into()), Some(crate::expr::Number::Int(7)));
    }

    #[test]
    fn missing_child_is_fatal() {
        let nodes = vec![Node::Objects(vec![at(ObjectDecl {
            name: at("serial".into()),
            path: at("serial.spin2".to_string()),
            count: None,
        })])];

        let compilation = compile(nodes, Config::default());
        assert!(compilation.image.is_none());
        assert_eq!(compilation.diagnostics.errors().count(), 1);
    }

    #[test]
    fn variables_are_aligned_and_unused_ones_warned() {
        let var = |kind, name: &str| {
            at(VariableDecl {
                kind,
                name: at(name.into()),
                count: None,
            })
        };

        let nodes = vec![Node::Variables(vec![
            var(DataType::Byte, "flag"),
            var(DataType::Long, "counter"),
            var(DataType::Word, "tail"),
        ])];

        let config = Config {
            options: CompileOptions::WARN_UNUSED,
            ..Default::default()
        };

        let compilation = compile(nodes, config);
        let image = compilation.image.as_ref().unwrap();

        // 1 + 3 de relleno + 4 + 2, alineado a 12
        assert_eq!(image.var_size, 12);
        assert_eq!(compilation.diagnostics.warnings().count(), 3);
    }

    #[test]
    fn dat_follows_method_table() {
        let line = DataLine {
            label: Some(at("value".into())),
            mnemonic: Some(at("long".into())),
            operands: vec![at(Operand::new(Prefix::None, at(Expr::number(0x1234_5678))))],
            ..Default::default()
        };

        let object = ast::Object {
            name: "dat".to_string(),
            nodes: vec![Node::Data(vec![at(line)])],
        };

        let resolver = MapResolver::new();
        let loader = MapLoader::new();
        let image = Compiler::new(&resolver, &loader, Config::default())
            .compile(&object)
            .image
            .unwrap();

        // Solo el centinela de la tabla de métodos precede a los datos
        assert_eq!(image.bytes, vec![0, 0, 0, 0, 0x78, 0x56, 0x34, 0x12]);
    }
}
