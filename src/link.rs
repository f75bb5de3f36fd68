//! Enlazado de objetos.
//!
//! Un objeto padre incluye objetos hijos ya compilados. Cada instancia
//! de un hijo ocupa un registro de enlace al inicio de la imagen del
//! padre, el cual contiene el desplazamiento de la imagen del hijo y el
//! desplazamiento de su bloque de variables. Las imágenes de los hijos
//! se anexan tras el código del padre y los registros se parchan una vez
//! que sus posiciones son conocidas.
//!
//! Los métodos y constantes de un hijo se exponen en el padre como
//! `alias.nombre`. El índice de objeto de un método expuesto es la
//! posición del hijo en la tabla de enlaces.

use crate::{
    ast::Identifier,
    clock::ClockSetting,
    expr::{Expression, MethodRef, Number, NumberLiteral},
    scope::{ScopeId, ScopeWarning, Scopes},
};

use std::{collections::HashMap, rc::Rc};
use thiserror::Error;

/// Tamaño de un registro de enlace: desplazamiento de objeto y de
/// variables.
pub const LINK_RECORD_SIZE: u32 = 8;

/// Un error de enlazado.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// El resolvedor no conoce la ruta.
    #[error("Object `{0}` not found")]
    NotFound(String),

    /// El hijo existe pero su compilación falló.
    #[error("Object `{0}` failed to compile")]
    Failed(String),

    #[error("Object array `{0}` must have at least one instance")]
    EmptyArray(Identifier),

    #[error("File `{0}` not found")]
    FileNotFound(String),
}

/// Método exportado por un objeto.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedMethod {
    pub name: Identifier,
    pub parameters: u32,
    pub returns: u32,

    /// Índice en la tabla de métodos del objeto.
    pub index: u32,
}

/// Objeto compilado y listo para enlazarse.
#[derive(Clone, Debug, Default)]
pub struct ObjectImage {
    pub bytes: Vec<u8>,

    /// Tamaño del bloque de variables, incluidos los de los hijos.
    pub var_size: u32,

    pub methods: Vec<ExportedMethod>,
    pub constants: Vec<(Identifier, Number)>,

    /// Modo de reloj, solo para objetos que lo declaran.
    pub clock: Option<ClockSetting>,
}

impl ObjectImage {
    pub fn method(&self, name: &Identifier) -> Option<&ExportedMethod> {
        self.methods.iter().find(|method| &method.name == name)
    }

    pub fn constant(&self, name: &Identifier) -> Option<Number> {
        self.constants
            .iter()
            .find(|(constant, _)| constant == name)
            .map(|&(_, value)| value)
    }
}

/// Resuelve una ruta de inclusión a un objeto ya compilado.
pub trait ObjectResolver {
    fn resolve(&self, path: &str) -> Result<Rc<ObjectImage>, LinkError>;
}

/// Carga archivos binarios para `FILE`.
pub trait FileLoader {
    fn load(&self, name: &str) -> Option<Rc<[u8]>>;
}

/// Resolvedor respaldado por una tabla en memoria.
#[derive(Default)]
pub struct MapResolver {
    objects: HashMap<String, Result<Rc<ObjectImage>, ()>>,
}

impl MapResolver {
    pub fn new() -> Self {
        MapResolver::default()
    }

    pub fn insert<S: Into<String>>(&mut self, path: S, image: ObjectImage) {
        self.objects.insert(path.into(), Ok(Rc::new(image)));
    }

    /// Registra un objeto cuya compilación falló.
    pub fn insert_failed<S: Into<String>>(&mut self, path: S) {
        self.objects.insert(path.into(), Err(()));
    }
}

impl ObjectResolver for MapResolver {
    fn resolve(&self, path: &str) -> Result<Rc<ObjectImage>, LinkError> {
        match self.objects.get(path) {
            Some(Ok(image)) => Ok(Rc::clone(image)),
            Some(Err(())) => Err(LinkError::Failed(path.to_string())),
            None => Err(LinkError::NotFound(path.to_string())),
        }
    }
}

/// Cargador respaldado por una tabla en memoria.
#[derive(Default)]
pub struct MapLoader {
    files: HashMap<String, Rc<[u8]>>,
}

impl MapLoader {
    pub fn new() -> Self {
        MapLoader::default()
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, contents: &[u8]) {
        self.files.insert(name.into(), Rc::from(contents));
    }
}

impl FileLoader for MapLoader {
    fn load(&self, name: &str) -> Option<Rc<[u8]>> {
        self.files.get(name).cloned()
    }
}

/// Un hijo incluido bajo un alias.
#[derive(Clone, Debug)]
pub struct ChildLink {
    pub alias: Identifier,
    pub image: Rc<ObjectImage>,
    pub count: u32,

    /// Posición del primer registro en la tabla de enlaces.
    pub index: u32,
}

/// Tabla de enlaces de un objeto.
#[derive(Debug, Default)]
pub struct Links {
    children: Vec<ChildLink>,
    records: u32,
}

impl Links {
    pub fn new() -> Self {
        Links::default()
    }

    /// Agrega un hijo y retorna su índice de objeto.
    pub fn add(&mut self, alias: Identifier, image: Rc<ObjectImage>, count: u32) -> Result<u32, LinkError> {
        if count == 0 {
            return Err(LinkError::EmptyArray(alias));
        }

        let index = self.records;
        self.records += count;
        self.children.push(ChildLink {
            alias,
            image,
            count,
            index,
        });

        Ok(index)
    }

    pub fn children(&self) -> &[ChildLink] {
        &self.children
    }

    pub fn get(&self, alias: &Identifier) -> Option<&ChildLink> {
        self.children.iter().find(|child| &child.alias == alias)
    }

    /// Cantidad de registros de enlace.
    pub fn records(&self) -> u32 {
        self.records
    }

    /// Bytes que ocupa la tabla de enlaces.
    pub fn header_size(&self) -> u32 {
        self.records * LINK_RECORD_SIZE
    }

    /// Suma de los bloques de variables de todas las instancias.
    pub fn var_size(&self) -> u32 {
        self.children
            .iter()
            .map(|child| child.image.var_size * child.count)
            .sum()
    }

    /// Expone los métodos y constantes de cada hijo como `alias.nombre`.
    ///
    /// Retorna las colisiones de nombres como advertencias.
    pub fn export(&self, scopes: &mut Scopes, scope: ScopeId) -> Vec<ScopeWarning> {
        let mut warnings = Vec::new();

        for child in &self.children {
            for method in &child.image.methods {
                let linked = MethodRef::linked(
                    method.name.clone(),
                    method.parameters,
                    method.returns,
                    child.index,
                    method.index,
                );

                let name = child.alias.qualified(&method.name);
                let value = Expression::Method(Rc::new(linked));
                warnings.extend(scopes.add_symbol(scope, name, value));
            }

            for (name, value) in &child.image.constants {
                let literal = match *value {
                    Number::Int(value) => NumberLiteral::new(value, 10),
                    Number::Float(value) => NumberLiteral::float(value),
                };

                let name = child.alias.qualified(name);
                warnings.extend(scopes.add_symbol(scope, name, Expression::Number(literal)));
            }
        }

        warnings
    }

    /// Completa la imagen del padre.
    ///
    /// `bytes` debe comenzar con espacio reservado para la tabla de
    /// enlaces; `own_var_size` es el tamaño de las variables propias. Las
    /// variables de los hijos se ubican tras las propias, alineadas a
    /// long. Retorna el tamaño total del bloque de variables.
    pub fn assemble(&self, bytes: &mut Vec<u8>, own_var_size: u32) -> u32 {
        let mut var_offset = align4(own_var_size);

        for child in &self.children {
            // Las instancias de un arreglo comparten la misma imagen
            bytes.resize(align4(bytes.len() as u32) as usize, 0);
            let object_offset = bytes.len() as u32;
            bytes.extend_from_slice(&child.image.bytes);

            for instance in 0..child.count {
                let record = ((child.index + instance) * LINK_RECORD_SIZE) as usize;
                bytes[record..record + 4].copy_from_slice(&object_offset.to_le_bytes());
                bytes[record + 4..record + 8].copy_from_slice(&var_offset.to_le_bytes());

                var_offset += child.image.var_size;
            }

            log::debug!(
                "Linked `{}` x{} at ${:X}, {} bytes",
                child.alias,
                child.count,
                object_offset,
                child.image.bytes.len()
            );
        }

        var_offset
    }
}

pub fn align4(value: u32) -> u32 {
    (value + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child() -> ObjectImage {
        ObjectImage {
            bytes: vec![0xAA; 6],
            var_size: 12,
            methods: vec![ExportedMethod {
                name: "foo".into(),
                parameters: 1,
                returns: 0,
                index: 0,
            }],
            constants: vec![("BAUD".into(), Number::Int(115_200))],
            clock: None,
        }
    }

    #[test]
    fn qualified_exports_use_link_position() {
        let mut resolver = MapResolver::new();
        resolver.insert("child.spin2", child());

        let image = resolver.resolve("child.spin2").unwrap();
        let mut links = Links::new();
        assert_eq!(links.add("first".into(), Rc::clone(&image), 2), Ok(0));
        assert_eq!(links.add("obj".into(), image, 1), Ok(2));

        let mut scopes = Scopes::new();
        let root = scopes.root();
        assert!(links.export(&mut scopes, root).is_empty());

        match scopes.get_symbol(root, &"obj.foo".into()) {
            Some(Expression::Method(method)) => {
                assert_eq!(method.object, Some(2));
                assert_eq!(method.index(), 0);
                assert_eq!(method.parameters, 1);
            }

            other => panic!("unexpected {:?}", other),
        }

        let baud = scopes.get_symbol(root, &"OBJ.baud".into()).unwrap();
        assert_eq!(baud.int_value(&scopes), Ok(115_200));
    }

    #[test]
    fn records_are_patched_and_vars_accumulate() {
        let mut links = Links::new();
        links.add("a".into(), Rc::new(child()), 2).unwrap();

        let mut bytes = vec![0; links.header_size() as usize + 3];
        let var_size = links.assemble(&mut bytes, 5);

        // 8 (propias, alineadas) + 2 × 12
        assert_eq!(var_size, 8 + 24);
        assert_eq!(&bytes[0..8], &[20, 0, 0, 0, 8, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &[20, 0, 0, 0, 20, 0, 0, 0]);
        assert_eq!(bytes.len(), 20 + 6);
    }

    #[test]
    fn missing_and_failed_children() {
        let mut resolver = MapResolver::new();
        resolver.insert_failed("broken.spin2");

        assert_eq!(
            resolver.resolve("broken.spin2").unwrap_err(),
            LinkError::Failed("broken.spin2".to_string())
        );

        assert_eq!(
            resolver.resolve("nowhere.spin2").unwrap_err(),
            LinkError::NotFound("nowhere.spin2".to_string())
        );

        let mut links = Links::new();
        assert!(links.add("none".into(), Rc::new(child()), 0).is_err());
    }
}
