//! Compilador de objetos Spin2/PASM2 para el Propeller 2.
//!
//! # Entrada
//! El análisis léxico y sintáctico ocurre fuera de este crate. Cada
//! objeto llega como un árbol tipado descrito en [`ast`], donde cada
//! nodo conserva su ubicación en el código fuente ([`source`]).
//!
//! # Núcleo
//! Las expresiones se convierten al modelo perezoso de [`expr`], el cual
//! consulta los alcances de [`scope`] y las direcciones que se resuelven
//! más tarde. Las líneas de ensamblador se validan y codifican con el
//! registro de instrucciones de [`isa`], mientras que los métodos se
//! traducen a árboles de líneas de bytecode ([`ir`], [`bytecode`]).
//!
//! # Resolución y enlazado
//! El tamaño de una instrucción puede depender de direcciones que a su
//! vez dependen de tamaños, por lo cual [`resolve`] itera hasta un punto
//! fijo antes de emitir bytes. Finalmente [`link`] compone la imagen del
//! objeto con las de sus hijos, y [`clock`] deriva el modo de reloj a
//! partir de los símbolos de frecuencia. Todas las fases se orquestan
//! desde [`compile`].

#[macro_use]
mod macros;

pub mod ast;
pub mod bytecode;
pub mod clock;
pub mod compile;
pub mod debug;
pub mod error;
pub mod expr;
pub mod ir;
pub mod isa;
pub mod link;
pub mod resolve;
pub mod scope;
pub mod source;
