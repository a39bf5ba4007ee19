//! The embedded scripting language: a small Python-flavoured subset whose
//! whole surface is the policy registry plus the enumerated Series and
//! DataFrame members.

mod args;
pub mod ast;
mod budget;
mod index;
mod interp;
pub mod lexer;
mod library;
mod methods;
mod ops;
pub mod parser;
mod value;

pub use budget::Budget;
pub use interp::Interpreter;
pub use parser::parse;
pub use value::{Method, Series, Value};
