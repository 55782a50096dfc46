pub mod alias;
pub mod cfg;
pub mod dom;
pub mod dot;
pub mod ir;
pub mod memssa;
pub mod parse;
pub mod verify;

pub use crate::alias::*;
pub use crate::cfg::*;
pub use crate::dom::*;
pub use crate::dot::*;
pub use crate::ir::*;
pub use crate::memssa::*;
pub use crate::parse::*;
pub use crate::verify::*;
