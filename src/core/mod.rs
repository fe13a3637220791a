mod value;
pub use value::*;

mod engine;
pub use engine::*;

mod scope;
pub use scope::*;

mod memory;
pub use memory::*;
