pub mod ast;
pub mod content;
pub mod fallback;
pub mod json_shape;
pub mod lexer;
pub mod parser;
pub mod types;

pub use content::ContentAnalyzer;
pub use types::{CallbackTypeResolver, NullTypeResolver, TypeInfo, TypeResolver};
