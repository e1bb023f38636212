pub mod binds;
pub mod codegen;
pub mod dialect;
pub mod ir;
pub mod predicates;

pub use binds::{BindSet, BindValue};
pub use codegen::{generate, GeneratedSql};
pub use dialect::Dialect;
pub use predicates::{gross_expr, measure_expr, net_expr};
