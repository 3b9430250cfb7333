// 规则系统：YAML 规则 -> 编译后的 EQL 查询

pub mod compiler;
pub mod loader;
pub mod model;
