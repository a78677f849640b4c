pub mod gateway;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod server;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::gateway;
    pub use crate::knowledge;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::prompt;
    pub use crate::server;
    pub use crate::telemetry;
}
