/// IO 抽象层模块
///
/// 该模块提供插件文件读写的抽象接口，加载器与会话只依赖 trait，
/// 便于在测试中注入内存实现。
///
/// # 架构设计
///
/// - **traits**: 定义 Reader/Writer trait 接口
/// - **esp_io**: 基于文件系统（memmap2）与内存的默认实现
///
/// # 使用示例
///
/// ```rust,ignore
/// use esp_merger::io::{DefaultEspReader, EspReader};
///
/// let reader = DefaultEspReader;
/// let data = reader.read(Path::new("Skyrim.esm"))?;
/// ```
pub mod traits;
pub mod esp_io;

// === 导出 trait 定义 ===
pub use traits::{EspReader, EspWriter, RawEspData};

// === 导出默认实现 ===
pub use esp_io::{DefaultEspReader, DefaultEspWriter, MemoryEspReader};
