/// IO 抽象层 - trait 定义
///
/// 加载器在 rayon 线程池中并行读取插件，因此读取器必须是 `Send + Sync`。

use std::path::Path;
use crate::utils::EspError;

/// 插件文件原始数据
#[derive(Debug, Clone)]
pub struct RawEspData {
    /// 文件的原始字节数据
    pub bytes: Vec<u8>,
}

/// 插件文件读取 trait
///
/// # 职责
/// - 读取 ESP/ESM/ESL 文件的原始字节数据
/// - 不负责解析，仅负责 IO
pub trait EspReader: Send + Sync {
    /// 读取插件文件的原始数据
    fn read(&self, path: &Path) -> Result<RawEspData, EspError>;
}

/// 插件文件写入 trait
///
/// # 职责
/// - 将序列化后的数据写入目标位置
/// - 不负责序列化，仅负责 IO
pub trait EspWriter {
    /// 写入插件文件数据
    ///
    /// # 参数
    /// * `data` - 要写入的原始数据
    /// * `path` - 目标文件路径
    fn write(&self, data: &RawEspData, path: &Path) -> Result<(), EspError>;
}
