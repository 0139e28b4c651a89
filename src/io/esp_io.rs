/// 插件文件 IO 实现
///
/// 提供基于文件系统（内存映射）与基于内存的读写实现
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use memmap2::Mmap;
use super::traits::{EspReader, EspWriter, RawEspData};
use crate::utils::EspError;

/// 默认的插件读取器（内存映射文件）
#[derive(Debug, Clone, Default)]
pub struct DefaultEspReader;

impl EspReader for DefaultEspReader {
    fn read(&self, path: &Path) -> Result<RawEspData, EspError> {
        let file = std::fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(RawEspData { bytes: Vec::new() });
        }
        // 文件在读取期间不会被本进程修改
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(RawEspData { bytes: mmap.to_vec() })
    }
}

/// 默认的插件写入器（基于 std::fs）
#[derive(Debug, Clone, Default)]
pub struct DefaultEspWriter;

impl EspWriter for DefaultEspWriter {
    fn write(&self, data: &RawEspData, path: &Path) -> Result<(), EspError> {
        // 确保父目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, &data.bytes)?;
        Ok(())
    }
}

/// 内存读取器：按路径返回预先放入的字节
#[derive(Debug, Clone, Default)]
pub struct MemoryEspReader {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryEspReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入一个文件
    pub fn insert(&mut self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files.insert(path.into(), bytes);
    }
}

impl EspReader for MemoryEspReader {
    fn read(&self, path: &Path) -> Result<RawEspData, EspError> {
        self.files
            .get(path)
            .map(|bytes| RawEspData { bytes: bytes.clone() })
            .ok_or_else(|| {
                EspError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                ))
            })
    }
}
