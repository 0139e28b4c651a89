use super::Plugin;
use crate::io::{DefaultEspWriter, EspWriter, RawEspData};
use crate::utils::EspError;
use std::path::Path;

impl Plugin {
    /// 序列化为插件字节
    pub fn to_bytes(&self) -> Result<Vec<u8>, EspError> {
        let mut output = Vec::new();

        self.header.write_to(&mut output)?;
        for group in &self.groups {
            group.write_to(&mut output)?;
        }

        Ok(output)
    }

    /// 写入文件
    pub fn write_to_file(&self, path: &Path) -> Result<(), EspError> {
        self.write_with(&DefaultEspWriter, path)
    }

    /// 使用自定义 Writer 写入
    pub fn write_with(&self, writer: &dyn EspWriter, path: &Path) -> Result<(), EspError> {
        let data = RawEspData { bytes: self.to_bytes()? };
        tracing::info!(path = %path.display(), bytes = data.bytes.len(), "写入插件");
        writer.write(&data, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginHeader;
    use std::path::PathBuf;

    #[test]
    fn test_write_to_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Empty.esp");
        let plugin = Plugin::create(
            PathBuf::from("Empty.esp"),
            PluginHeader { version: 1.71, num_records: 0, next_object_id: 0x800 },
            "tester",
            None,
            Vec::new(),
            Vec::new(),
        );

        plugin.write_to_file(&path).unwrap();
        let loaded = Plugin::load(path).unwrap();
        assert_eq!(loaded.header, plugin.header);
        assert!(loaded.groups.is_empty());
        assert_eq!(loaded.to_bytes().unwrap(), plugin.to_bytes().unwrap());
    }
}
