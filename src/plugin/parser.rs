use super::Plugin;
use crate::datatypes::{read_u32, TypeCode};
use crate::group::{Group, SkippedRecord};
use crate::io::{DefaultEspReader, EspReader};
use crate::record::Record;
use crate::utils::EspError;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use rayon::prelude::*;

impl Plugin {
    /// 加载插件文件（内存映射读取）
    ///
    /// # 示例
    /// ```rust,ignore
    /// let plugin = Plugin::load("Skyrim.esm".into())?;
    /// ```
    pub fn load(path: PathBuf) -> Result<Self, EspError> {
        Self::load_with_reader(path, &DefaultEspReader)
    }

    /// 使用自定义 Reader 加载插件文件
    ///
    /// 通过依赖注入支持自定义 IO 实现（内存等），便于测试和扩展。
    pub fn load_with_reader(path: PathBuf, reader: &dyn EspReader) -> Result<Self, EspError> {
        let raw_data = reader.read(&path)?;
        Self::from_bytes(path, &raw_data.bytes)
    }

    /// 从字节解析插件
    pub fn from_bytes(path: PathBuf, data: &[u8]) -> Result<Self, EspError> {
        let mut cursor = Cursor::new(data);

        let header = Record::parse(&mut cursor)?;
        Self::validate_esp_file(&header)?;

        let masters = Self::extract_masters(&header);
        let (groups, skipped) = Self::parse_groups(&mut cursor, data)?;

        tracing::debug!(
            plugin = %path.display(),
            masters = masters.len(),
            groups = groups.len(),
            skipped = skipped.len(),
            "插件解析完成"
        );

        Ok(Plugin {
            path,
            header,
            groups,
            masters,
            skipped,
        })
    }

    /// 只解析头部记录，返回头部与主文件列表
    pub fn read_header(data: &[u8]) -> Result<(Record, Vec<String>), EspError> {
        let mut cursor = Cursor::new(data);
        let header = Record::parse(&mut cursor)?;
        Self::validate_esp_file(&header)?;
        let masters = Self::extract_masters(&header);
        Ok((header, masters))
    }

    /// 验证ESP文件格式
    pub(crate) fn validate_esp_file(header: &Record) -> Result<(), EspError> {
        if header.get_type() != "TES4" {
            return Err(EspError::InvalidFormat);
        }
        Ok(())
    }

    /// 解析所有组（并行版本）
    pub(crate) fn parse_groups(
        cursor: &mut Cursor<&[u8]>,
        data: &[u8],
    ) -> Result<(Vec<Group>, Vec<SkippedRecord>), EspError> {
        // 第一遍：快速扫描获取所有顶级 Group 边界
        let group_ranges = Self::scan_group_boundaries(cursor, data)?;

        if group_ranges.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        // 第二遍：并行解析每个 Group
        let parsed: Vec<(Group, Vec<SkippedRecord>)> = group_ranges
            .par_iter()
            .map(|&(start, size)| -> Result<(Group, Vec<SkippedRecord>), EspError> {
                let group_data = &data[start as usize..(start + size as u64) as usize];
                let mut group_cursor = Cursor::new(group_data);
                let mut skipped = Vec::new();
                let group = Group::parse(&mut group_cursor, &mut skipped)?;
                Ok((group, skipped))
            })
            .collect::<Result<_, _>>()?;

        let mut groups = Vec::with_capacity(parsed.len());
        let mut skipped = Vec::new();
        for (group, group_skipped) in parsed {
            groups.push(group);
            skipped.extend(group_skipped);
        }
        Ok((groups, skipped))
    }

    /// 扫描顶级 Group 边界（用于并行解析）
    fn scan_group_boundaries(cursor: &mut Cursor<&[u8]>, data: &[u8]) -> Result<Vec<(u64, u32)>, EspError> {
        let mut boundaries = Vec::new();
        let start_pos = cursor.position();

        while cursor.position() < data.len() as u64 {
            let pos = cursor.position();

            // 至少需要8字节：类型4字节+大小4字节
            if pos + 8 > data.len() as u64 {
                return Err(EspError::Truncated(format!("在位置 {} 有 {} 字节无法解析", pos, data.len() as u64 - pos)));
            }

            let mut type_bytes = [0u8; 4];
            cursor.read_exact(&mut type_bytes)?;
            if TypeCode(type_bytes) != "GRUP" {
                return Err(EspError::Truncated(format!(
                    "在位置 {} 期望 GRUP，但找到 {}",
                    pos,
                    TypeCode(type_bytes)
                )));
            }

            let size = read_u32(cursor)?;
            if size < 24 || size > 200_000_000 || pos + size as u64 > data.len() as u64 {
                return Err(EspError::Truncated(format!("在位置 {} 发现异常 Group 大小: {} bytes", pos, size)));
            }

            boundaries.push((pos, size));
            cursor.set_position(pos + size as u64);
        }

        cursor.set_position(start_pos);
        Ok(boundaries)
    }

    /// 从头部记录提取主文件列表
    pub(crate) fn extract_masters(header: &Record) -> Vec<String> {
        header
            .get_subrecords("MAST")
            .into_iter()
            .filter_map(|sr| sr.text())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryEspReader;
    use crate::plugin::PluginHeader;
    use crate::subrecord::{Subrecord, SubrecordValue};

    fn sample_plugin() -> Plugin {
        let mut group = Group::top_level(TypeCode::new(b"LVLI"));
        let mut record = Record::new(TypeCode::new(b"LVLI"), 0x01000800);
        record.add_subrecord(Subrecord::new(TypeCode::new(b"EDID"), SubrecordValue::zstring("LItemTest")));
        group.push_record(record);

        Plugin::create(
            PathBuf::from("ModA.esp"),
            PluginHeader { version: 1.71, num_records: 2, next_object_id: 0x801 },
            "tester",
            None,
            vec!["Base.esm".to_string()],
            vec![group],
        )
    }

    #[test]
    fn test_load_with_reader() {
        let plugin = sample_plugin();
        let mut reader = MemoryEspReader::new();
        reader.insert("ModA.esp", plugin.to_bytes().unwrap());

        let loaded = Plugin::load_with_reader(PathBuf::from("ModA.esp"), &reader).unwrap();
        assert_eq!(loaded.masters, vec!["Base.esm".to_string()]);
        assert_eq!(loaded.records().len(), 1);
        assert_eq!(loaded.records()[0].get_form_id(), 0x01000800);
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn test_read_header_only() {
        let bytes = sample_plugin().to_bytes().unwrap();
        let (header, masters) = Plugin::read_header(&bytes).unwrap();
        assert!(header.get_type() == "TES4");
        assert_eq!(masters, vec!["Base.esm".to_string()]);
    }

    #[test]
    fn test_rejects_non_plugin() {
        let mut record = Record::new(TypeCode::new(b"LVLI"), 0);
        record.add_subrecord(Subrecord::new(TypeCode::new(b"EDID"), SubrecordValue::zstring("x")));
        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();

        assert!(matches!(
            Plugin::from_bytes(PathBuf::from("bad.esp"), &bytes),
            Err(EspError::InvalidFormat)
        ));
    }

    #[test]
    fn test_trailing_garbage_is_error() {
        let mut bytes = sample_plugin().to_bytes().unwrap();
        bytes.extend_from_slice(b"JUNK");
        assert!(Plugin::from_bytes(PathBuf::from("ModA.esp"), &bytes).is_err());
    }
}
