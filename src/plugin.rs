use crate::datatypes::{read_f32, read_u32, RecordFlags, TypeCode};
use crate::group::{Group, SkippedRecord};
use crate::record::Record;
use crate::subrecord::{Subrecord, SubrecordValue};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

mod parser;
mod stats;
mod writer;

pub use stats::PluginStats;

/// TES4 头部 HEDR 子记录内容
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PluginHeader {
    /// 文件格式版本（Skyrim SE 为 1.71）
    pub version: f32,
    /// 记录数量（含组）
    pub num_records: u32,
    /// 下一个可用对象编号
    pub next_object_id: u32,
}

impl PluginHeader {
    fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&self.num_records.to_le_bytes());
        data.extend_from_slice(&self.next_object_id.to_le_bytes());
        data
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        Some(PluginHeader {
            version: read_f32(&mut cursor).ok()?,
            num_records: read_u32(&mut cursor).ok()?,
            next_object_id: read_u32(&mut cursor).ok()?,
        })
    }
}

/// ESP/ESM/ESL 插件
#[derive(Debug, Clone)]
pub struct Plugin {
    /// 文件路径
    pub path: PathBuf,
    /// 头部记录
    pub header: Record,
    /// 组列表
    pub groups: Vec<Group>,
    /// 主文件列表（MAST 顺序即 FormID 高字节索引）
    pub masters: Vec<String>,
    /// 因格式错误被跳过的记录
    pub skipped: Vec<SkippedRecord>,
}

impl Plugin {
    /// 构造新插件（头部包含 HEDR、CNAM、SNAM 以及 MAST/DATA 对）
    pub fn create(
        path: PathBuf,
        header_info: PluginHeader,
        author: &str,
        description: Option<&str>,
        masters: Vec<String>,
        groups: Vec<Group>,
    ) -> Self {
        let mut header = Record::new(TypeCode::new(b"TES4"), 0);
        header.add_subrecord(Subrecord::new(
            TypeCode::new(b"HEDR"),
            SubrecordValue::Bytes(header_info.encode()),
        ));
        header.add_subrecord(Subrecord::new(TypeCode::new(b"CNAM"), SubrecordValue::zstring(author)));
        if let Some(description) = description {
            header.add_subrecord(Subrecord::new(TypeCode::new(b"SNAM"), SubrecordValue::zstring(description)));
        }
        for master in &masters {
            header.add_subrecord(Subrecord::new(TypeCode::new(b"MAST"), SubrecordValue::zstring(master)));
            header.add_subrecord(Subrecord::new(TypeCode::new(b"DATA"), SubrecordValue::Bytes(vec![0; 8])));
        }

        Plugin {
            path,
            header,
            groups,
            masters,
            skipped: Vec::new(),
        }
    }

    /// 获取插件名称（文件名）
    pub fn get_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
    }

    /// 获取插件类型
    pub fn get_type(&self) -> &str {
        if self.is_light() {
            "轻量级文件 (ESL)"
        } else if self.is_master() {
            "主文件 (ESM)"
        } else {
            "插件 (ESP)"
        }
    }

    /// 是否为主文件（扩展名为 .esm 或设置了 ESM 标志）
    pub fn is_master(&self) -> bool {
        self.has_extension("esm") || self.header.get_flags().contains(RecordFlags::MASTER_FILE)
    }

    /// 是否为轻量插件（扩展名为 .esl 或设置了 LightMaster 标志）
    pub fn is_light(&self) -> bool {
        self.has_extension("esl") || self.header.get_flags().contains(RecordFlags::LIGHT_MASTER)
    }

    fn has_extension(&self, expected: &str) -> bool {
        self.path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    }

    /// 头部 HEDR 信息
    pub fn header_info(&self) -> Option<PluginHeader> {
        let hedr = self.header.find_subrecord("HEDR")?;
        PluginHeader::decode(&hedr.encode())
    }

    /// 作者（CNAM）
    pub fn get_author(&self) -> Option<String> {
        self.header.find_subrecord("CNAM").and_then(|sr| sr.text())
    }

    /// 获取所有记录（按文件顺序）
    pub fn records(&self) -> Vec<&Arc<Record>> {
        self.groups.iter().flat_map(|group| group.get_records()).collect()
    }
}
