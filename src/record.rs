use crate::datatypes::{read_u16, read_u32, RecordFlags, TypeCode};
use crate::subrecord::{Subrecord, SUBRECORD_HEADER_SIZE};
use crate::utils::EspError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Cursor, Read, Write};

/// 记录头部大小
pub const RECORD_HEADER_SIZE: u64 = 24;

/// 记录头部（24字节）
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub record_type: TypeCode,
    pub flags: u32,
    pub form_id: u32,
    pub timestamp: u16,
    pub version_control_info: u16,
    pub internal_version: u16,
    pub unknown: u16,
}

/// 记录结构
///
/// FormID 在构造后不可变；加载得到的记录以 `Arc<Record>` 共享，合并时总是构造新记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 记录类型
    pub record_type: TypeCode,
    /// 标志位（原始32位数据）
    pub flags: u32,
    /// 原始 FormID（相对于所属插件）
    form_id: u32,
    /// 时间戳
    pub timestamp: u16,
    /// 版本控制信息
    pub version_control_info: u16,
    /// 内部版本
    pub internal_version: u16,
    /// 未知字段
    pub unknown: u16,
    /// 子记录列表
    subrecords: Vec<Subrecord>,
}

impl Record {
    /// 创建空记录
    pub fn new(record_type: TypeCode, form_id: u32) -> Self {
        Record {
            record_type,
            flags: 0,
            form_id,
            timestamp: 0,
            version_control_info: 0,
            internal_version: 0,
            unknown: 0,
            subrecords: Vec::new(),
        }
    }

    /// 创建与 `template` 头部字段相同、FormID 不同的空记录
    pub fn with_header_of(template: &Record, form_id: u32) -> Self {
        Record {
            record_type: template.record_type,
            flags: template.flags,
            form_id,
            timestamp: template.timestamp,
            version_control_info: template.version_control_info,
            internal_version: template.internal_version,
            unknown: template.unknown,
            subrecords: Vec::new(),
        }
    }

    /// 解析记录
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, EspError> {
        let (header, data) = Self::read_raw(cursor)?;
        Self::decode(header, &data)
    }

    /// 读取头部与数据，游标移动到记录末尾
    pub(crate) fn read_raw(cursor: &mut Cursor<&[u8]>) -> Result<(RecordHeader, Vec<u8>), EspError> {
        Self::validate_header_size(cursor)?;

        let record_type = TypeCode::read(cursor)?;
        let data_size = read_u32(cursor)?;
        Self::validate_data_size(data_size, record_type)?;

        let header = RecordHeader {
            record_type,
            flags: read_u32(cursor)?,
            form_id: read_u32(cursor)?,
            timestamp: read_u16(cursor)?,
            version_control_info: read_u16(cursor)?,
            internal_version: read_u16(cursor)?,
            unknown: read_u16(cursor)?,
        };

        tracing::trace!(
            record_type = %header.record_type,
            form_id = format_args!("{:08X}", header.form_id),
            data_size,
            "解析记录"
        );

        Self::validate_data_availability(cursor, data_size)?;

        let mut data = vec![0u8; data_size as usize];
        cursor.read_exact(&mut data)?;
        Ok((header, data))
    }

    /// 由头部与数据构造记录（解压 + 解码子记录）
    pub(crate) fn decode(header: RecordHeader, data: &[u8]) -> Result<Self, EspError> {
        let subrecords = if header.flags & RecordFlags::COMPRESSED.bits() != 0 {
            let decompressed = Self::decompress_data(data)?;
            Self::parse_subrecords(header.record_type, &decompressed)?
        } else {
            Self::parse_subrecords(header.record_type, data)?
        };

        Ok(Record {
            record_type: header.record_type,
            flags: header.flags,
            form_id: header.form_id,
            timestamp: header.timestamp,
            version_control_info: header.version_control_info,
            internal_version: header.internal_version,
            unknown: header.unknown,
            subrecords,
        })
    }

    /// 验证头部大小
    fn validate_header_size(cursor: &Cursor<&[u8]>) -> Result<(), EspError> {
        if cursor.position() + RECORD_HEADER_SIZE > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated("insufficient data for record header".into()));
        }
        Ok(())
    }

    /// 验证数据大小
    fn validate_data_size(data_size: u32, record_type: TypeCode) -> Result<(), EspError> {
        if data_size > 100_000_000 {  // 100MB限制
            return Err(EspError::Truncated(format!(
                "record {} declares {} bytes (likely corrupted)",
                record_type, data_size
            )));
        }
        Ok(())
    }

    /// 验证数据可用性
    fn validate_data_availability(cursor: &Cursor<&[u8]>, data_size: u32) -> Result<(), EspError> {
        if cursor.position() + data_size as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated(format!(
                "insufficient data for record data: expected {} bytes",
                data_size
            )));
        }
        Ok(())
    }

    /// 解压缩数据
    fn decompress_data(data: &[u8]) -> Result<Vec<u8>, EspError> {
        if data.len() < 4 {
            return Err(EspError::CompressionError("压缩数据太短，无法包含解压大小".into()));
        }

        let mut data_cursor = Cursor::new(data);
        let decompressed_size = read_u32(&mut data_cursor)?;

        if decompressed_size > 50_000_000 {  // 50MB限制
            return Err(EspError::CompressionError(format!(
                "解压大小过大: {} bytes (可能数据损坏)",
                decompressed_size
            )));
        }

        let mut decoder = ZlibDecoder::new(&data[4..]);
        let mut decompressed = Vec::with_capacity(decompressed_size as usize);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| EspError::CompressionError(e.to_string()))?;

        if decompressed.len() != decompressed_size as usize {
            return Err(EspError::CompressionError(format!(
                "解压大小不匹配: 期望 {} bytes，实际 {} bytes",
                decompressed_size,
                decompressed.len()
            )));
        }

        Ok(decompressed)
    }

    /// 解析子记录
    fn parse_subrecords(record_type: TypeCode, data: &[u8]) -> Result<Vec<Subrecord>, EspError> {
        let mut subrecords = Vec::new();
        let mut cursor = Cursor::new(data);

        while cursor.position() < data.len() as u64 {
            let remaining = data.len() as u64 - cursor.position();

            // 剩余字节不足一个子记录头部时，只允许 NULL 填充
            if remaining < SUBRECORD_HEADER_SIZE as u64 {
                let remaining_bytes = &data[cursor.position() as usize..];
                if remaining_bytes.iter().all(|&b| b == 0) {
                    break;
                }
                return Err(EspError::malformed(
                    record_type,
                    "????",
                    format!(
                        "记录末尾有 {} 字节非 NULL 数据，无法解析为子记录: {:02X?}",
                        remaining, remaining_bytes
                    ),
                ));
            }

            subrecords.push(Subrecord::parse(record_type, &mut cursor)?);
        }

        Ok(subrecords)
    }

    /// 获取记录类型
    pub fn get_type(&self) -> TypeCode {
        self.record_type
    }

    /// 获取FormID
    pub fn get_form_id(&self) -> u32 {
        self.form_id
    }

    /// 获取标志位
    pub fn get_flags(&self) -> RecordFlags {
        RecordFlags::from_bits_truncate(self.flags)
    }

    pub fn is_deleted(&self) -> bool {
        self.get_flags().contains(RecordFlags::DELETED)
    }

    /// 追加子记录
    pub fn add_subrecord(&mut self, subrecord: Subrecord) {
        self.subrecords.push(subrecord);
    }

    /// 全部子记录（保持原始顺序）
    pub fn subrecords(&self) -> &[Subrecord] {
        &self.subrecords
    }

    /// 查找子记录
    pub fn find_subrecord(&self, code: &str) -> Option<&Subrecord> {
        self.subrecords.iter().find(|sr| sr.type_code() == code)
    }

    /// 查找所有匹配的子记录（按出现顺序）
    pub fn get_subrecords(&self, code: &str) -> Vec<&Subrecord> {
        self.subrecords.iter().filter(|sr| sr.type_code() == code).collect()
    }

    /// 获取编辑器ID
    pub fn get_editor_id(&self) -> Option<String> {
        self.find_subrecord("EDID").and_then(|sr| sr.text())
    }

    /// 序列化子记录数据（未压缩）
    pub fn encode_subrecords(&self) -> Result<Vec<u8>, EspError> {
        let mut subrecord_data = Vec::new();
        for subrecord in &self.subrecords {
            subrecord.write_to(&mut subrecord_data)?;
        }
        Ok(subrecord_data)
    }

    /// 重新压缩数据
    fn compress_data(subrecord_data: &[u8]) -> Result<Vec<u8>, EspError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(subrecord_data)?;
        let compressed_data = encoder.finish()?;

        let mut result = Vec::with_capacity(compressed_data.len() + 4);
        result.extend_from_slice(&(subrecord_data.len() as u32).to_le_bytes());
        result.extend_from_slice(&compressed_data);
        Ok(result)
    }

    /// 写入记录（带 COMPRESSED 标志时重新压缩）
    pub fn write_to(&self, output: &mut Vec<u8>) -> Result<(), EspError> {
        let subrecord_data = self.encode_subrecords()?;
        let data = if self.flags & RecordFlags::COMPRESSED.bits() != 0 {
            Self::compress_data(&subrecord_data)?
        } else {
            subrecord_data
        };

        output.extend_from_slice(self.record_type.as_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(&self.flags.to_le_bytes());
        output.extend_from_slice(&self.form_id.to_le_bytes());
        output.extend_from_slice(&self.timestamp.to_le_bytes());
        output.extend_from_slice(&self.version_control_info.to_le_bytes());
        output.extend_from_slice(&self.internal_version.to_le_bytes());
        output.extend_from_slice(&self.unknown.to_le_bytes());
        output.extend_from_slice(&data);
        Ok(())
    }

    /// 记录的可读描述，例如 `LVLI [00012E49] LItemSword`
    pub fn describe(&self) -> String {
        match self.get_editor_id() {
            Some(edid) => format!("{} [{:08X}] {}", self.record_type, self.form_id, edid),
            None => format!("{} [{:08X}]", self.record_type, self.form_id),
        }
    }
}
