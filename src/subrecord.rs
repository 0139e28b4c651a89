use crate::datatypes::{read_u16, read_u32, RawString, TypeCode};
use crate::utils::EspError;
use std::io::{Cursor, Read};

/// LVLO 单个元素的字节宽度
pub const LEVELED_OBJECT_SIZE: usize = 12;
/// COED 所有者数据的字节宽度
pub const OWNER_DATA_SIZE: usize = 12;
/// 子记录头部大小（4字节类型 + 2字节大小）
pub const SUBRECORD_HEADER_SIZE: usize = 6;

/// 子记录的数据布局
///
/// 由 `(记录类型, 子记录类型)` 决定，未登记的组合一律按 `Bytes` 处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubrecordKind {
    U8,
    U32,
    /// 原始 FormID（相对于所属插件的主文件列表）
    FormId,
    /// 以 null 结尾的字符串
    ZString,
    /// 固定宽度的不透明数据
    Fixed(usize),
    /// 任意长度的不透明数据
    Bytes,
    /// 等级列表条目（12字节元组重复 N 次）
    LeveledObjects,
    /// 条目所有者数据（COED）
    Owner,
}

impl SubrecordKind {
    /// 查找子记录布局
    pub fn lookup(record_type: TypeCode, code: TypeCode) -> Self {
        if record_type == "TES4" {
            return match code.as_bytes() {
                b"HEDR" => SubrecordKind::Fixed(12),
                b"DATA" => SubrecordKind::Fixed(8),
                b"CNAM" | b"SNAM" | b"MAST" => SubrecordKind::ZString,
                b"INTV" | b"INCC" => SubrecordKind::U32,
                _ => SubrecordKind::Bytes,
            };
        }

        match code.as_bytes() {
            b"EDID" | b"MODL" => SubrecordKind::ZString,
            b"OBND" => SubrecordKind::Fixed(12),
            b"LVLD" | b"LVLF" | b"LLCT" => SubrecordKind::U8,
            b"LVLG" => SubrecordKind::FormId,
            b"LVLO" => SubrecordKind::LeveledObjects,
            b"COED" => SubrecordKind::Owner,
            _ => SubrecordKind::Bytes,
        }
    }

    /// 固定宽度类型的期望字节数
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            SubrecordKind::U8 => Some(1),
            SubrecordKind::U32 | SubrecordKind::FormId => Some(4),
            SubrecordKind::Fixed(width) => Some(*width),
            SubrecordKind::Owner => Some(OWNER_DATA_SIZE),
            SubrecordKind::ZString | SubrecordKind::Bytes | SubrecordKind::LeveledObjects => None,
        }
    }
}

/// 等级列表条目（LVLO 元素）
///
/// `reference` 为原始 FormID，需要结合来源插件才能解析。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeveledObject {
    pub level: u16,
    pub unknown1: u16,
    pub reference: u32,
    pub count: u16,
    pub unknown2: u16,
}

impl LeveledObject {
    pub fn new(level: u16, reference: u32, count: u16) -> Self {
        LeveledObject {
            level,
            unknown1: 0,
            reference,
            count,
            unknown2: 0,
        }
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, std::io::Error> {
        Ok(LeveledObject {
            level: read_u16(cursor)?,
            unknown1: read_u16(cursor)?,
            reference: read_u32(cursor)?,
            count: read_u16(cursor)?,
            unknown2: read_u16(cursor)?,
        })
    }

    fn write(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.level.to_le_bytes());
        output.extend_from_slice(&self.unknown1.to_le_bytes());
        output.extend_from_slice(&self.reference.to_le_bytes());
        output.extend_from_slice(&self.count.to_le_bytes());
        output.extend_from_slice(&self.unknown2.to_le_bytes());
    }
}

/// 条目所有者数据（COED）：所有者 FormID + 8字节阵营等级/全局变量与耐久度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerData {
    pub owner: u32,
    pub data: [u8; 8],
}

/// 子记录的类型化值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubrecordValue {
    U8(u8),
    U32(u32),
    FormId(u32),
    /// 原始字节（包含结尾的 null）
    ZString(Vec<u8>),
    Bytes(Vec<u8>),
    LeveledObjects(Vec<LeveledObject>),
    Owner(OwnerData),
}

impl SubrecordValue {
    /// 由文本构造 Z字符串（自动追加 null）
    pub fn zstring(text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        SubrecordValue::ZString(bytes)
    }

    /// 按布局解码原始字节
    fn decode(kind: SubrecordKind, data: &[u8]) -> Result<Self, String> {
        if let Some(width) = kind.fixed_width() {
            if data.len() != width {
                return Err(format!("expected {} bytes, found {}", width, data.len()));
            }
        }

        let mut cursor = Cursor::new(data);
        let value = match kind {
            SubrecordKind::U8 => SubrecordValue::U8(data[0]),
            SubrecordKind::U32 => SubrecordValue::U32(read_u32(&mut cursor).map_err(|e| e.to_string())?),
            SubrecordKind::FormId => SubrecordValue::FormId(read_u32(&mut cursor).map_err(|e| e.to_string())?),
            SubrecordKind::ZString => SubrecordValue::ZString(data.to_vec()),
            SubrecordKind::Fixed(_) | SubrecordKind::Bytes => SubrecordValue::Bytes(data.to_vec()),
            SubrecordKind::LeveledObjects => {
                if data.len() % LEVELED_OBJECT_SIZE != 0 {
                    return Err(format!(
                        "length {} is not a multiple of {}",
                        data.len(),
                        LEVELED_OBJECT_SIZE
                    ));
                }
                let mut objects = Vec::with_capacity(data.len() / LEVELED_OBJECT_SIZE);
                for _ in 0..data.len() / LEVELED_OBJECT_SIZE {
                    objects.push(LeveledObject::read(&mut cursor).map_err(|e| e.to_string())?);
                }
                SubrecordValue::LeveledObjects(objects)
            }
            SubrecordKind::Owner => {
                let owner = read_u32(&mut cursor).map_err(|e| e.to_string())?;
                let mut rest = [0u8; 8];
                cursor.read_exact(&mut rest).map_err(|e| e.to_string())?;
                SubrecordValue::Owner(OwnerData { owner, data: rest })
            }
        };
        Ok(value)
    }

    /// 编码后的字节长度
    pub fn byte_length(&self) -> usize {
        match self {
            SubrecordValue::U8(_) => 1,
            SubrecordValue::U32(_) | SubrecordValue::FormId(_) => 4,
            SubrecordValue::ZString(bytes) | SubrecordValue::Bytes(bytes) => bytes.len(),
            SubrecordValue::LeveledObjects(objects) => objects.len() * LEVELED_OBJECT_SIZE,
            SubrecordValue::Owner(_) => OWNER_DATA_SIZE,
        }
    }

    fn encode_into(&self, output: &mut Vec<u8>) {
        match self {
            SubrecordValue::U8(v) => output.push(*v),
            SubrecordValue::U32(v) | SubrecordValue::FormId(v) => output.extend_from_slice(&v.to_le_bytes()),
            SubrecordValue::ZString(bytes) | SubrecordValue::Bytes(bytes) => output.extend_from_slice(bytes),
            SubrecordValue::LeveledObjects(objects) => {
                for object in objects {
                    object.write(output);
                }
            }
            SubrecordValue::Owner(owner) => {
                output.extend_from_slice(&owner.owner.to_le_bytes());
                output.extend_from_slice(&owner.data);
            }
        }
    }
}

/// 子记录结构
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subrecord {
    code: TypeCode,
    value: SubrecordValue,
}

impl Subrecord {
    pub fn new(code: TypeCode, value: SubrecordValue) -> Self {
        Subrecord { code, value }
    }

    /// 按记录类型解码子记录数据
    pub fn decode(record_type: TypeCode, code: TypeCode, data: &[u8]) -> Result<Self, EspError> {
        let kind = SubrecordKind::lookup(record_type, code);
        let value = SubrecordValue::decode(kind, data)
            .map_err(|reason| EspError::malformed(record_type, code, reason))?;
        Ok(Subrecord { code, value })
    }

    /// 解析子记录（头部 + 数据）
    pub fn parse(record_type: TypeCode, cursor: &mut Cursor<&[u8]>) -> Result<Self, EspError> {
        let available = cursor.get_ref().len() as u64;
        if cursor.position() + SUBRECORD_HEADER_SIZE as u64 > available {
            return Err(EspError::malformed(record_type, "????", "insufficient data for subrecord header"));
        }

        let code = TypeCode::read(cursor)?;
        let size = read_u16(cursor)?;

        if cursor.position() + size as u64 > available {
            return Err(EspError::malformed(
                record_type,
                code,
                format!("insufficient data: expected {} bytes", size),
            ));
        }

        let bytes: &[u8] = *cursor.get_ref();
        let start = cursor.position() as usize;
        let data = &bytes[start..start + size as usize];
        cursor.set_position((start + size as usize) as u64);

        Self::decode(record_type, code, data)
    }

    /// 获取子记录类型
    pub fn type_code(&self) -> TypeCode {
        self.code
    }

    pub fn value(&self) -> &SubrecordValue {
        &self.value
    }

    /// 数据部分的字节长度（不含6字节头部）
    pub fn byte_length(&self) -> usize {
        self.value.byte_length()
    }

    /// 编码数据部分
    pub fn encode(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(self.byte_length());
        self.value.encode_into(&mut output);
        output
    }

    /// 写入完整子记录（头部 + 数据）
    pub fn write_to(&self, output: &mut Vec<u8>) -> Result<(), EspError> {
        let length = self.byte_length();
        let size = u16::try_from(length).map_err(|_| {
            EspError::malformed("", self.code, format!("payload of {} bytes exceeds 65535", length))
        })?;
        output.extend_from_slice(self.code.as_bytes());
        output.extend_from_slice(&size.to_le_bytes());
        self.value.encode_into(output);
        Ok(())
    }

    /// 以文本形式读取 Z字符串
    pub fn text(&self) -> Option<String> {
        match &self.value {
            SubrecordValue::ZString(bytes) => Some(RawString::parse_zstring(bytes).content),
            _ => None,
        }
    }

    /// 收集子记录中出现的所有原始 FormID
    pub fn form_ids(&self) -> Vec<u32> {
        match &self.value {
            SubrecordValue::FormId(id) => vec![*id],
            SubrecordValue::LeveledObjects(objects) => objects.iter().map(|o| o.reference).collect(),
            SubrecordValue::Owner(owner) => vec![owner.owner],
            _ => Vec::new(),
        }
    }

    /// 返回 FormID 经过映射后的新子记录
    pub fn map_form_ids(&self, map: &mut dyn FnMut(u32) -> u32) -> Subrecord {
        let value = match &self.value {
            SubrecordValue::FormId(id) => SubrecordValue::FormId(map(*id)),
            SubrecordValue::LeveledObjects(objects) => SubrecordValue::LeveledObjects(
                objects
                    .iter()
                    .map(|o| LeveledObject { reference: map(o.reference), ..*o })
                    .collect(),
            ),
            SubrecordValue::Owner(owner) => SubrecordValue::Owner(OwnerData {
                owner: map(owner.owner),
                data: owner.data,
            }),
            other => other.clone(),
        };
        Subrecord { code: self.code, value }
    }
}
