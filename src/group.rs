use crate::datatypes::{read_i32, read_u16, read_u32, TypeCode};
use crate::record::Record;
use crate::utils::EspError;
use std::io::{Cursor, Read};
use std::sync::Arc;

/// 组头部大小
pub const GROUP_HEADER_SIZE: u32 = 24;

/// 组类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    /// 普通组（顶级，按记录类型划分）
    Normal,
    /// 世界组
    World,
    /// 单元格组
    Cell,
    /// 未知类型
    Unknown(i32),
}

impl GroupType {
    /// 转换为i32值
    pub fn to_i32(&self) -> i32 {
        match self {
            GroupType::Normal => 0,
            GroupType::World => 1,
            GroupType::Cell => 6,
            GroupType::Unknown(value) => *value,
        }
    }
}

impl From<i32> for GroupType {
    fn from(value: i32) -> Self {
        match value {
            0 => GroupType::Normal,
            1 => GroupType::World,
            6 => GroupType::Cell,
            _ => GroupType::Unknown(value),
        }
    }
}

/// 因子记录格式错误而被跳过的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub record_type: TypeCode,
    pub form_id: u32,
    pub reason: String,
}

/// 组结构
#[derive(Debug, Clone)]
pub struct Group {
    /// 标签
    pub label: [u8; 4],
    /// 组类型
    pub group_type: GroupType,
    /// 时间戳
    pub timestamp: u16,
    /// 版本控制信息
    pub version_control_info: u16,
    /// 未知字段
    pub unknown: u32,
    /// 子元素
    pub children: Vec<GroupChild>,
}

/// 组子元素
#[derive(Debug, Clone)]
pub enum GroupChild {
    /// 子组
    Group(Box<Group>),
    /// 记录（不可变快照）
    Record(Arc<Record>),
}

impl Group {
    /// 创建按记录类型划分的顶级组
    pub fn top_level(record_type: TypeCode) -> Self {
        Group {
            label: *record_type.as_bytes(),
            group_type: GroupType::Normal,
            timestamp: 0,
            version_control_info: 0,
            unknown: 0,
            children: Vec::new(),
        }
    }

    /// 解析组
    ///
    /// 子记录格式错误的记录会被跳过并写入 `skipped`，其余错误直接返回。
    pub fn parse(cursor: &mut Cursor<&[u8]>, skipped: &mut Vec<SkippedRecord>) -> Result<Self, EspError> {
        if cursor.position() + GROUP_HEADER_SIZE as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated("insufficient data for group header".into()));
        }

        let type_code = TypeCode::read(cursor)?;
        if type_code != "GRUP" {
            return Err(EspError::Truncated(format!("expected GRUP, found {}", type_code)));
        }

        let size = read_u32(cursor)?;
        if size > 200_000_000 {  // 200MB限制
            return Err(EspError::Truncated(format!("组大小异常: {} bytes (可能数据损坏)", size)));
        }
        if size < GROUP_HEADER_SIZE {
            return Err(EspError::Truncated(format!("组大小太小: {} bytes (最小应为24字节)", size)));
        }

        let mut label = [0u8; 4];
        cursor.read_exact(&mut label)?;
        let group_type = GroupType::from(read_i32(cursor)?);
        let timestamp = read_u16(cursor)?;
        let version_control_info = read_u16(cursor)?;
        let unknown = read_u32(cursor)?;

        let data_size = (size - GROUP_HEADER_SIZE) as u64;
        if cursor.position() + data_size > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated(format!(
                "insufficient data for group data: expected {} bytes",
                data_size
            )));
        }

        let data_end = cursor.position() + data_size;
        let mut children = Vec::new();
        while cursor.position() < data_end {
            // 预读取4字节判断类型
            let peek_pos = cursor.position();
            let peek = TypeCode::read(cursor)?;
            cursor.set_position(peek_pos);

            if peek == "GRUP" {
                let child_group = Group::parse(cursor, skipped)?;
                children.push(GroupChild::Group(Box::new(child_group)));
                continue;
            }

            let (header, data) = Record::read_raw(cursor)?;
            match Record::decode(header, &data) {
                Ok(record) => children.push(GroupChild::Record(Arc::new(record))),
                Err(e) if e.is_record_local() => {
                    tracing::warn!(
                        record_type = %header.record_type,
                        form_id = format_args!("{:08X}", header.form_id),
                        "跳过格式错误的记录: {}", e
                    );
                    skipped.push(SkippedRecord {
                        record_type: header.record_type,
                        form_id: header.form_id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Group {
            label,
            group_type,
            timestamp,
            version_control_info,
            unknown,
            children,
        })
    }

    /// 获取组标签字符串
    pub fn get_label_string(&self) -> String {
        String::from_utf8_lossy(&self.label).into_owned()
    }

    /// 追加记录
    pub fn push_record(&mut self, record: Record) {
        self.children.push(GroupChild::Record(Arc::new(record)));
    }

    /// 获取所有记录（递归，保持文件顺序）
    pub fn get_records(&self) -> Vec<&Arc<Record>> {
        let mut records = Vec::new();
        self.collect_records(&mut records);
        records
    }

    /// 递归收集所有记录
    fn collect_records<'a>(&'a self, records: &mut Vec<&'a Arc<Record>>) {
        for child in &self.children {
            match child {
                GroupChild::Group(group) => group.collect_records(records),
                GroupChild::Record(record) => records.push(record),
            }
        }
    }

    /// 统计子组数量（递归）
    pub fn count_subgroups(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                GroupChild::Group(subgroup) => 1 + subgroup.count_subgroups(),
                GroupChild::Record(_) => 0,
            })
            .sum()
    }

    /// 写入组
    pub fn write_to(&self, output: &mut Vec<u8>) -> Result<(), EspError> {
        let start = output.len();
        output.extend_from_slice(b"GRUP");

        // 临时占位符，稍后计算实际大小
        output.extend_from_slice(&[0u8; 4]);

        output.extend_from_slice(&self.label);
        output.extend_from_slice(&self.group_type.to_i32().to_le_bytes());
        output.extend_from_slice(&self.timestamp.to_le_bytes());
        output.extend_from_slice(&self.version_control_info.to_le_bytes());
        output.extend_from_slice(&self.unknown.to_le_bytes());

        for child in &self.children {
            match child {
                GroupChild::Group(subgroup) => subgroup.write_to(output)?,
                GroupChild::Record(record) => record.write_to(output)?,
            }
        }

        // 组大小包含24字节头部
        let actual_size = (output.len() - start) as u32;
        output[start + 4..start + 8].copy_from_slice(&actual_size.to_le_bytes());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subrecord::{Subrecord, SubrecordValue};

    fn record(form_id: u32, edid: &str) -> Record {
        let mut record = Record::new(TypeCode::new(b"LVLI"), form_id);
        record.add_subrecord(Subrecord::new(TypeCode::new(b"EDID"), SubrecordValue::zstring(edid)));
        record
    }

    #[test]
    fn test_write_then_parse_group() {
        let mut group = Group::top_level(TypeCode::new(b"LVLI"));
        group.push_record(record(0x800, "LItemA"));
        group.push_record(record(0x801, "LItemB"));

        let mut output = Vec::new();
        group.write_to(&mut output).unwrap();
        assert_eq!(u32::from_le_bytes([output[4], output[5], output[6], output[7]]) as usize, output.len());

        let mut skipped = Vec::new();
        let mut cursor = Cursor::new(&output[..]);
        let parsed = Group::parse(&mut cursor, &mut skipped).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(parsed.get_label_string(), "LVLI");
        let records = parsed.get_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get_editor_id().as_deref(), Some("LItemB"));
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let mut group = Group::top_level(TypeCode::new(b"LVLI"));
        group.push_record(record(0x800, "LItemA"));
        let mut broken = Record::new(TypeCode::new(b"LVLI"), 0x801);
        broken.add_subrecord(Subrecord::new(TypeCode::new(b"LLCT"), SubrecordValue::Bytes(vec![1, 2])));
        group.push_record(broken);
        group.push_record(record(0x802, "LItemC"));

        let mut output = Vec::new();
        group.write_to(&mut output).unwrap();

        let mut skipped = Vec::new();
        let mut cursor = Cursor::new(&output[..]);
        let parsed = Group::parse(&mut cursor, &mut skipped).unwrap();

        assert_eq!(parsed.get_records().len(), 2, "格式错误的记录应被跳过");
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].form_id, 0x801);
    }

    #[test]
    fn test_nested_groups_counted() {
        let mut inner = Group::top_level(TypeCode::new(b"LVLI"));
        inner.group_type = GroupType::Cell;
        inner.push_record(record(0x900, "Inner"));
        let mut outer = Group::top_level(TypeCode::new(b"LVLI"));
        outer.children.push(GroupChild::Group(Box::new(inner)));
        outer.push_record(record(0x901, "Outer"));

        assert_eq!(outer.count_subgroups(), 1);
        assert_eq!(outer.get_records().len(), 2);
    }
}
