//! FormID 与规范化标识
//!
//! 插件文件中的 FormID 高8位是主文件索引（指向该插件自己的 MAST 列表），
//! 低24位是对象编号。索引等于（或超过）主文件数量时表示插件自身定义的记录。
//! 加载顺序确定后，每个 FormID 都可以解析为唯一的 [`CanonicalFormId`]。

use std::fmt;

/// 对象编号掩码（低24位）
pub const OBJECT_INDEX_MASK: u32 = 0x00FF_FFFF;

/// 取主文件索引（高8位）
pub fn master_index(raw: u32) -> u8 {
    (raw >> 24) as u8
}

/// 取对象编号（低24位）
pub fn object_index(raw: u32) -> u32 {
    raw & OBJECT_INDEX_MASK
}

/// 由主文件索引与对象编号组合原始 FormID
pub fn compose(master: u8, object: u32) -> u32 {
    ((master as u32) << 24) | (object & OBJECT_INDEX_MASK)
}

/// 规范化 FormID：定义该记录的插件（加载顺序索引）+ 对象编号
///
/// 两条记录是同一实体，当且仅当它们的规范化 FormID 相等。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalFormId {
    pub plugin: usize,
    pub object: u32,
}

impl CanonicalFormId {
    /// 空引用（原始 FormID 为 0），不属于任何插件
    pub const NULL: CanonicalFormId = CanonicalFormId {
        plugin: usize::MAX,
        object: 0,
    };

    pub fn new(plugin: usize, object: u32) -> Self {
        CanonicalFormId {
            plugin,
            object: object & OBJECT_INDEX_MASK,
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for CanonicalFormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("[--]000000");
        }
        write!(f, "[{:02X}]{:06X}", self.plugin, self.object)
    }
}

/// FormID 解析服务
///
/// 合并引擎只依赖这个接口，而不是完整的加载顺序。
pub trait FormIdResolver: Send + Sync {
    /// 将某插件中的原始 FormID 解析为规范化 FormID
    fn resolve(&self, plugin: usize, raw: u32) -> CanonicalFormId;

    /// `candidate` 是否为 `plugin` 的（传递）主文件
    fn is_master_of(&self, plugin: usize, candidate: usize) -> bool;

    /// 插件名称（用于日志与报告）
    fn plugin_name(&self, plugin: usize) -> &str;
}
