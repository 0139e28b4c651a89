pub mod config;
pub mod datatypes;
pub mod formid;
pub mod group;
pub mod io;
pub mod load_order;
pub mod merge;
pub mod patch;
pub mod plugin;
pub mod record;
pub mod session;
pub mod sink;
pub mod subrecord;
pub mod utils;

// 重新导出主要结构
pub use config::MergeConfig;
pub use formid::{CanonicalFormId, FormIdResolver};
pub use group::Group;
pub use load_order::{parse_load_order_list, LoadOrder, LoadOrderResolver, RecordVersion};
pub use merge::{merge_leveled_lists, LeveledListMerger, LvloCount, MergedLeveledList};
pub use patch::PatchAssembler;
pub use plugin::{Plugin, PluginStats};
pub use record::Record;
pub use session::{MergeOutcome, MergeReport, MergeSession};
pub use sink::{CollectingSink, Severity, TracingSink, Warning, WarningKind, WarningSink};
pub use subrecord::{Subrecord, SubrecordKind, SubrecordValue};
pub use utils::EspError;

// 常量定义
pub const SUPPORTED_EXTENSIONS: &[&str] = &["esp", "esm", "esl"];
