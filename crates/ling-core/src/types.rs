//! 基础标量契约：受约束字符串、访问权限格、单元状态与资源类别。
//!
//! # 设计动机（Why）
//! - 权限判定、生命周期流转与路由决策都依赖这些小而稳定的值类型；
//!   集中定义可避免各子域重复声明导致语义漂移。
//! - 访问类型构成全序格 `NONE < READ < WRITE < EXECUTE`，高权限天然满足
//!   低权限要求；将比较逻辑收敛到 [`AccessType::satisfies`]，调用方不得
//!   自行实现序关系。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::LingError;

/// 非空字符串新类型，框架内所有标识符的底层载体。
///
/// # 契约说明（What）
/// - **输入**：任意可转为 `Arc<str>` 的字符串；空串或纯空白将被拒绝；
/// - **后置条件**：构造成功后内容不可变，可零拷贝共享（`Arc` 克隆）。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyStr(Arc<str>);

impl NonEmptyStr {
    /// 校验并包装输入；空白输入返回 `app.invalid_argument` 错误。
    pub fn new(value: impl Into<Arc<str>>) -> Result<Self, LingError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(LingError::invalid_argument("identifier must not be blank"));
        }
        Ok(Self(value))
    }

    /// 返回底层字符串切片。
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 访问类型格，权限判定的唯一语义锚点。
///
/// # 契约说明（What）
/// - 全序关系 `None < Read < Write < Execute` 由派生的 `Ord` 承载；
/// - [`satisfies`](Self::satisfies)：授权 `self` 是否满足要求 `required`，
///   即 `self >= required`；
/// - 清单文件中以大写形式（`READ`/`WRITE`/`EXECUTE`）书写。
///
/// # 注意事项（Trade-offs）
/// - 不提供 `PartialOrd` 之外的自定义比较入口，避免调用方绕过格语义。
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessType {
    #[default]
    None,
    Read,
    Write,
    Execute,
}

impl AccessType {
    /// 判断当前授权是否满足所需访问级别。
    pub fn satisfies(self, required: AccessType) -> bool {
        self >= required
    }

    /// 返回稳定的大写字符串表示，用于日志与审计记录。
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Execute => "EXECUTE",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单元实例的生命周期状态。
///
/// # 流转约束（What）
/// - `Loading -> Ready`：容器启动成功后由管理器推进；
/// - `Ready -> Dying`：被替换或卸载时推进，此后禁止新的 `enter()`；
/// - `Dying -> Destroyed`：仅当引用计数归零且排水宽限结束。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnitState {
    Loading = 0,
    Ready = 1,
    Dying = 2,
    Destroyed = 3,
}

impl UnitState {
    /// 从原子存储的判别值还原状态；运行时内部使用。
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Loading),
            1 => Some(Self::Ready),
            2 => Some(Self::Dying),
            3 => Some(Self::Destroyed),
            _ => None,
        }
    }

    /// 稳定字符串表示，用于诊断输出。
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "LOADING",
            Self::Ready => "READY",
            Self::Dying => "DYING",
            Self::Destroyed => "DESTROYED",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调用的资源类别，进入治理管道时由适配层标注。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    #[default]
    Rpc,
    Http,
    Web,
}

impl ResourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "RPC",
            Self::Http => "HTTP",
            Self::Web => "WEB",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 键值标签集合，承载实例路由语义（如 `{version: v2, zone: canary}`）。
///
/// # 设计说明（How）
/// - 底层使用 `BTreeMap` 保证遍历顺序确定，路由决策可复现；
/// - [`contains_all`](Self::contains_all)：标签匹配路由的核心判定——
///   本集合是否为请求标签的超集。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSet {
    entries: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从键值对批量构造，测试与清单解析的便捷入口。
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 判断本集合是否包含 `required` 中的全部键值对。
    pub fn contains_all(&self, required: &LabelSet) -> bool {
        required
            .entries
            .iter()
            .all(|(k, v)| self.entries.get(k) == Some(v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 清空全部标签；供按线程复用的调用上下文在调用结束后回收。
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn blank_identifier_rejected() {
        assert!(NonEmptyStr::new("").is_err());
        assert!(NonEmptyStr::new("   ").is_err());
        assert!(NonEmptyStr::new("user").is_ok());
    }

    #[test]
    fn access_lattice_satisfies() {
        assert!(AccessType::Execute.satisfies(AccessType::Write));
        assert!(AccessType::Write.satisfies(AccessType::Read));
        assert!(AccessType::Read.satisfies(AccessType::None));
        assert!(!AccessType::Read.satisfies(AccessType::Write));
        assert!(!AccessType::None.satisfies(AccessType::Read));
    }

    #[test]
    fn label_superset_match() {
        let instance = LabelSet::from_pairs([("version", "v2"), ("zone", "canary")]);
        let request = LabelSet::from_pairs([("version", "v2")]);
        assert!(instance.contains_all(&request));
        assert!(!request.contains_all(&instance));
        assert!(instance.contains_all(&LabelSet::new()));
    }

    proptest! {
        /// 格的自反与传递性：任何授权满足自身；更高授权满足更低要求。
        #[test]
        fn lattice_laws(a in 0u8..4, b in 0u8..4) {
            let access = |raw| match raw {
                0 => AccessType::None,
                1 => AccessType::Read,
                2 => AccessType::Write,
                _ => AccessType::Execute,
            };
            let (a, b) = (access(a), access(b));
            prop_assert!(a.satisfies(a));
            if a.satisfies(b) && b.satisfies(a) {
                prop_assert_eq!(a, b);
            }
            prop_assert!(a.satisfies(b) || b.satisfies(a));
        }
    }
}
