//! 单元定义：不可变描述符与 `ling.yml` 清单模型。
//!
//! # 设计动机（Why）
//! - 安装、升级与治理基线都以定义为唯一输入；定义一旦构造即不可变，
//!   升级通过安装携带新版本的定义完成，而非原地修改；
//! - 清单键一律 kebab-case，且**不接受**顶层 `ling:` 包装节点——
//!   解析期直接拒绝未知顶层键。
//!
//! # 集成方式（How）
//! - 清单文件的扫描与读取属于外部适配层；本模块只提供
//!   [`UnitDefinition::from_yaml_str`] 这一解析入口（pack 参考：
//!   `serde_yml` 解析 YAML 配置的通行做法）。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::LingError;
use crate::ids::UnitId;
use crate::types::AccessType;

/// 单元代码的来源。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitSource {
    /// 生产安装：打包归档文件。
    Packaged(PathBuf),
    /// 开发安装：未打包目录，支持热替换。
    Directory(PathBuf),
}

impl UnitSource {
    /// 来源指向的文件系统路径。
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Packaged(path) | Self::Directory(path) => path,
        }
    }

    pub const fn is_dev(&self) -> bool {
        matches!(self, Self::Directory(_))
    }
}

/// 声明式能力授权：安装成功后写入权限服务。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CapabilityGrant {
    pub capability: String,
    pub access_type: AccessType,
}

/// 按方法模式声明的权限规则（单元声明基线的来源）。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PermissionRule {
    /// ant 风格方法名通配，如 `get*`。
    pub method_pattern: String,
    pub permission_id: String,
}

/// 按方法模式声明的审计规则。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AuditRule {
    pub method_pattern: String,
    pub enabled: bool,
    #[serde(default)]
    pub action: Option<String>,
}

/// 单元声明的治理基线：能力授权 + 方法级权限/审计规则。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GovernanceSection {
    #[serde(default)]
    pub capabilities: Vec<CapabilityGrant>,
    #[serde(default)]
    pub permissions: Vec<PermissionRule>,
    #[serde(default)]
    pub audits: Vec<AuditRule>,
}

/// 单元的不可变描述符。
///
/// # 契约说明（What）
/// - **不变量**：`id` 与 `version` 非空；两份共享 `id` 的活动定义必须
///   版本互异（由实例池在安装期校验）；
/// - `main_entry` 为启动对象定位符，具体语义由容器适配层解释；
/// - `properties` 承载任意标签，其中 `canary: true` 表示金丝雀单元。
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UnitDefinition {
    id: String,
    version: String,
    main_entry: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    governance: GovernanceSection,
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
}

impl UnitDefinition {
    /// 程序化构造入口，测试与内嵌单元使用；清单路径走
    /// [`from_yaml_str`](Self::from_yaml_str)。
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        main_entry: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            main_entry: main_entry.into(),
            description: None,
            governance: GovernanceSection::default(),
            properties: BTreeMap::new(),
        }
    }

    /// 追加一条能力授权（builder 风格）。
    pub fn with_capability(mut self, capability: impl Into<String>, access: AccessType) -> Self {
        self.governance.capabilities.push(CapabilityGrant {
            capability: capability.into(),
            access_type: access,
        });
        self
    }

    /// 追加一条方法级权限规则。
    pub fn with_permission_rule(
        mut self,
        method_pattern: impl Into<String>,
        permission_id: impl Into<String>,
    ) -> Self {
        self.governance.permissions.push(PermissionRule {
            method_pattern: method_pattern.into(),
            permission_id: permission_id.into(),
        });
        self
    }

    /// 追加一条审计规则。
    pub fn with_audit_rule(
        mut self,
        method_pattern: impl Into<String>,
        enabled: bool,
        action: Option<String>,
    ) -> Self {
        self.governance.audits.push(AuditRule {
            method_pattern: method_pattern.into(),
            enabled,
            action,
        });
        self
    }

    /// 设置任意属性标签。
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// 解析 YAML 清单并执行不变量校验。
    ///
    /// # 边界行为
    /// - 顶层出现 `ling:` 包装节点或其他未知键时返回
    ///   `app.invalid_argument`；
    /// - `id`/`version`/`main-entry` 缺失或为空同样拒绝。
    pub fn from_yaml_str(manifest: &str) -> Result<Self, LingError> {
        let definition: UnitDefinition = serde_yml::from_str(manifest)
            .map_err(|err| LingError::invalid_argument(format!("manifest parse error: {err}")))?;
        definition.validate()?;
        Ok(definition)
    }

    /// 校验描述符不变量；程序化构造的定义在安装前也会走到这里。
    pub fn validate(&self) -> Result<(), LingError> {
        if self.id.trim().is_empty() {
            return Err(LingError::invalid_argument("unit id must not be blank"));
        }
        if self.version.trim().is_empty() {
            return Err(LingError::invalid_argument("unit version must not be blank"));
        }
        if self.main_entry.trim().is_empty() {
            return Err(LingError::invalid_argument("main-entry must not be blank"));
        }
        for grant in &self.governance.capabilities {
            if grant.capability.trim().is_empty() {
                return Err(LingError::invalid_argument("capability must not be blank"));
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 以受校验的 [`UnitId`] 形式返回标识。
    pub fn unit_id(&self) -> Result<UnitId, LingError> {
        UnitId::parse(self.id.as_str())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn main_entry(&self) -> &str {
        &self.main_entry
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn governance(&self) -> &GovernanceSection {
        &self.governance
    }

    /// 读取属性并按标量语义转成字符串（布尔与数字同样可读出）。
    pub fn property_str(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// `properties.canary == true` 时该定义描述金丝雀单元。
    pub fn is_canary(&self) -> bool {
        self.property_str("canary")
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
id: user
version: "1.0.0"
main-entry: com.demo.UserUnit
description: user domain unit
governance:
  capabilities:
    - capability: "storage:sql"
      access-type: READ
  permissions:
    - method-pattern: "get*"
      permission-id: "user:READ"
  audits:
    - method-pattern: "delete*"
      enabled: true
      action: "user-delete"
properties:
  canary: true
  zone: cn-east
"#;

    #[test]
    fn manifest_round_trip() {
        let def = UnitDefinition::from_yaml_str(MANIFEST).expect("parse manifest");
        assert_eq!(def.id(), "user");
        assert_eq!(def.version(), "1.0.0");
        assert_eq!(def.governance().capabilities.len(), 1);
        assert_eq!(
            def.governance().capabilities[0].access_type,
            AccessType::Read
        );
        assert_eq!(def.governance().audits[0].action.as_deref(), Some("user-delete"));
        assert!(def.is_canary());
        assert_eq!(def.property_str("zone").as_deref(), Some("cn-east"));
    }

    #[test]
    fn wrapped_manifest_rejected() {
        let wrapped = r#"
ling:
  id: user
  version: "1.0.0"
  main-entry: com.demo.UserUnit
"#;
        assert!(UnitDefinition::from_yaml_str(wrapped).is_err());
    }

    #[test]
    fn blank_fields_rejected() {
        let def = UnitDefinition::new("", "1.0.0", "entry");
        assert!(def.validate().is_err());
        let def = UnitDefinition::new("user", " ", "entry");
        assert!(def.validate().is_err());
    }
}
