use crate::services::audit_log::LogType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum ModuleType {
    #[sea_orm(string_value = "logging")]
    Logging,
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleType::Logging => write!(f, "logging"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Eq)]
#[sea_orm(table_name = "module_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub guild_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub module_type: ModuleType,
    pub enabled: bool,
    pub log_channel_id: Option<i64>,
    pub config: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingModuleConfig {
    #[serde(default)]
    pub log_member_updates: bool,
    #[serde(default)]
    pub member_log_channel_id: Option<i64>,
    #[serde(default)]
    pub disabled_log_types: Vec<LogType>,
}

impl LoggingModuleConfig {
    pub fn allows(&self, log_type: LogType) -> bool {
        self.log_member_updates && !self.disabled_log_types.contains(&log_type)
    }
}
