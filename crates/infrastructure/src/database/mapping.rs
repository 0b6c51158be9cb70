//! 数据库行映射的公共辅助函数
//!
//! UUID 以 TEXT 存储，列表与字典以 JSON TEXT 存储，解析失败统一转换为
//! `SchedulerError::Serialization`。

use farm_core::{SchedulerError, SchedulerResult};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn parse_uuid(row: &SqliteRow, field_name: &str) -> SchedulerResult<Uuid> {
        let text: String = row.try_get(field_name)?;
        Self::parse_uuid_str(&text, field_name)
    }

    pub fn parse_optional_uuid(row: &SqliteRow, field_name: &str) -> SchedulerResult<Option<Uuid>> {
        let text: Option<String> = row.try_get(field_name)?;
        text.map(|t| Self::parse_uuid_str(&t, field_name)).transpose()
    }

    /// 解析 `group_concat` 得到的逗号分隔UUID列表
    pub fn parse_uuid_list(row: &SqliteRow, field_name: &str) -> SchedulerResult<Vec<Uuid>> {
        let text: Option<String> = row.try_get(field_name)?;
        match text {
            Some(text) => Self::parse_uuid_list_str(&text, field_name),
            None => Ok(Vec::new()),
        }
    }

    pub fn parse_json_sqlite<T>(row: &SqliteRow, field_name: &str) -> SchedulerResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let json_str: Option<String> = row.try_get(field_name)?;
        match json_str {
            Some(json_str) if !json_str.is_empty() => serde_json::from_str(&json_str)
                .map_err(|e| SchedulerError::Serialization(format!("解析字段 {field_name} 失败: {e}"))),
            _ => Ok(T::default()),
        }
    }

    pub fn to_json<T: Serialize + ?Sized>(value: &T, what: &str) -> SchedulerResult<String> {
        serde_json::to_string(value)
            .map_err(|e| SchedulerError::Serialization(format!("序列化{what}失败: {e}")))
    }

    fn parse_uuid_str(text: &str, field_name: &str) -> SchedulerResult<Uuid> {
        Uuid::parse_str(text.trim()).map_err(|e| {
            SchedulerError::Serialization(format!("字段 {field_name} 不是有效的UUID ({text}): {e}"))
        })
    }

    fn parse_uuid_list_str(text: &str, field_name: &str) -> SchedulerResult<Vec<Uuid>> {
        text.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| Self::parse_uuid_str(part, field_name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid_list_str() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let parsed = MappingHelpers::parse_uuid_list_str(&format!("{a},{b}"), "dependencies").unwrap();
        assert_eq!(parsed, vec![a, b]);

        assert!(MappingHelpers::parse_uuid_list_str("", "dependencies")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_uuid_is_serialization_error() {
        let err = MappingHelpers::parse_uuid_list_str("not-a-uuid", "dependencies").unwrap_err();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }

    #[test]
    fn test_to_json() {
        let types = vec!["blender".to_string(), "ffmpeg".to_string()];
        assert_eq!(
            MappingHelpers::to_json(&types, "任务类型").unwrap(),
            r#"["blender","ffmpeg"]"#
        );
    }
}
