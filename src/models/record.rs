use phf::phf_map;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 编钉类别代码 -> 名称
pub static EDIT_TYPE_NAMES: phf::Map<&'static str, &'static str> = phf_map! {
    "0" => "資料維護",
    "1" => "門牌初編",
    "2" => "門牌改編",
    "3" => "門牌增編",
    "4" => "門牌合併",
    "5" => "門牌廢止",
    "6" => "行政區域調整",
    "7" => "門牌整編",
    "8" => "戶政事務合併",
    "F" => "行政區域調整錯誤更正",
    "G" => "門牌整編錯誤更正",
};

/// 未知代码原样返回
pub fn edit_type_name(code: &str) -> &str {
    EDIT_TYPE_NAMES.get(code).copied().unwrap_or(code)
}

/// 一笔门牌异动记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdRecord {
    pub city: String,
    pub district: String,
    pub address: String,
    /// 民国日期字符串，保留网站原样
    pub date: String,
    #[serde(rename = "type")]
    pub edit_type: String,
    /// 网站返回的原始行，落库时写入 raw_data
    #[serde(skip)]
    pub raw: Value,
}

impl HouseholdRecord {
    /// 从查询结果的一行（v1 地址 / v2 日期 / v3 类别）构造记录
    pub fn from_portal_row(row: &Value, city: &str, district: &str) -> Self {
        let field = |key: &str| match row.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            city: city.to_string(),
            district: district.to_string(),
            address: field("v1"),
            date: field("v2"),
            edit_type: field("v3"),
            raw: row.clone(),
        }
    }

    pub fn edit_type_name(&self) -> &str {
        edit_type_name(&self.edit_type)
    }
}
