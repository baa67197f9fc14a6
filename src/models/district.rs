use serde::Serialize;

use crate::error::RequestError;

pub const TAIPEI_CITY_NAME: &str = "台北市";
pub const TAIPEI_CITY_CODE: &str = "63000000";

/// 行政区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct District {
    pub name: &'static str,
    pub code: &'static str,
}

/// 台北市十二个行政区，顺序即查询顺序
pub const TAIPEI_DISTRICTS: [District; 12] = [
    District { name: "松山區", code: "63000010" },
    District { name: "信義區", code: "63000020" },
    District { name: "大安區", code: "63000030" },
    District { name: "中山區", code: "63000040" },
    District { name: "中正區", code: "63000050" },
    District { name: "大同區", code: "63000060" },
    District { name: "萬華區", code: "63000070" },
    District { name: "文山區", code: "63000080" },
    District { name: "南港區", code: "63000090" },
    District { name: "內湖區", code: "63000100" },
    District { name: "士林區", code: "63000110" },
    District { name: "北投區", code: "63000120" },
];

pub fn find_district(name: &str) -> Option<District> {
    TAIPEI_DISTRICTS
        .iter()
        .copied()
        .find(|d| d.name == name.trim())
}

/// 把请求里的行政区名称解析成行政区列表
///
/// - `None` 或空列表表示全部行政区
/// - 结果按固定表的顺序排列，重复名称只保留一次
/// - 任何一个名称不在表中都会拒绝整个请求
pub fn resolve_districts(names: Option<&[String]>) -> Result<Vec<District>, RequestError> {
    let names = match names {
        Some(names) if !names.is_empty() => names,
        _ => return Ok(TAIPEI_DISTRICTS.to_vec()),
    };

    let unknown: Vec<String> = names
        .iter()
        .filter(|name| find_district(name).is_none())
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(RequestError::UnknownDistricts(unknown));
    }

    Ok(TAIPEI_DISTRICTS
        .iter()
        .copied()
        .filter(|d| names.iter().any(|n| n.trim() == d.name))
        .collect())
}
