//! 行政区查询上下文
//!
//! 封装"我正在查第几个行政区"这一信息，只用于日志

use std::fmt::Display;

use crate::models::District;

#[derive(Debug, Clone, Copy)]
pub struct DistrictCtx {
    pub district: District,
    /// 在本批次中的序号（从1开始）
    pub index: usize,
    pub total: usize,
}

impl DistrictCtx {
    pub fn new(district: District, index: usize, total: usize) -> Self {
        Self {
            district,
            index,
            total,
        }
    }
}

impl Display for DistrictCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[行政区 {}/{} {}]",
            self.index, self.total, self.district.name
        )
    }
}
