use crate::Timestamp;

#[derive(Debug, Clone, PartialEq)]
pub struct LinkStat {
    pub from: String,
    pub to: String,
    pub quality: u8,
    pub last_updated: Timestamp,
    pub observed_count: u64,
    pub drop_count: u64,
}
