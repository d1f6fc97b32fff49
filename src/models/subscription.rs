use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub business_id: String,
    pub plan: Plan,
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    BasicMonthly,
    BasicAnnual,
    ProMonthly,
    ProAnnual,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::BasicMonthly => "basic_monthly",
            Plan::BasicAnnual => "basic_annual",
            Plan::ProMonthly => "pro_monthly",
            Plan::ProAnnual => "pro_annual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic_monthly" => Some(Plan::BasicMonthly),
            "basic_annual" => Some(Plan::BasicAnnual),
            "pro_monthly" => Some(Plan::ProMonthly),
            "pro_annual" => Some(Plan::ProAnnual),
            _ => None,
        }
    }

    pub fn is_annual(&self) -> bool {
        matches!(self, Plan::BasicAnnual | Plan::ProAnnual)
    }

    /// List price in whole currency units.
    pub fn price(&self) -> i64 {
        match self {
            Plan::BasicMonthly => 1_000,
            Plan::BasicAnnual => 10_000,
            Plan::ProMonthly => 2_500,
            Plan::ProAnnual => 25_000,
        }
    }
}
