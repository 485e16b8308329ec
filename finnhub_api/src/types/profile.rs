use serde::{Deserialize, Serialize};

/// Body of `GET /stock/profile2`. Every field is optional because the
/// provider returns `{}` for unknown symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub finnhub_industry: Option<String>,
    #[serde(default)]
    pub market_capitalization: Option<f64>,
    #[serde(default)]
    pub share_outstanding: Option<f64>,
    #[serde(default)]
    pub ipo: Option<String>,
    #[serde(default)]
    pub weburl: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

impl CompanyProfile {
    pub fn is_empty(&self) -> bool {
        self.ticker.is_none() && self.name.is_none()
    }
}
