use serde::{Deserialize, Serialize};

/// Body of `GET /quote`.
///
/// Finnhub uses single-letter keys. `d` and `dp` come back as `null` for
/// symbols it does not know, alongside zeros in every price field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteResponse {
    #[serde(rename = "c")]
    pub current: f64,

    #[serde(rename = "d")]
    pub change: Option<f64>,

    #[serde(rename = "dp")]
    pub change_percent: Option<f64>,

    #[serde(rename = "h")]
    pub high: f64,

    #[serde(rename = "l")]
    pub low: f64,

    #[serde(rename = "o")]
    pub open: f64,

    #[serde(rename = "pc")]
    pub previous_close: f64,

    /// Exchange timestamp of the last trade, unix seconds.
    #[serde(rename = "t", default)]
    pub timestamp: i64,
}

impl QuoteResponse {
    /// The provider's way of saying "no such symbol".
    pub fn is_empty(&self) -> bool {
        self.current == 0.0 && self.previous_close == 0.0
    }
}
