use serde::{Deserialize, Serialize};

/// Body of `GET /stock/candle`.
///
/// Parallel arrays, one entry per bar. `s` is `"ok"` or `"no_data"`; with
/// `"no_data"` the arrays are absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandleResponse {
    #[serde(rename = "s")]
    pub status: String,

    #[serde(rename = "t", default)]
    pub timestamps: Vec<i64>,

    #[serde(rename = "o", default)]
    pub open: Vec<f64>,

    #[serde(rename = "h", default)]
    pub high: Vec<f64>,

    #[serde(rename = "l", default)]
    pub low: Vec<f64>,

    #[serde(rename = "c", default)]
    pub close: Vec<f64>,

    #[serde(rename = "v", default)]
    pub volume: Vec<f64>,
}

/// One daily bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl CandleResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Zips the parallel arrays into bars. `None` if their lengths disagree.
    pub fn candles(&self) -> Option<Vec<Candle>> {
        let n = self.timestamps.len();
        if [
            self.open.len(),
            self.high.len(),
            self.low.len(),
            self.close.len(),
            self.volume.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return None;
        }
        Some(
            (0..n)
                .map(|i| Candle {
                    timestamp: self.timestamps[i],
                    open: self.open[i],
                    high: self.high[i],
                    low: self.low[i],
                    close: self.close[i],
                    volume: self.volume[i],
                })
                .collect(),
        )
    }
}
