//! Ticker symbols and the refresh universe.

use std::borrow::Borrow;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StockPulseError;

/// Embedded S&P 500 constituent list (`SYMBOL[,sector]` per line).
const SP500: &str = include_str!("../data/sp500.txt");

const MAX_SYMBOL_LEN: usize = 10;

/// A validated, upper-cased ticker symbol such as `AAPL` or `BRK.B`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Trims, upper-cases, and validates a ticker.
    pub fn parse(raw: &str) -> Result<Self, StockPulseError> {
        let s = raw.trim().to_uppercase();
        if s.is_empty() {
            return Err(StockPulseError::InvalidInput("symbol is empty".to_string()));
        }
        if s.len() > MAX_SYMBOL_LEN {
            return Err(StockPulseError::InvalidInput(format!(
                "symbol too long (max {} chars): {}",
                MAX_SYMBOL_LEN, s
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(StockPulseError::InvalidInput(format!(
                "symbol contains invalid characters: {}",
                s
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = StockPulseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> Self {
        s.0
    }
}

/// Parses a comma- or whitespace-separated list of tickers, dropping duplicates
/// while keeping first-seen order.
pub fn parse_symbol_list(raw: &str) -> Result<Vec<Symbol>, StockPulseError> {
    let mut out: Vec<Symbol> = Vec::new();
    for part in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        if part.trim().is_empty() {
            continue;
        }
        let sym = Symbol::parse(part)?;
        if !out.contains(&sym) {
            out.push(sym);
        }
    }
    Ok(out)
}

/// Parses universe text: one ticker per line, `#` comments, anything after the
/// first comma ignored. Invalid lines are an error so a typo is caught before
/// a run spends its rate budget.
pub fn parse_universe(text: &str) -> Result<Vec<Symbol>, StockPulseError> {
    let mut out: Vec<Symbol> = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let ticker = line.split(',').next().unwrap_or(line);
        let sym = Symbol::parse(ticker).map_err(|e| {
            StockPulseError::InvalidInput(format!("universe line {}: {}", lineno + 1, e))
        })?;
        if !out.contains(&sym) {
            out.push(sym);
        }
    }
    Ok(out)
}

/// The built-in S&P 500 universe.
pub fn default_universe() -> Vec<Symbol> {
    // The embedded list is covered by a test, so a parse failure here is a build defect.
    parse_universe(SP500).unwrap_or_default()
}

/// Loads a universe from a file in the same format as the embedded list.
pub fn load_universe_file(path: impl AsRef<Path>) -> Result<Vec<Symbol>, StockPulseError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        StockPulseError::InvalidInput(format!("cannot read universe {}: {}", path.display(), e))
    })?;
    parse_universe(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        assert_eq!(Symbol::parse(" aapl ").unwrap().as_str(), "AAPL");
        assert_eq!(Symbol::parse("brk.b").unwrap().as_str(), "BRK.B");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("   ").is_err());
        assert!(Symbol::parse("AA PL").is_err());
        assert!(Symbol::parse("$AAPL").is_err());
        assert!(Symbol::parse("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn symbol_list_dedups_in_order() {
        let list = parse_symbol_list("msft, aapl,MSFT  nvda").unwrap();
        let names: Vec<&str> = list.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["MSFT", "AAPL", "NVDA"]);
    }

    #[test]
    fn universe_skips_comments_and_extra_columns() {
        let text = "# header\nAAPL,Information Technology\n\n  msft \nAAPL\n";
        let list = parse_universe(text).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].as_str(), "MSFT");
    }

    #[test]
    fn universe_reports_bad_line() {
        let err = parse_universe("AAPL\nNOT A TICKER\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn embedded_universe_parses() {
        let list = parse_universe(SP500).expect("embedded list is valid");
        assert!(list.len() > 400);
        assert_eq!(list.len(), default_universe().len());
        assert!(list.iter().any(|s| s.as_str() == "BRK.B"));
    }

    #[test]
    fn serde_validates() {
        let sym: Symbol = serde_json::from_str("\"tsla\"").unwrap();
        assert_eq!(sym.as_str(), "TSLA");
        assert!(serde_json::from_str::<Symbol>("\"bad ticker\"").is_err());
    }
}
