mod candles;
pub use self::candles::{Candle, CandleResponse};

mod profile;
pub use self::profile::CompanyProfile;

mod quote;
pub use self::quote::QuoteResponse;
