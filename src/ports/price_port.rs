//! Live price port trait.

pub trait LivePricePort {
    /// Current mid price, or `None` when the source has no quote.
    fn get_live_price(&self, asset: &str) -> Option<f64>;
}
