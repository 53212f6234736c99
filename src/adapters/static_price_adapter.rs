//! Live prices from a fixed table, normally the `[prices]` config section.

use crate::ports::price_port::LivePricePort;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct StaticPriceAdapter {
    prices: BTreeMap<String, f64>,
}

impl StaticPriceAdapter {
    pub fn new(prices: BTreeMap<String, f64>) -> Self {
        Self { prices }
    }

    pub fn with_price(mut self, asset: &str, price: f64) -> Self {
        self.prices.insert(asset.to_uppercase(), price);
        self
    }
}

impl LivePricePort for StaticPriceAdapter {
    fn get_live_price(&self, asset: &str) -> Option<f64> {
        self.prices.get(&asset.to_uppercase()).copied()
    }
}
