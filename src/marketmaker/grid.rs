//! Grid trading strategy (spec.md §3, §4.6 "Grid strategy").

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GridStatus {
    Waiting,
    Filled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GridSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: GridStatus,
    pub side: GridSide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridStrategy {
    pub strategy_id: String,
    pub symbol: String,
    pub upper_price: Decimal,
    pub lower_price: Decimal,
    pub grid_number: u32,
    pub quantity_per_grid: Decimal,
    pub grids: Vec<Grid>,
}

#[derive(Debug, Clone)]
pub struct GridOrderAction {
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: GridSide,
}

impl GridStrategy {
    /// Evenly spaced grid lines between `lower_price` and `upper_price`,
    /// alternating BUY below the midpoint and SELL above it.
    pub fn new_evenly_spaced(strategy_id: &str, symbol: &str, lower: Decimal, upper: Decimal, grid_number: u32, qty_per_grid: Decimal) -> Self {
        let mut grids = Vec::with_capacity(grid_number as usize);
        if grid_number > 0 {
            let step = (upper - lower) / Decimal::from(grid_number);
            let mid = (upper + lower) / Decimal::from(2);
            for i in 0..=grid_number {
                let price = lower + step * Decimal::from(i);
                let side = if price <= mid { GridSide::Buy } else { GridSide::Sell };
                grids.push(Grid { price, quantity: qty_per_grid, status: GridStatus::Waiting, side });
            }
        }
        Self { strategy_id: strategy_id.to_string(), symbol: symbol.to_string(), upper_price: upper, lower_price: lower, grid_number, quantity_per_grid: qty_per_grid, grids }
    }

    /// On a price update, scans grids in order and fires every WAITING grid
    /// whose trigger is crossed (spec.md §4.6). One `GridOrderAction` per
    /// triggered grid; the grid is marked FILLED.
    pub fn on_price_update(&mut self, new_price: Decimal) -> Vec<GridOrderAction> {
        let mut actions = Vec::new();
        for grid in &mut self.grids {
            if grid.status != GridStatus::Waiting {
                continue;
            }
            let triggered = match grid.side {
                GridSide::Buy => new_price <= grid.price,
                GridSide::Sell => new_price >= grid.price,
            };
            if triggered {
                actions.push(GridOrderAction { price: grid.price, quantity: grid.quantity, side: grid.side });
                grid.status = GridStatus::Filled;
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_drop_triggers_waiting_buy_grids_below_it() {
        let mut grid = GridStrategy::new_evenly_spaced("g1", "BTC", dec!(90), dec!(110), 4, dec!(1));
        let actions = grid.on_price_update(dec!(95));
        assert!(!actions.is_empty());
        for action in &actions {
            assert_eq!(action.side, GridSide::Buy);
            assert!(action.price >= dec!(95));
        }
        // filled grids don't fire twice
        let actions2 = grid.on_price_update(dec!(95));
        assert!(actions2.is_empty());
    }

    #[test]
    fn price_rise_triggers_waiting_sell_grids_below_it() {
        let mut grid = GridStrategy::new_evenly_spaced("g2", "BTC", dec!(90), dec!(110), 4, dec!(1));
        let actions = grid.on_price_update(dec!(115));
        assert!(actions.iter().all(|a| a.side == GridSide::Sell));
        assert!(!actions.is_empty());
    }
}
