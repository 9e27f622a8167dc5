//! SimulatedPosition: per (run, symbol) mark-to-market state, updated by the Backtest
//! Engine on fills and on every tick's remark step.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedPosition {
    pub run_id: String,
    pub symbol: String,
    pub qty: f64,
    pub side: PositionSide,
    pub avg_entry_price: f64,
    pub realized_pnl: f64,
    pub mark_value: f64,
    pub unrealized_pnl: f64,
}

impl SimulatedPosition {
    pub fn flat(run_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            symbol: symbol.into(),
            qty: 0.0,
            side: PositionSide::Flat,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
            mark_value: 0.0,
            unrealized_pnl: 0.0,
        }
    }

    fn recompute_side(&mut self) {
        self.side = if self.qty > 1e-12 {
            PositionSide::Long
        } else if self.qty < -1e-12 {
            PositionSide::Short
        } else {
            self.qty = 0.0;
            PositionSide::Flat
        };
    }

    /// Apply a signed fill (`signed_qty` positive for buys, negative for sells) to the
    /// position, realizing pnl on any quantity that closes existing exposure.
    pub fn apply_fill(&mut self, signed_qty: f64, price: f64) {
        let same_direction = self.qty == 0.0 || self.qty.signum() == signed_qty.signum();

        if same_direction {
            let new_qty = self.qty + signed_qty;
            if new_qty != 0.0 {
                self.avg_entry_price =
                    (self.avg_entry_price * self.qty.abs() + price * signed_qty.abs())
                        / new_qty.abs();
            }
            self.qty = new_qty;
        } else {
            let closing_qty = signed_qty.abs().min(self.qty.abs());
            let direction = if self.qty > 0.0 { 1.0 } else { -1.0 };
            self.realized_pnl += direction * (price - self.avg_entry_price) * closing_qty;

            let remaining_close = signed_qty.abs() - closing_qty;
            self.qty += signed_qty.signum() * closing_qty;
            if remaining_close > 1e-12 {
                // Flipped through flat: the remainder opens a new position at `price`.
                self.qty = signed_qty.signum() * remaining_close;
                self.avg_entry_price = price;
            } else if self.qty == 0.0 {
                self.avg_entry_price = 0.0;
            }
        }
        self.recompute_side();
    }

    /// Re-mark the position against the current bar close.
    pub fn remark(&mut self, close_price: f64) {
        self.mark_value = self.qty * close_price;
        self.unrealized_pnl = self.qty * (close_price - self.avg_entry_price);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_long_position() {
        let mut pos = SimulatedPosition::flat("r1", "BTC/USD");
        pos.apply_fill(1.0, 100.0);
        assert_eq!(pos.qty, 1.0);
        assert_eq!(pos.side, PositionSide::Long);
        assert_eq!(pos.avg_entry_price, 100.0);
    }

    #[test]
    fn realizes_pnl_on_close() {
        let mut pos = SimulatedPosition::flat("r1", "BTC/USD");
        pos.apply_fill(1.0, 100.0);
        pos.apply_fill(-1.0, 110.0);
        assert_eq!(pos.qty, 0.0);
        assert_eq!(pos.side, PositionSide::Flat);
        assert!((pos.realized_pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn remark_updates_unrealized() {
        let mut pos = SimulatedPosition::flat("r1", "BTC/USD");
        pos.apply_fill(2.0, 100.0);
        pos.remark(105.0);
        assert!((pos.unrealized_pnl - 10.0).abs() < 1e-9);
        assert!((pos.mark_value - 210.0).abs() < 1e-9);
    }
}
