//! Aggregate performance statistics over a trade table.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::{Result, ValidationError};
use crate::logging::{obj, v_int, v_num, Domain, Logger};
use crate::normalize::{BREAK_EVEN, LOSS, REALIZED_PNL, RETURN_PERCENTAGE, WIN};
use crate::table::{Cell, Table};

/// A ratio whose denominator may be zero. Serializes as a number or `"Infinite"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    Finite(f64),
    Infinite,
}

impl Ratio {
    fn of(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 {
            Ratio::Infinite
        } else {
            Ratio::Finite(numerator / denominator)
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Ratio::Finite(v) => Some(*v),
            Ratio::Infinite => None,
        }
    }

    fn rounded(self) -> Self {
        match self {
            Ratio::Finite(v) => Ratio::Finite(round2(v)),
            Ratio::Infinite => Ratio::Infinite,
        }
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ratio::Finite(v) => write!(f, "{:.2}", v),
            Ratio::Infinite => write!(f, "Infinite"),
        }
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Ratio::Finite(v) => serializer.serialize_f64(*v),
            Ratio::Infinite => serializer.serialize_str("Infinite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "Total_P&L")]
    pub total_pnl: f64,
    #[serde(rename = "Total_Trades")]
    pub total_trades: u64,
    #[serde(rename = "Winning_Trades")]
    pub winning_trades: u64,
    #[serde(rename = "Losing_Trades")]
    pub losing_trades: u64,
    #[serde(rename = "Break_Even_Trades")]
    pub break_even_trades: u64,
    #[serde(rename = "Win_Rate")]
    pub win_rate: f64,
    #[serde(rename = "Loss_Rate")]
    pub loss_rate: f64,
    #[serde(rename = "Average_Win")]
    pub average_win: f64,
    #[serde(rename = "Average_Loss")]
    pub average_loss: f64,
    #[serde(rename = "Risk_Reward_Ratio")]
    pub risk_reward_ratio: Ratio,
    #[serde(rename = "Profit_Factor")]
    pub profit_factor: Ratio,
    #[serde(rename = "Max_Drawdown")]
    pub max_drawdown: f64,
    #[serde(rename = "Sharpe_Ratio")]
    pub sharpe_ratio: f64,
    #[serde(rename = "Max_Consecutive_Wins")]
    pub max_consecutive_wins: u64,
    #[serde(rename = "Max_Consecutive_Losses")]
    pub max_consecutive_losses: u64,
    #[serde(rename = "Best_Single_Trade")]
    pub best_single_trade: f64,
    #[serde(rename = "Worst_Single_Trade")]
    pub worst_single_trade: f64,
}

pub struct MetricsEngine {
    logger: Logger,
}

impl MetricsEngine {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Rows are taken in the order given; sort chronologically beforehand.
    pub fn compute(&self, table: &Table) -> Result<MetricsSnapshot> {
        let Some(pnl_idx) = table.column_index(REALIZED_PNL) else {
            return Err(ValidationError::MissingMetricsColumns(vec![REALIZED_PNL.to_string()]).into());
        };

        let rows: Vec<&Vec<Cell>> = table
            .rows()
            .iter()
            .filter(|r| r[pnl_idx].as_f64().is_some())
            .collect();
        let dropped = table.len() - rows.len();
        if dropped > 0 {
            self.logger.warn(
                Domain::Metrics,
                "null_pnl_rows_dropped",
                obj(&[("rows", v_int(dropped as u64))]),
            );
        }

        let pnl: Vec<f64> = rows.iter().filter_map(|r| r[pnl_idx].as_f64()).collect();
        let flags = |name: &str| -> Option<Vec<bool>> {
            table.column_index(name).map(|i| {
                rows.iter()
                    .map(|r| r[i].as_bool().unwrap_or(false))
                    .collect()
            })
        };
        let wins = flags(WIN);
        let losses = flags(LOSS);
        let break_evens = flags(BREAK_EVEN);
        let count = |f: &Option<Vec<bool>>| f.as_ref().map(|v| v.iter().filter(|b| **b).count() as u64).unwrap_or(0);

        let total_trades = pnl.len() as u64;
        let winning_trades = count(&wins);
        let losing_trades = count(&losses);
        let break_even_trades = count(&break_evens);

        let rate = |n: u64| {
            if total_trades > 0 {
                n as f64 / total_trades as f64 * 100.0
            } else {
                0.0
            }
        };

        let total_pnl: f64 = pnl.iter().sum();
        let positives: Vec<f64> = pnl.iter().copied().filter(|v| *v > 0.0).collect();
        let negatives: Vec<f64> = pnl.iter().copied().filter(|v| *v < 0.0).collect();
        let average_win = mean(&positives).unwrap_or(0.0);
        let average_loss = mean(&negatives).unwrap_or(0.0);
        let gross_profit: f64 = positives.iter().sum();
        let gross_loss: f64 = negatives.iter().sum::<f64>().abs();

        let risk_reward_ratio = match Ratio::of(average_win, average_loss) {
            Ratio::Finite(v) => Ratio::Finite(v.abs()),
            Ratio::Infinite => Ratio::Infinite,
        };
        let profit_factor = Ratio::of(gross_profit, gross_loss);

        let returns: Option<Vec<f64>> = table.column_index(RETURN_PERCENTAGE).map(|i| {
            rows.iter().filter_map(|r| r[i].as_f64()).collect()
        });
        let sharpe_ratio = returns.as_deref().map(sharpe_like).unwrap_or(0.0);

        let snapshot = MetricsSnapshot {
            total_pnl: round2(total_pnl),
            total_trades,
            winning_trades,
            losing_trades,
            break_even_trades,
            win_rate: round2(rate(winning_trades)),
            loss_rate: round2(rate(losing_trades)),
            average_win: round2(average_win),
            average_loss: round2(average_loss),
            risk_reward_ratio: risk_reward_ratio.rounded(),
            profit_factor: profit_factor.rounded(),
            max_drawdown: round2(max_drawdown(&pnl)),
            sharpe_ratio: round2(sharpe_ratio),
            max_consecutive_wins: wins.as_deref().map(longest_run).unwrap_or(0),
            max_consecutive_losses: losses.as_deref().map(longest_run).unwrap_or(0),
            best_single_trade: round2(pnl.iter().copied().fold(None, max_opt).unwrap_or(0.0)),
            worst_single_trade: round2(pnl.iter().copied().fold(None, min_opt).unwrap_or(0.0)),
        };

        self.logger.info(
            Domain::Metrics,
            "metrics_computed",
            obj(&[
                ("trades", v_int(snapshot.total_trades)),
                ("total_pnl", v_num(snapshot.total_pnl)),
                ("win_rate", v_num(snapshot.win_rate)),
                ("max_drawdown", v_num(snapshot.max_drawdown)),
            ]),
        );
        Ok(snapshot)
    }
}

pub fn round2(v: f64) -> f64 {
    let r = (v * 100.0).round() / 100.0;
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn max_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

fn min_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.min(v)))
}

/// Deepest fall of cumulative P&L below its running peak (≤ 0).
/// The peak starts at the first cumulative value, not at zero.
pub fn max_drawdown(pnl: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0f64;
    for v in pnl {
        cumulative += v;
        peak = peak.max(cumulative);
        worst = worst.min(cumulative - peak);
    }
    worst
}

/// Mean over sample standard deviation; 0 when undefined.
pub fn sharpe_like(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let m = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = var.sqrt();
    if sd == 0.0 || !sd.is_finite() {
        0.0
    } else {
        m / sd
    }
}

pub fn longest_run(flags: &[bool]) -> u64 {
    let mut run = 0u64;
    let mut best = 0u64;
    for f in flags {
        if *f {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}
