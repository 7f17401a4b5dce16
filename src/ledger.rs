//! Stock Ledger Aggregator.
//!
//! Movements are derived from committed facts only: each production batch is
//! an INBOUND movement, each order line an OUTBOUND movement dated by its
//! order. Balances are sums of signed quantities; nothing here writes to the
//! base tables.

use crate::entities::{MovementType, Order, OrderLine, Product, ProductionBatch, Record, StockMovement};
use crate::error::{ReconcileError, Result};
use crate::schema::TableName;
use crate::store::TargetStore;
use chrono::{NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    OutOfStock,
    Low,
    Ok,
}

impl StockStatus {
    /// `stock <= 0` is out of stock, `0 < stock <= threshold` is low.
    pub fn classify(current_stock: i64, low_stock_threshold: i64) -> Self {
        if current_stock <= 0 {
            StockStatus::OutOfStock
        } else if current_stock <= low_stock_threshold {
            StockStatus::Low
        } else {
            StockStatus::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::OutOfStock => "OUT_OF_STOCK",
            StockStatus::Low => "LOW",
            StockStatus::Ok => "OK",
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of the stock report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockReportRow {
    pub product_id: i64,
    pub name: String,
    pub unit_cost: Option<Decimal>,
    pub total_inbound: i64,
    pub total_outbound: i64,
    pub current_stock: i64,
    pub status: StockStatus,
    pub last_outbound_on: Option<NaiveDateTime>,
    /// Distinct orders with an outbound movement for the product
    pub order_count: usize,
}

/// Balance after one movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalancePoint {
    pub movement_id: i64,
    pub occurred_on: NaiveDateTime,
    pub signed_quantity: i64,
    pub balance: i64,
}

/// Derive movements from production batches and order lines.
///
/// Movement ids follow a sort on `(occurred_on, INBOUND first, production_id,
/// order_id, line_id, product_id)`, all compared as integers, so the same
/// facts always give the same ids. Lines whose order
/// is unknown have no date and are left out.
pub fn derive_movements(
    batches: &[ProductionBatch],
    orders: &[Order],
    lines: &[OrderLine],
) -> Vec<StockMovement> {
    let order_dates: BTreeMap<i64, NaiveDateTime> =
        orders.iter().map(|o| (o.order_id, o.order_date)).collect();

    let mut movements: Vec<StockMovement> = batches
        .iter()
        .map(|batch| StockMovement {
            movement_id: 0,
            product_id: batch.product_id,
            movement_type: MovementType::Inbound,
            signed_quantity: batch.quantity_produced,
            occurred_on: batch.produced_on.and_time(NaiveTime::MIN),
            reference: format!("production:{}", batch.production_id),
            production_id: Some(batch.production_id),
            order_id: None,
        })
        .collect();

    for line in lines {
        let occurred_on = match order_dates.get(&line.order_id) {
            Some(date) => *date,
            None => {
                tracing::warn!(
                    line_id = line.line_id,
                    order_id = line.order_id,
                    "Order line without order, no outbound movement"
                );
                continue;
            }
        };
        movements.push(StockMovement {
            movement_id: 0,
            product_id: line.product_id,
            movement_type: MovementType::Outbound,
            signed_quantity: -line.quantity,
            occurred_on,
            reference: format!("order:{}:line:{}", line.order_id, line.line_id),
            production_id: None,
            order_id: Some(line.order_id),
        });
    }

    movements.sort_by_key(|m| {
        (
            m.occurred_on,
            m.movement_type,
            m.production_id,
            m.order_id,
            line_of(&m.reference),
            m.product_id,
        )
    });
    for (position, movement) in movements.iter_mut().enumerate() {
        movement.movement_id = position as i64 + 1;
    }
    movements
}

fn line_of(reference: &str) -> Option<i64> {
    reference.rsplit_once(":line:").and_then(|(_, id)| id.parse().ok())
}

pub(crate) fn read_records<R: Record, S: TargetStore + ?Sized>(store: &S) -> Result<Vec<R>> {
    store
        .read_rows(R::TABLE)?
        .iter()
        .map(|row| {
            R::from_row(row).map_err(|cause| ReconcileError::LoadFailure {
                table: R::TABLE,
                cause: format!("unreadable stored row: {}", cause),
            })
        })
        .collect()
}

/// Movements and products, ready for balance queries
#[derive(Debug, Clone)]
pub struct StockLedger {
    products: Vec<Product>,
    movements: Vec<StockMovement>,
    low_stock_threshold: i64,
}

impl StockLedger {
    pub fn new(products: Vec<Product>, movements: Vec<StockMovement>, low_stock_threshold: i64) -> Self {
        Self {
            products,
            movements,
            low_stock_threshold,
        }
    }

    /// Read the committed facts back from the store and derive movements.
    pub fn from_store<S: TargetStore + ?Sized>(store: &S, low_stock_threshold: i64) -> Result<Self> {
        let products: Vec<Product> = read_records(store)?;
        let batches: Vec<ProductionBatch> = read_records(store)?;
        let orders: Vec<Order> = read_records(store)?;
        let lines: Vec<OrderLine> = read_records(store)?;

        let movements = derive_movements(&batches, &orders, &lines);
        tracing::info!(
            products = products.len(),
            inbound = batches.len(),
            outbound = movements.len() - batches.len(),
            "Derived stock movements"
        );
        Ok(Self::new(products, movements, low_stock_threshold))
    }

    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    pub fn low_stock_threshold(&self) -> i64 {
        self.low_stock_threshold
    }

    /// Stock of a product at `at` (movements with `occurred_on <= at`)
    pub fn balance_at(&self, product_id: i64, at: NaiveDateTime) -> i64 {
        self.movements
            .iter()
            .filter(|m| m.product_id == product_id && m.occurred_on <= at)
            .map(|m| m.signed_quantity)
            .sum()
    }

    /// Balance after each movement of a product, in ledger order
    pub fn running_balance(&self, product_id: i64) -> Vec<BalancePoint> {
        let mut balance = 0;
        self.movements
            .iter()
            .filter(|m| m.product_id == product_id)
            .map(|m| {
                balance += m.signed_quantity;
                BalancePoint {
                    movement_id: m.movement_id,
                    occurred_on: m.occurred_on,
                    signed_quantity: m.signed_quantity,
                    balance,
                }
            })
            .collect()
    }

    /// Report over every movement
    pub fn report(&self) -> Vec<StockReportRow> {
        self.aggregate(None)
    }

    /// Report over movements up to and including `at`
    pub fn report_as_of(&self, at: NaiveDateTime) -> Vec<StockReportRow> {
        self.aggregate(Some(at))
    }

    fn aggregate(&self, until: Option<NaiveDateTime>) -> Vec<StockReportRow> {
        #[derive(Default)]
        struct Totals {
            inbound: i64,
            outbound: i64,
            last_outbound_on: Option<NaiveDateTime>,
            orders: BTreeSet<i64>,
        }

        let mut totals: BTreeMap<i64, Totals> = BTreeMap::new();
        for movement in &self.movements {
            if until.map_or(false, |at| movement.occurred_on > at) {
                continue;
            }
            let entry = totals.entry(movement.product_id).or_default();
            match movement.movement_type {
                MovementType::Inbound => entry.inbound += movement.signed_quantity,
                MovementType::Outbound => {
                    entry.outbound += movement.signed_quantity.abs();
                    entry.last_outbound_on = entry.last_outbound_on.max(Some(movement.occurred_on));
                    if let Some(order_id) = movement.order_id {
                        entry.orders.insert(order_id);
                    }
                }
            }
        }

        let mut rows: Vec<StockReportRow> = self
            .products
            .iter()
            .map(|product| {
                let t = totals.remove(&product.product_id).unwrap_or_default();
                let current_stock = t.inbound - t.outbound;
                StockReportRow {
                    product_id: product.product_id,
                    name: product.name.clone(),
                    unit_cost: product.unit_cost,
                    total_inbound: t.inbound,
                    total_outbound: t.outbound,
                    current_stock,
                    status: StockStatus::classify(current_stock, self.low_stock_threshold),
                    last_outbound_on: t.last_outbound_on,
                    order_count: t.orders.len(),
                }
            })
            .collect();

        if !totals.is_empty() {
            tracing::warn!(
                products = ?totals.keys().collect::<Vec<_>>(),
                "Movements for products missing from the product table"
            );
        }

        rows.sort_by_key(|r| (r.current_stock, r.product_id));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn product(id: i64, name: &str) -> Product {
        Product {
            product_id: id,
            name: name.to_string(),
            unit_cost: Some(Decimal::new(4990, 2)),
        }
    }

    fn order(id: i64, d: u32) -> Order {
        Order {
            order_id: id,
            order_number: format!("CMD-{}", id),
            order_date: day(d).and_hms_opt(10, 0, 0).unwrap(),
            reseller_id: 1,
        }
    }

    fn line(id: i64, order_id: i64, product_id: i64, quantity: i64) -> OrderLine {
        OrderLine {
            line_id: id,
            order_id,
            product_id,
            quantity,
            unit_sale_price: None,
        }
    }

    fn scenario() -> StockLedger {
        let batches = vec![ProductionBatch {
            production_id: 1,
            product_id: 1,
            quantity_produced: 100,
            produced_on: day(1),
        }];
        let orders = vec![order(1, 5), order(2, 9)];
        let lines = vec![line(1, 1, 1, 30), line(2, 2, 1, 45)];
        let movements = derive_movements(&batches, &orders, &lines);
        StockLedger::new(vec![product(1, "Router"), product(2, "Switch")], movements, 10)
    }

    #[test]
    fn test_stock_balance_scenario() {
        let report = scenario().report();
        let router = report.iter().find(|r| r.product_id == 1).unwrap();
        assert_eq!(router.total_inbound, 100);
        assert_eq!(router.total_outbound, 75);
        assert_eq!(router.current_stock, 25);
        assert_eq!(router.status, StockStatus::Ok);
        assert_eq!(router.order_count, 2);
        assert_eq!(router.last_outbound_on, day(9).and_hms_opt(10, 0, 0));
    }

    #[test]
    fn test_report_order_and_products_without_movements() {
        let report = scenario().report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].product_id, 2);
        assert_eq!(report[0].current_stock, 0);
        assert_eq!(report[0].status, StockStatus::OutOfStock);
        assert_eq!(report[1].product_id, 1);
    }

    #[test]
    fn test_movement_signs_and_dates() {
        let ledger = scenario();
        let movements = ledger.movements();
        assert_eq!(movements.len(), 3);
        assert_eq!(movements[0].movement_type, MovementType::Inbound);
        assert_eq!(movements[0].signed_quantity, 100);
        assert_eq!(movements[0].occurred_on, day(1).and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(movements[1].signed_quantity, -30);
        assert_eq!(movements[1].occurred_on, day(5).and_hms_opt(10, 0, 0).unwrap());
        assert_eq!(
            movements.iter().map(|m| m.movement_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_point_in_time_balances() {
        let ledger = scenario();
        assert_eq!(ledger.balance_at(1, day(4).and_hms_opt(23, 59, 59).unwrap()), 100);
        assert_eq!(ledger.balance_at(1, day(5).and_hms_opt(10, 0, 0).unwrap()), 70);
        assert_eq!(ledger.balance_at(1, day(30).and_hms_opt(0, 0, 0).unwrap()), 25);

        let running: Vec<i64> = ledger.running_balance(1).iter().map(|p| p.balance).collect();
        assert_eq!(running, vec![100, 70, 25]);

        let as_of = ledger.report_as_of(day(6).and_hms_opt(0, 0, 0).unwrap());
        let router = as_of.iter().find(|r| r.product_id == 1).unwrap();
        assert_eq!(router.current_stock, 70);
        assert_eq!(router.order_count, 1);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(StockStatus::classify(-5, 10), StockStatus::OutOfStock);
        assert_eq!(StockStatus::classify(0, 10), StockStatus::OutOfStock);
        assert_eq!(StockStatus::classify(10, 10), StockStatus::Low);
        assert_eq!(StockStatus::classify(11, 10), StockStatus::Ok);
        assert_eq!(StockStatus::classify(11, 20), StockStatus::Low);
    }

    #[test]
    fn test_movement_ids_ignore_input_order() {
        let batches = vec![
            ProductionBatch { production_id: 2, product_id: 1, quantity_produced: 5, produced_on: day(3) },
            ProductionBatch { production_id: 1, product_id: 2, quantity_produced: 7, produced_on: day(3) },
        ];
        let mut reversed = batches.clone();
        reversed.reverse();
        assert_eq!(
            derive_movements(&batches, &[], &[]),
            derive_movements(&reversed, &[], &[])
        );
    }

    #[test]
    fn test_movement_ids_compare_order_ids_numerically() {
        // "order:10" sorts before "order:9" as text
        let orders = vec![order(9, 5), order(10, 5)];
        let lines = vec![line(1, 10, 1, 3), line(2, 9, 1, 4)];
        let movements = derive_movements(&[], &orders, &lines);

        let ids: Vec<(Option<i64>, i64)> = movements.iter().map(|m| (m.order_id, m.movement_id)).collect();
        assert_eq!(ids, vec![(Some(9), 1), (Some(10), 2)]);
    }
}
