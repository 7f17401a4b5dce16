//! Surrogate Key Assigner for orders and order lines.
//!
//! Ids never depend on the row order of the feed: natural keys are sorted
//! before numbering, and lines are numbered after a sort on their content.

use crate::config::KeyAssignment;
use crate::entities::{FeedLine, NaturalKey, Order, OrderLine};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Orders and lines with their surrogate keys attached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignedKeys {
    /// One order per distinct natural key in the feed, by ascending key
    pub orders: Vec<Order>,
    /// One line per feed line, by ascending `line_id`
    pub lines: Vec<OrderLine>,
    /// Orders whose id came from the target store
    pub reused_orders: usize,
    pub reused_lines: usize,
}

impl AssignedKeys {
    /// `order_id` given to a natural key
    pub fn order_id(&self, key: &NaturalKey) -> Option<i64> {
        self.orders
            .iter()
            .find(|o| &o.natural_key() == key)
            .map(|o| o.order_id)
    }
}

/// Content that identifies a line within its order
type LineSignature = (i64, i64, i64, Option<Decimal>);

#[derive(Debug, Clone, Copy)]
pub struct SurrogateKeyAssigner {
    mode: KeyAssignment,
}

impl SurrogateKeyAssigner {
    pub fn new(mode: KeyAssignment) -> Self {
        Self { mode }
    }

    /// Assign `order_id` per natural key and `line_id` per line.
    ///
    /// In `Extend` mode, `existing_orders`/`existing_lines` (what the target
    /// already holds) keep their ids and new keys are numbered from
    /// `max(existing) + 1`. In `Fresh` mode both are ignored and numbering
    /// starts at 1.
    pub fn assign(
        &self,
        feed: &[FeedLine],
        existing_orders: &[Order],
        existing_lines: &[OrderLine],
    ) -> AssignedKeys {
        let (existing_orders, existing_lines) = match self.mode {
            KeyAssignment::Extend => (existing_orders, existing_lines),
            KeyAssignment::Fresh => (&[][..], &[][..]),
        };

        let mut assigned = AssignedKeys::default();

        // Orders
        let known: BTreeMap<NaturalKey, i64> = existing_orders
            .iter()
            .map(|o| (o.natural_key(), o.order_id))
            .collect();
        let mut next_order = existing_orders.iter().map(|o| o.order_id).max().unwrap_or(0) + 1;

        let keys: BTreeSet<NaturalKey> = feed.iter().map(FeedLine::natural_key).collect();
        let mut ids: BTreeMap<NaturalKey, i64> = BTreeMap::new();
        for key in keys {
            let order_id = match known.get(&key) {
                Some(id) => {
                    assigned.reused_orders += 1;
                    *id
                }
                None => {
                    let id = next_order;
                    next_order += 1;
                    id
                }
            };
            assigned.orders.push(Order {
                order_id,
                order_number: key.order_number.clone(),
                order_date: key.order_date,
                reseller_id: key.reseller_id,
            });
            ids.insert(key, order_id);
        }

        // Lines
        let mut stored: BTreeMap<LineSignature, Vec<i64>> = BTreeMap::new();
        for line in existing_lines {
            stored
                .entry((line.order_id, line.product_id, line.quantity, line.unit_sale_price))
                .or_default()
                .push(line.line_id);
        }
        for line_ids in stored.values_mut() {
            line_ids.sort_unstable();
        }
        let mut next_line = existing_lines.iter().map(|l| l.line_id).max().unwrap_or(0) + 1;

        let mut signatures: Vec<LineSignature> = feed
            .iter()
            .filter_map(|line| {
                ids.get(&line.natural_key())
                    .map(|order_id| (*order_id, line.product_id, line.quantity, line.unit_sale_price))
            })
            .collect();
        signatures.sort();

        let mut occurrences: BTreeMap<LineSignature, usize> = BTreeMap::new();
        for signature in signatures {
            let occurrence = occurrences.entry(signature).or_insert(0);
            let reused = stored.get(&signature).and_then(|ids| ids.get(*occurrence)).copied();
            *occurrence += 1;

            let line_id = match reused {
                Some(id) => {
                    assigned.reused_lines += 1;
                    id
                }
                None => {
                    let id = next_line;
                    next_line += 1;
                    id
                }
            };
            let (order_id, product_id, quantity, unit_sale_price) = signature;
            assigned.lines.push(OrderLine {
                line_id,
                order_id,
                product_id,
                quantity,
                unit_sale_price,
            });
        }
        assigned.lines.sort_by_key(|l| l.line_id);

        tracing::debug!(
            orders = assigned.orders.len(),
            reused_orders = assigned.reused_orders,
            lines = assigned.lines.len(),
            reused_lines = assigned.reused_lines,
            "Assigned surrogate keys"
        );
        assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn line(number: &str, day: u32, reseller: i64, product: i64, quantity: i64) -> FeedLine {
        FeedLine {
            order_number: number.to_string(),
            order_date: at(day, 9),
            reseller_id: reseller,
            product_id: product,
            quantity,
            unit_sale_price: Some(Decimal::new(1000, 2)),
        }
    }

    #[test]
    fn test_same_natural_key_gets_same_order_id() {
        let feed = vec![
            line("CMD-2", 2, 1, 1, 5),
            line("CMD-1", 1, 1, 1, 30),
            line("CMD-1", 1, 1, 2, 45),
        ];
        let assigned = SurrogateKeyAssigner::new(KeyAssignment::Extend).assign(&feed, &[], &[]);

        assert_eq!(assigned.orders.len(), 2);
        assert_eq!(assigned.order_id(&feed[1].natural_key()), Some(1));
        assert_eq!(assigned.order_id(&feed[0].natural_key()), Some(2));
        let cmd1_lines: Vec<_> = assigned.lines.iter().filter(|l| l.order_id == 1).collect();
        assert_eq!(cmd1_lines.len(), 2);
        assert_eq!(
            assigned.lines.iter().map(|l| l.line_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_order_number_reused_across_resellers_is_two_orders() {
        let feed = vec![line("CMD-1", 1, 1, 1, 5), line("CMD-1", 1, 2, 1, 5)];
        let assigned = SurrogateKeyAssigner::new(KeyAssignment::Extend).assign(&feed, &[], &[]);
        assert_eq!(assigned.orders.len(), 2);
    }

    #[test]
    fn test_ids_do_not_depend_on_row_order() {
        let feed = vec![
            line("CMD-3", 3, 1, 2, 1),
            line("CMD-1", 1, 1, 1, 30),
            line("CMD-2", 2, 2, 1, 7),
            line("CMD-1", 1, 1, 2, 45),
        ];
        let mut reversed = feed.clone();
        reversed.reverse();

        let assigner = SurrogateKeyAssigner::new(KeyAssignment::Extend);
        assert_eq!(assigner.assign(&feed, &[], &[]), assigner.assign(&reversed, &[], &[]));
    }

    #[test]
    fn test_extend_keeps_stored_ids_and_numbers_after_max() {
        let assigner = SurrogateKeyAssigner::new(KeyAssignment::Extend);
        let first = assigner.assign(&[line("CMD-5", 5, 1, 1, 10)], &[], &[]);
        assert_eq!(first.orders[0].order_id, 1);

        // A new order sorting before the stored one must not take its id
        let feed = vec![line("CMD-0", 1, 1, 1, 2), line("CMD-5", 5, 1, 1, 10)];
        let second = assigner.assign(&feed, &first.orders, &first.lines);

        assert_eq!(second.order_id(&feed[1].natural_key()), Some(1));
        assert_eq!(second.order_id(&feed[0].natural_key()), Some(2));
        assert_eq!(second.reused_orders, 1);
        assert_eq!(second.reused_lines, 1);
        let stored_line = second.lines.iter().find(|l| l.order_id == 1).unwrap();
        assert_eq!(stored_line.line_id, first.lines[0].line_id);
        let new_line = second.lines.iter().find(|l| l.order_id == 2).unwrap();
        assert_eq!(new_line.line_id, 2);
    }

    #[test]
    fn test_identical_lines_are_distinct_occurrences() {
        let feed = vec![line("CMD-1", 1, 1, 1, 5), line("CMD-1", 1, 1, 1, 5)];
        let assigner = SurrogateKeyAssigner::new(KeyAssignment::Extend);
        let first = assigner.assign(&feed, &[], &[]);
        assert_eq!(first.lines.len(), 2);

        let again = assigner.assign(&feed, &first.orders, &first.lines);
        assert_eq!(again.lines, first.lines);
        assert_eq!(again.reused_lines, 2);
    }

    #[test]
    fn test_fresh_ignores_stored_rows() {
        let stored = vec![Order {
            order_id: 40,
            order_number: "OLD".to_string(),
            order_date: at(1, 0),
            reseller_id: 9,
        }];
        let assigned = SurrogateKeyAssigner::new(KeyAssignment::Fresh)
            .assign(&[line("CMD-1", 1, 1, 1, 5)], &stored, &[]);
        assert_eq!(assigned.orders[0].order_id, 1);
        assert_eq!(assigned.reused_orders, 0);
    }
}
