//! Pure decision logic for ledger mutations.
//!
//! Storage backends load the current quantities under their own locking scheme,
//! ask this module what the outcome is, and only then write. Nothing here performs
//! IO, so the same rules hold for the in-memory ledger and the SQL one.

use std::collections::BTreeMap;

use retail_core::{DomainError, DomainResult, ProductId};

use crate::stock::StockLine;

/// Validated outcome of a multi-item debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebitPlan {
    lines: Vec<StockLine>,
    after_line: Vec<i64>,
    resulting: BTreeMap<ProductId, i64>,
}

impl DebitPlan {
    /// Requested lines in their original order (one audit entry each).
    pub fn lines(&self) -> &[StockLine] {
        &self.lines
    }

    /// Each line paired with its product's quantity right after that line applies.
    pub fn steps(&self) -> impl Iterator<Item = (&StockLine, i64)> + '_ {
        self.lines.iter().zip(self.after_line.iter().copied())
    }

    /// Final quantity for every distinct product touched by the batch.
    pub fn resulting_quantities(&self) -> &BTreeMap<ProductId, i64> {
        &self.resulting
    }
}

/// Decide a multi-item debit against the current quantities.
///
/// Repeated products are summed: the batch is rejected only when a product's
/// aggregate request exceeds what it holds. The first unknown or insufficient item
/// (in request order) rejects the whole batch.
pub fn plan_debit<F>(items: &[StockLine], mut current: F) -> DomainResult<DebitPlan>
where
    F: FnMut(&ProductId) -> Option<i64>,
{
    if items.is_empty() {
        return Err(DomainError::invalid_input("decrease requires at least one item"));
    }

    // product -> (quantity before the batch, requested so far)
    let mut tally: BTreeMap<ProductId, (i64, i64)> = BTreeMap::new();
    let mut after_line = Vec::with_capacity(items.len());

    for item in items {
        item.validate()?;

        let (available, requested_so_far) = match tally.get(&item.product_id) {
            Some(t) => *t,
            None => {
                let available =
                    current(&item.product_id).ok_or(DomainError::not_found(item.product_id))?;
                (available, 0)
            }
        };

        let requested = requested_so_far
            .checked_add(item.quantity)
            .ok_or_else(|| DomainError::invalid_input("requested quantity overflows"))?;

        if requested > available {
            return Err(DomainError::InsufficientStock {
                product_id: item.product_id,
                requested,
                available,
            });
        }

        tally.insert(item.product_id, (available, requested));
        after_line.push(available - requested);
    }

    let resulting = tally
        .into_iter()
        .map(|(product_id, (available, requested))| (product_id, available - requested))
        .collect();

    Ok(DebitPlan {
        lines: items.to_vec(),
        after_line,
        resulting,
    })
}

/// Validated outcome of a single signed adjustment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AdjustPlan {
    pub product_id: ProductId,
    /// Quantity before the change; `None` when the record is created by this plan.
    pub previous: Option<i64>,
    pub new_quantity: i64,
    pub delta: i64,
}

impl AdjustPlan {
    pub fn creates_record(&self) -> bool {
        self.previous.is_none()
    }
}

/// Decide a signed adjustment.
///
/// - no record, `delta >= 0`: lazily create the record at `delta`
/// - no record, `delta < 0`: `NotFound` (cannot subtract from nothing)
/// - record present: `current + delta`, rejected with `StockWouldGoNegative` below zero
pub fn plan_adjust(product_id: ProductId, current: Option<i64>, delta: i64) -> DomainResult<AdjustPlan> {
    match current {
        None if delta < 0 => Err(DomainError::not_found(product_id)),
        None => Ok(AdjustPlan {
            product_id,
            previous: None,
            new_quantity: delta,
            delta,
        }),
        Some(current) => {
            let new_quantity = current
                .checked_add(delta)
                .ok_or_else(|| DomainError::invalid_input("adjusted quantity overflows"))?;
            if new_quantity < 0 {
                return Err(DomainError::StockWouldGoNegative {
                    product_id,
                    current,
                    delta,
                });
            }
            Ok(AdjustPlan {
                product_id,
                previous: Some(current),
                new_quantity,
                delta,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use proptest::prelude::*;

    fn stock(entries: &[(ProductId, i64)]) -> HashMap<ProductId, i64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn debit_reduces_every_product() {
        let p1 = ProductId::new();
        let p2 = ProductId::new();
        let current = stock(&[(p1, 10), (p2, 5)]);

        let plan = plan_debit(
            &[StockLine::new(p1, 2), StockLine::new(p2, 3)],
            |id| current.get(id).copied(),
        )
        .unwrap();

        assert_eq!(plan.resulting_quantities().get(&p1), Some(&8));
        assert_eq!(plan.resulting_quantities().get(&p2), Some(&2));
        assert_eq!(plan.lines().len(), 2);
    }

    #[test]
    fn repeated_product_is_summed_not_rejected() {
        let p = ProductId::new();
        let current = stock(&[(p, 5)]);

        let plan = plan_debit(&[StockLine::new(p, 2), StockLine::new(p, 3)], |id| {
            current.get(id).copied()
        })
        .unwrap();
        assert_eq!(plan.resulting_quantities().get(&p), Some(&0));
        let after: Vec<i64> = plan.steps().map(|(_, q)| q).collect();
        assert_eq!(after, vec![3, 0]);

        let err = plan_debit(&[StockLine::new(p, 3), StockLine::new(p, 3)], |id| {
            current.get(id).copied()
        })
        .unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                product_id: p,
                requested: 6,
                available: 5
            }
        );
    }

    #[test]
    fn first_offending_item_names_the_product() {
        let p1 = ProductId::new();
        let p2 = ProductId::new();
        let unknown = ProductId::new();
        let current = stock(&[(p1, 10), (p2, 1)]);

        let err = plan_debit(&[StockLine::new(p1, 2), StockLine::new(p2, 3)], |id| {
            current.get(id).copied()
        })
        .unwrap_err();
        assert_eq!(err.product_id(), Some(p2));

        let err = plan_debit(&[StockLine::new(unknown, 1), StockLine::new(p2, 3)], |id| {
            current.get(id).copied()
        })
        .unwrap_err();
        assert_eq!(err, DomainError::not_found(unknown));
    }

    #[test]
    fn empty_batch_and_non_positive_quantity_are_invalid() {
        let p = ProductId::new();
        assert!(matches!(
            plan_debit(&[], |_| Some(1)),
            Err(DomainError::InvalidInput { .. })
        ));
        assert!(matches!(
            plan_debit(&[StockLine::new(p, 0)], |_| Some(1)),
            Err(DomainError::InvalidInput { .. })
        ));
    }

    #[test]
    fn adjust_creates_record_lazily_for_non_negative_delta() {
        let p = ProductId::new();
        let plan = plan_adjust(p, None, 5).unwrap();
        assert!(plan.creates_record());
        assert_eq!(plan.new_quantity, 5);

        assert_eq!(plan_adjust(p, None, -1), Err(DomainError::not_found(p)));
    }

    #[test]
    fn adjust_rejects_negative_result() {
        let p = ProductId::new();
        assert_eq!(
            plan_adjust(p, Some(2), -3),
            Err(DomainError::StockWouldGoNegative {
                product_id: p,
                current: 2,
                delta: -3
            })
        );
        assert_eq!(plan_adjust(p, Some(2), -2).unwrap().new_quantity, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a debit plan is all-or-nothing and never yields a negative quantity.
        #[test]
        fn debit_never_goes_negative(
            initial in prop::collection::vec(0i64..50, 1..5),
            requests in prop::collection::vec((0usize..5, 1i64..30), 1..8)
        ) {
            let products: Vec<ProductId> = initial.iter().map(|_| ProductId::new()).collect();
            let current: HashMap<ProductId, i64> =
                products.iter().copied().zip(initial.iter().copied()).collect();

            let items: Vec<StockLine> = requests
                .iter()
                .map(|(idx, qty)| StockLine::new(products[idx % products.len()], *qty))
                .collect();

            let mut totals: HashMap<ProductId, i64> = HashMap::new();
            for item in &items {
                *totals.entry(item.product_id).or_insert(0) += item.quantity;
            }
            let feasible = totals.iter().all(|(id, total)| *total <= current[id]);

            match plan_debit(&items, |id| current.get(id).copied()) {
                Ok(plan) => {
                    prop_assert!(feasible);
                    for (id, qty) in plan.resulting_quantities() {
                        prop_assert!(*qty >= 0);
                        prop_assert_eq!(*qty, current[id] - totals[id]);
                    }
                }
                Err(err) => {
                    prop_assert!(!feasible);
                    let is_insufficient = matches!(err, DomainError::InsufficientStock { .. });
                    prop_assert!(is_insufficient);
                }
            }
        }

        /// Property: applying accepted adjustments in sequence matches the sum of their deltas.
        #[test]
        fn accepted_adjustments_sum_to_quantity(
            deltas in prop::collection::vec(-20i64..20, 1..30)
        ) {
            let p = ProductId::new();
            let mut quantity: Option<i64> = None;
            let mut committed = 0i64;

            for delta in deltas {
                if let Ok(plan) = plan_adjust(p, quantity, delta) {
                    quantity = Some(plan.new_quantity);
                    committed += delta;
                }
                if let Some(q) = quantity {
                    prop_assert!(q >= 0);
                }
            }

            prop_assert_eq!(quantity.unwrap_or(0), committed);
        }
    }
}
