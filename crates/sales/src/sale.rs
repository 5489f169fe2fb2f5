use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use retail_core::{ActorId, DomainError, DomainResult, Money, ProductId, SaleId, SaleLineId};
use retail_inventory::StockLine;
use retail_products::CatalogEntry;

/// One requested sale line as submitted by the storefront.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// `Create(actorID, lines)` input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    pub actor_id: ActorId,
    pub lines: Vec<SaleLineRequest>,
}

impl SaleRequest {
    pub fn new(actor_id: ActorId, lines: Vec<SaleLineRequest>) -> Self {
        Self { actor_id, lines }
    }

    /// Shape checks only; product existence is the catalog's call.
    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::invalid_input("sale requires at least one line"));
        }
        for (idx, line) in self.lines.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::invalid_input(format!(
                    "line {idx}: quantity for product {} must be positive (got {})",
                    line.product_id, line.quantity
                )));
            }
        }
        Ok(())
    }
}

/// A sale line with its catalog price fixed at sale time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub line_id: SaleLineId,
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
}

/// A priced, not yet persisted sale.
///
/// Prices and totals are computed once here and never recomputed from the catalog
/// afterwards, so a concurrent price change cannot alter a sale in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleDraft {
    sale_id: SaleId,
    actor_id: ActorId,
    lines: Vec<PricedLine>,
    total: Money,
}

impl SaleDraft {
    /// Snapshot catalog prices onto the requested lines (paired in request order).
    pub fn price<I>(sale_id: SaleId, actor_id: ActorId, lines: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = (SaleLineRequest, CatalogEntry)>,
    {
        let mut priced = Vec::new();
        let mut total = Money::ZERO;

        for (request, entry) in lines {
            if request.product_id != entry.product_id {
                return Err(DomainError::invalid_input(format!(
                    "catalog entry {} does not match requested product {}",
                    entry.product_id, request.product_id
                )));
            }
            let subtotal = entry.unit_price.times(request.quantity)?;
            total = total.checked_add(subtotal)?;
            priced.push(PricedLine {
                line_id: SaleLineId::new(),
                product_id: request.product_id,
                name: entry.name,
                quantity: request.quantity,
                unit_price: entry.unit_price,
                subtotal,
            });
        }

        if priced.is_empty() {
            return Err(DomainError::invalid_input("sale requires at least one line"));
        }

        Ok(Self {
            sale_id,
            actor_id,
            lines: priced,
            total,
        })
    }

    pub fn sale_id(&self) -> SaleId {
        self.sale_id
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn lines(&self) -> &[PricedLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    /// The single debit batch for the ledger, one entry per line (repeats kept).
    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.lines
            .iter()
            .map(|l| StockLine::new(l.product_id, l.quantity))
            .collect()
    }

    /// The rows to persist locally.
    pub fn to_record(&self, created_at: DateTime<Utc>) -> SaleRecord {
        SaleRecord {
            sale_id: self.sale_id,
            actor_id: self.actor_id,
            created_at,
            lines: self
                .lines
                .iter()
                .map(|l| SaleLine {
                    line_id: l.line_id,
                    sale_id: self.sale_id,
                    product_id: l.product_id,
                    product_name: l.name.clone(),
                    quantity: l.quantity,
                    unit_price_at_sale: l.unit_price,
                })
                .collect(),
        }
    }
}

/// Persisted sale line. Name and price are snapshots taken at sale time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub line_id: SaleLineId,
    pub sale_id: SaleId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_at_sale: Money,
}

/// Persisted sale header with its lines; written together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sale_id: SaleId,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<SaleLine>,
}

impl SaleRecord {
    pub fn total(&self) -> DomainResult<Money> {
        self.lines.iter().try_fold(Money::ZERO, |acc, l| {
            acc.checked_add(l.unit_price_at_sale.times(l.quantity)?)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_id: SaleLineId,
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
}

/// What a committed sale returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub sale_id: SaleId,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<ReceiptLine>,
    pub total: Money,
}

impl SaleReceipt {
    pub fn from_record(record: &SaleRecord) -> DomainResult<Self> {
        let lines = record
            .lines
            .iter()
            .map(|l| {
                Ok(ReceiptLine {
                    line_id: l.line_id,
                    product_id: l.product_id,
                    name: l.product_name.clone(),
                    quantity: l.quantity,
                    unit_price: l.unit_price_at_sale,
                    subtotal: l.unit_price_at_sale.times(l.quantity)?,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(Self {
            sale_id: record.sale_id,
            actor_id: record.actor_id,
            created_at: record.created_at,
            lines,
            total: record.total()?,
        })
    }
}
