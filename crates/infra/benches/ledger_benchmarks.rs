use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use retail_core::{ActorId, CorrelationId, ProductId};
use retail_inventory::{AdjustStockRequest, DecreaseStockRequest, StockLine};
use retail_infra::ledger::{InMemoryStockLedger, StockLedger};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

async fn stocked(products: &[ProductId], quantity: i64) -> Arc<InMemoryStockLedger> {
    let ledger = InMemoryStockLedger::arc();
    for &product_id in products {
        ledger
            .adjust_stock(AdjustStockRequest {
                product_id,
                actor_id: ActorId::new(),
                delta: quantity,
                reason: "bench stock".to_string(),
                idempotency_key: None,
            })
            .await
            .unwrap();
    }
    ledger
}

fn debit(lines: Vec<StockLine>) -> DecreaseStockRequest {
    DecreaseStockRequest {
        items: lines,
        actor_id: ActorId::new(),
        correlation_id: CorrelationId::new(),
    }
}

/// Single-caller debit latency by sale width.
fn bench_debit_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("debit_latency");

    for width in [1usize, 5, 20].iter() {
        let products: Vec<ProductId> = (0..*width).map(|_| ProductId::new()).collect();
        let ledger = rt.block_on(stocked(&products, i64::MAX / 4));

        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.to_async(&rt).iter(|| {
                let ledger = ledger.clone();
                let lines = products.iter().map(|&p| StockLine::new(p, 1)).collect();
                async move { black_box(ledger.decrease_stock(debit(lines)).await.unwrap()) }
            });
        });
    }
    group.finish();
}

/// Concurrent single-unit debits: all on one hot product vs. spread over disjoint products.
fn bench_contended_debits(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("contended_debits");

    for callers in [8usize, 64].iter() {
        group.throughput(Throughput::Elements(*callers as u64));

        let hot = vec![ProductId::new()];
        let hot_ledger = rt.block_on(stocked(&hot, i64::MAX / 4));
        group.bench_with_input(BenchmarkId::new("same_product", callers), callers, |b, &n| {
            b.to_async(&rt).iter(|| {
                let ledger = hot_ledger.clone();
                let product = hot[0];
                async move {
                    let tasks: Vec<_> = (0..n)
                        .map(|_| {
                            let ledger = ledger.clone();
                            tokio::spawn(async move {
                                ledger.decrease_stock(debit(vec![StockLine::new(product, 1)])).await
                            })
                        })
                        .collect();
                    for task in tasks {
                        black_box(task.await.unwrap().unwrap());
                    }
                }
            });
        });

        let spread: Vec<ProductId> = (0..*callers).map(|_| ProductId::new()).collect();
        let spread_ledger = rt.block_on(stocked(&spread, i64::MAX / 4));
        group.bench_with_input(BenchmarkId::new("disjoint_products", callers), callers, |b, _| {
            b.to_async(&rt).iter(|| {
                let ledger = spread_ledger.clone();
                let products = spread.clone();
                async move {
                    let tasks: Vec<_> = products
                        .into_iter()
                        .map(|product| {
                            let ledger = ledger.clone();
                            tokio::spawn(async move {
                                ledger.decrease_stock(debit(vec![StockLine::new(product, 1)])).await
                            })
                        })
                        .collect();
                    for task in tasks {
                        black_box(task.await.unwrap().unwrap());
                    }
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_debit_latency, bench_contended_debits);
criterion_main!(benches);
