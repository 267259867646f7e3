use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use agrinet_accounts::{KycDocuments, KycOutcome, KycVerifier, VerifierError};
use agrinet_auth::Actor;
use agrinet_core::{Money, OrderId, ProductId, UserId};
use agrinet_infra::{CatalogService, InMemoryMarketStore, KycService, OrderEngine};
use agrinet_orders::{OrderStatus, PermissionPolicy};

struct Approve;

impl KycVerifier for Approve {
    fn verify(&self, _documents: &KycDocuments) -> Result<KycOutcome, VerifierError> {
        Ok(KycOutcome::Approved)
    }
}

struct Fixture {
    engine: OrderEngine<Arc<InMemoryMarketStore>>,
    catalog: CatalogService<Arc<InMemoryMarketStore>>,
    seller: Actor,
    buyer: Actor,
}

fn setup() -> Fixture {
    let store = Arc::new(InMemoryMarketStore::new());
    let kyc = KycService::new(store.clone());

    let seller = kyc.register_user(UserId::new(), "Bench Farms").unwrap();
    let seller = Actor::member(seller.id_typed());
    let docs = KycDocuments::new("id", "selfie").unwrap();
    kyc.submit(&seller, &docs, &Approve).unwrap();

    let buyer = kyc.register_user(UserId::new(), "Bench Buyer").unwrap();

    Fixture {
        engine: OrderEngine::new(store.clone()),
        catalog: CatalogService::new(store),
        seller,
        buyer: Actor::member(buyer.id_typed()),
    }
}

fn list(fixture: &Fixture, quantity: i64) -> ProductId {
    fixture
        .catalog
        .create_product(&fixture.seller, "Maize", "50kg bag", Money::from_minor(1_500), quantity)
        .unwrap()
        .id_typed()
}

fn bench_create_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_order");
    group.sample_size(500);

    group.bench_function("reserve_and_insert", |b| {
        let fixture = setup();
        let product_id = list(&fixture, i64::MAX);
        b.iter(|| {
            fixture
                .engine
                .create_order(black_box(&fixture.buyer), product_id, 1, None)
                .unwrap()
        });
    });

    group.bench_function("idempotent_replay", |b| {
        let fixture = setup();
        let product_id = list(&fixture, i64::MAX);
        fixture
            .engine
            .create_order(&fixture.buyer, product_id, 1, Some("replayed"))
            .unwrap();
        b.iter(|| {
            fixture
                .engine
                .create_order(&fixture.buyer, product_id, 1, black_box(Some("replayed")))
                .unwrap()
        });
    });

    group.bench_function("insufficient_stock", |b| {
        let fixture = setup();
        let product_id = list(&fixture, 0);
        b.iter(|| {
            let _ = fixture
                .engine
                .create_order(&fixture.buyer, black_box(product_id), 1, None);
        });
    });

    group.finish();
}

fn bench_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_lifecycle");
    group.throughput(Throughput::Elements(4));

    group.bench_function("create_pay_ship_deliver", |b| {
        let fixture = setup();
        let product_id = list(&fixture, i64::MAX);
        b.iter(|| {
            let order = fixture
                .engine
                .create_order(&fixture.buyer, product_id, 1, None)
                .unwrap();
            let id: OrderId = order.id_typed();
            fixture.engine.transition(&fixture.buyer, id, OrderStatus::Paid).unwrap();
            fixture.engine.transition(&fixture.seller, id, OrderStatus::Shipped).unwrap();
            fixture.engine.transition(&fixture.buyer, id, OrderStatus::Delivered).unwrap()
        });
    });

    group.finish();
}

fn bench_policy(c: &mut Criterion) {
    let fixture = setup();
    let product_id = list(&fixture, 10);
    let order = fixture
        .engine
        .create_order(&fixture.buyer, product_id, 1, None)
        .unwrap();
    let stranger = Actor::member(UserId::new());

    let mut group = c.benchmark_group("permission_policy");
    for (name, actor, to) in [
        ("buyer_pays", fixture.buyer, OrderStatus::Paid),
        ("seller_pays", fixture.seller, OrderStatus::Paid),
        ("stranger_disputes", stranger, OrderStatus::Disputed),
        ("undeclared_edge", fixture.buyer, OrderStatus::Shipped),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &(actor, to), |b, (actor, to)| {
            b.iter(|| PermissionPolicy::explain(black_box(actor), &order, *to));
        });
    }
    group.finish();
}

fn bench_listing(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_available_products");

    for product_count in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*product_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(product_count),
            product_count,
            |b, &product_count| {
                let fixture = setup();
                for i in 0..product_count {
                    // Every fifth product is sold out and filtered.
                    list(&fixture, (i % 5) as i64);
                }
                b.iter(|| black_box(fixture.engine.list_available_products().unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_create_order, bench_lifecycle, bench_policy, bench_listing);
criterion_main!(benches);
