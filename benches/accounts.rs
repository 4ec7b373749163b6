use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use accountd::accounts::{ensure_schema, AccountId, AccountRepository, NewAccount, OutboxSignal};
use accountd::identity::RequestContext;
use accountd::storage::{Store, StoreSettings};

struct BenchCtx {
    repo: AccountRepository,
    rt: tokio::runtime::Runtime,
}

impl BenchCtx {
    fn new() -> Self {
        let store = Store::in_memory(StoreSettings::default());
        ensure_schema(&store).expect("schema");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(2)
            .build()
            .expect("tokio runtime");
        BenchCtx { repo: AccountRepository::new(store, OutboxSignal::new()), rt }
    }

    fn create(&self, username: String) -> AccountId {
        let new = NewAccount {
            email: format!("{}@bench.local", username),
            username,
            first_name: "Bench".into(),
            last_name: "User".into(),
            birth_date: None,
            phone: "555".into(),
        };
        self.rt.block_on(self.repo.create_account(&RequestContext::default(), &new, "hash")).expect("create")
    }
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("accounts_create");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);
    for &n in &[100usize, 1_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("create_seq", n.to_string()), &n, |b, &n| {
            b.iter(|| {
                let ctx = BenchCtx::new();
                for i in 0..n { ctx.create(format!("user{}", i)); }
                criterion::black_box(ctx.repo.store().commit_count());
            });
        });
    }
    group.finish();
}

fn bench_primary_flip(c: &mut Criterion) {
    let ctx = BenchCtx::new();
    let id = ctx.create("flipper".into());
    let emails: Vec<String> = (0..8).map(|i| format!("e{}@bench.local", i)).collect();
    for e in &emails {
        ctx.rt.block_on(ctx.repo.add_email(&RequestContext::default(), &id, e)).expect("add email");
    }
    let mut rng = StdRng::seed_from_u64(0xACC0_0017);

    let mut group = c.benchmark_group("accounts_primary_email");
    group.sample_size(50);
    group.bench_function("change_primary_email", |b| {
        b.iter(|| {
            let target = &emails[rng.gen_range(0..emails.len())];
            ctx.rt.block_on(ctx.repo.change_primary_email(&RequestContext::default(), &id, target)).expect("flip");
        });
    });
    group.bench_function("get_full_profile", |b| {
        b.iter(|| criterion::black_box(ctx.repo.get_full_profile(&id).expect("profile")));
    });
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let ctx = BenchCtx::new();
    let n = 5_000usize;
    for i in 0..n { ctx.create(format!("user{}", i)); }
    let mut rng = StdRng::seed_from_u64(0xBEEF_CAFE);

    let mut group = c.benchmark_group("accounts_lookup");
    group.bench_function("account_id_by_username", |b| {
        b.iter(|| {
            let name = format!("user{}", rng.gen_range(0..n));
            criterion::black_box(ctx.repo.get_account_id_by_username(&name).expect("lookup"));
        });
    });
    group.finish();
}

criterion_group!(benches, bench_create, bench_primary_flip, bench_lookup);
criterion_main!(benches);
