use chrono::{DateTime, Duration};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;

use ledger_core::clock::ManualClock;
use ledger_core::model::{Command, Decision, InstrumentKind};
use ledger_core::outbox::Outbox;
use ledger_core::{AccountId, Amount, Engine, PlanCatalog, Store};

/// Generates valid command sequences for benchmarking.
///
/// Opens `num_accounts` accounts, then per account (repeating):
/// 1. Deposit 100, approved
/// 2. Deposit 50, approved
/// 3. Withdrawal 30, approved
///
/// Ids are assigned sequentially by the store, so the generator can predict them.
/// Withdrawals never exceed the balance.
pub struct CommandGenerator {
    num_accounts: AccountId,
    ops_per_account: u32,
    opened: AccountId,
    current_account: AccountId,
    current_step: u32,
    next_tx: u64,
    pending: Option<Command>,
}

impl CommandGenerator {
    pub fn new(num_accounts: AccountId, ops_per_account: u32) -> Self {
        Self {
            num_accounts,
            ops_per_account,
            opened: 0,
            current_account: 1,
            current_step: 0,
            next_tx: 1,
            pending: None,
        }
    }
}

impl Iterator for CommandGenerator {
    type Item = Command;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(resolve) = self.pending.take() {
            return Some(resolve);
        }
        if self.opened < self.num_accounts {
            self.opened += 1;
            return Some(Command::Open {
                email: format!("user{}@example.com", self.opened),
            });
        }
        if self.current_account > self.num_accounts {
            return None;
        }

        let account = self.current_account;
        let (command, kind) = match self.current_step % 3 {
            0 => (
                Command::RequestDeposit {
                    account,
                    amount: Amount::from_units(100),
                    evidence: None,
                },
                InstrumentKind::Deposit,
            ),
            1 => (
                Command::RequestDeposit {
                    account,
                    amount: Amount::from_units(50),
                    evidence: None,
                },
                InstrumentKind::Deposit,
            ),
            _ => (
                Command::RequestWithdrawal {
                    account,
                    amount: Amount::from_units(30),
                },
                InstrumentKind::Withdrawal,
            ),
        };
        self.pending = Some(Command::Resolve {
            id: self.next_tx,
            kind,
            decision: Decision::Approve,
        });
        self.next_tx += 1;

        self.current_step += 1;
        if self.current_step >= self.ops_per_account {
            self.current_step = 0;
            self.current_account += 1;
        }

        Some(command)
    }
}

fn engine() -> Engine {
    let (outbox, _effects) = Outbox::channel();
    let clock = ManualClock::new(DateTime::from_timestamp(1_767_225_600, 0).unwrap_or_default());
    Engine::with_clock(
        Store::in_memory(),
        PlanCatalog::default(),
        outbox,
        Arc::new(clock),
    )
}

fn bench_approvals(c: &mut Criterion) {
    let mut group = c.benchmark_group("approvals");
    let runtime = Runtime::new().unwrap();

    for (accounts, ops) in [(1, 10_000u32), (100, 100), (1_000, 10)] {
        let label = format!("{accounts}a_{ops}ops");
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(accounts, ops),
            |b, &(accounts, ops)| {
                b.to_async(&runtime).iter(|| async move {
                    let engine = engine();
                    for command in CommandGenerator::new(accounts, ops) {
                        let _ = black_box(engine.apply(command).await);
                    }
                    engine
                });
            },
        );
    }

    group.finish();
}

fn bench_settlement(c: &mut Criterion) {
    let mut group = c.benchmark_group("settlement");
    group.sample_size(10);
    let runtime = Runtime::new().unwrap();

    for investments in [100usize, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(investments),
            &investments,
            |b, &investments| {
                b.to_async(&runtime).iter(|| async move {
                    let engine = engine();
                    let account = engine
                        .open_account("bench@example.com".to_string())
                        .await
                        .unwrap();
                    for command in [
                        Command::RequestDeposit {
                            account,
                            amount: Amount::from_units(200 * investments as i64),
                            evidence: None,
                        },
                        Command::Resolve {
                            id: 1,
                            kind: InstrumentKind::Deposit,
                            decision: Decision::Approve,
                        },
                    ] {
                        engine.apply(command).await.unwrap();
                    }
                    for _ in 0..investments {
                        engine
                            .purchase(account, "Starter", Amount::from_units(200))
                            .await
                            .unwrap();
                    }
                    let at = engine.now() + Duration::days(7);
                    black_box(engine.settle_matured_at(at).await.unwrap())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_approvals, bench_settlement);
criterion_main!(benches);
