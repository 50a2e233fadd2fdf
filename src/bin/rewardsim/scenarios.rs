// Scenario Definitions — seeded referral forests driven through the engine
// Every scenario builds a fresh world from (config, members, seed)

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use unilevel_engine::error::LedgerError;
use unilevel_engine::provider::{Operation, SandboxFault};
use unilevel_engine::referral_graph::generate_referral_code;
use unilevel_engine::*;

use crate::report::ScenarioResult;

pub const SIM_OTP: &str = "424242";

type BoxError = Box<dyn Error + Send + Sync>;

// ─── Scenario Catalogue ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    ActivateAll,
    ProviderFaults,
    ConcurrentDuplicates,
    Purchases,
}

pub struct Scenario {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: ScenarioKind,
}

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "ACTIVATE_ALL",
            label: "Sponsor-paid activation sweep",
            kind: ScenarioKind::ActivateAll,
        },
        Scenario {
            name: "PROVIDER_FAULTS",
            label: "Injected provider faults + retry",
            kind: ScenarioKind::ProviderFaults,
        },
        Scenario {
            name: "CONCURRENT_DUPLICATES",
            label: "Concurrent duplicate activations",
            kind: ScenarioKind::ConcurrentDuplicates,
        },
        Scenario {
            name: "PURCHASES",
            label: "Merchant purchase splits + replays",
            kind: ScenarioKind::Purchases,
        },
    ]
}

// ─── World ──────────────────────────────────────────────────────────────────

pub struct World {
    pub store: Arc<Store>,
    pub provider: Arc<SandboxProvider>,
    pub activation: ActivationWorkflow<SandboxProvider>,
    pub purchase: PurchaseWorkflow,
    pub leader: MemberId,
    pub members: Vec<MemberId>,
    pub merchants: Vec<MerchantId>,
}

impl World {
    /// Random forest: roughly one member in ten is a root, the rest pick a
    /// uniformly random earlier member as sponsor.
    pub fn build(
        config: &EngineConfig,
        members: usize,
        rng: &mut ChaCha8Rng,
        latency: Duration,
    ) -> Result<Self, BoxError> {
        let store = Arc::new(Store::from_config(config));
        let provider = Arc::new(SandboxProvider::new(SIM_OTP).with_latency(latency));
        let graph = ReferralGraph::for_store(Arc::clone(&store));

        let leader = graph.register_member(
            NewMember::new(ActorRole::Leader, "tw-leader").with_id("leader"),
        )?;
        let leader_float = config.activation.fee.0 * Decimal::from(members as u64 * 2 + 10);
        provider.fund(&leader.external_account_id, Money(leader_float));

        let mut codes: Vec<String> = Vec::with_capacity(members);
        let mut ids = Vec::with_capacity(members);
        for i in 0..members {
            let mut request = NewMember::new(ActorRole::Member, format!("tw-m{i:05}"))
                .with_id(format!("m{i:05}"))
                .with_referral_code(generate_referral_code(rng));
            if !codes.is_empty() && !rng.gen_bool(0.1) {
                let sponsor = &codes[rng.gen_range(0..codes.len())];
                request = request.sponsored_by(sponsor.clone());
            }
            let member = graph.register_member(request)?;
            // Some members cannot afford an activation.
            let float = Decimal::from(rng.gen_range(0u64..=1_200));
            provider.fund(&member.external_account_id, Money(float));
            codes.push(member.referral_code);
            ids.push(member.id);
        }

        let activation = ActivationWorkflow::new(config, Arc::clone(&store), Arc::clone(&provider))?;
        let purchase = PurchaseWorkflow::new(config, Arc::clone(&store))?;

        let merchant_count = (members / 20).max(1);
        let mut merchants = Vec::with_capacity(merchant_count);
        for i in 0..merchant_count {
            let owner = ids.choose(rng).cloned().unwrap_or_else(|| leader.id.clone());
            let referrer_code = codes
                .choose(rng)
                .cloned()
                .unwrap_or_else(|| leader.referral_code.clone());
            let merchant = purchase.register_merchant(NewMerchant {
                id: Some(MerchantId::from(format!("shop-{i:03}"))),
                owner,
                referrer_code,
                business_name: format!("Shop {i}"),
            })?;
            merchants.push(merchant.id);
        }

        Ok(Self {
            store,
            provider,
            activation,
            purchase,
            leader: leader.id,
            members: ids,
            merchants,
        })
    }

    fn leader_actor(&self) -> Actor {
        Actor::new(self.leader.clone(), ActorRole::Leader)
    }

    /// Sponsor activates when there is one, otherwise the leader does.
    fn activator_for(&self, member: &MemberId) -> Actor {
        match self.store.member(member).and_then(|m| m.sponsor) {
            Some(sponsor) => Actor::new(sponsor, ActorRole::Member),
            None => self.leader_actor(),
        }
    }

    fn request(&self, actor: Actor, member: &MemberId) -> ActivationRequest {
        ActivationRequest {
            actor,
            member: member.clone(),
            otp: SIM_OTP.to_string(),
        }
    }

    fn activated_count(&self) -> usize {
        self.members
            .iter()
            .filter(|id| self.store.member(id).map(|m| m.is_activated).unwrap_or(false))
            .count()
    }
}

// ─── Failure Labels ─────────────────────────────────────────────────────────

fn failure_label(err: &ActivationError) -> &'static str {
    match err {
        ActivationError::Validation(_) => "validation",
        ActivationError::AlreadyActivated(_) => "already_activated",
        ActivationError::InsufficientFunds { .. } => "insufficient_funds",
        ActivationError::Provider(_) => "provider",
        ActivationError::Ledger(_) => "ledger",
        ActivationError::Graph(_) => "graph",
        ActivationError::Conservation(_) => "conservation",
        _ => "other",
    }
}

#[derive(Default)]
struct Tally {
    ok: usize,
    points: Points,
    failures: BTreeMap<String, usize>,
}

impl Tally {
    fn record(&mut self, result: Result<ActivationReceipt, ActivationError>) -> bool {
        match result {
            Ok(receipt) => {
                self.ok += 1;
                self.points += receipt.total_points;
                true
            }
            Err(err) => {
                *self.failures.entry(failure_label(&err).to_string()).or_default() += 1;
                false
            }
        }
    }
}

// ─── Runner ─────────────────────────────────────────────────────────────────

pub async fn run_scenario(
    scenario: &Scenario,
    config: &EngineConfig,
    members: usize,
    seed: u64,
) -> Result<(ScenarioResult, World), BoxError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let start = Instant::now();

    let (world, mut result) = match scenario.kind {
        ScenarioKind::ActivateAll => activate_all(config, members, &mut rng).await?,
        ScenarioKind::ProviderFaults => provider_faults(config, members, &mut rng).await?,
        ScenarioKind::ConcurrentDuplicates => concurrent_duplicates(config, members, &mut rng).await?,
        ScenarioKind::Purchases => purchases(config, members, &mut rng).await?,
    };

    let audit = world.store.audit_all();
    result.name = scenario.name.to_string();
    result.label = scenario.label.to_string();
    result.seed = seed;
    result.members = members;
    result.grant_rows = world.store.grant_count();
    result.house_points = world.store.ledger_total(world.store.house()).0;
    result.pass = result.pass && audit.is_balanced() && !world.store.is_halted();
    result.audit = audit;
    result.elapsed_ms = start.elapsed().as_millis();
    Ok((result, world))
}

async fn activate_all(
    config: &EngineConfig,
    members: usize,
    rng: &mut ChaCha8Rng,
) -> Result<(World, ScenarioResult), BoxError> {
    let world = World::build(config, members, rng, Duration::ZERO)?;
    let mut order = world.members.clone();
    order.shuffle(rng);

    let mut tally = Tally::default();
    for member in &order {
        let actor = world.activator_for(member);
        tally.record(world.activation.activate(world.request(actor, member)).await);
    }

    let per_activation = config.activation.schedule.total();
    let expected = Points(per_activation.0 * Decimal::from(tally.ok as u64));
    let result = ScenarioResult {
        pass: tally.points == expected && world.activated_count() == tally.ok,
        activations_ok: tally.ok,
        activation_failures: tally.failures,
        activation_points: tally.points.0,
        ..ScenarioResult::default()
    };
    Ok((world, result))
}

async fn provider_faults(
    config: &EngineConfig,
    members: usize,
    rng: &mut ChaCha8Rng,
) -> Result<(World, ScenarioResult), BoxError> {
    // Short timeout so hung calls resolve quickly.
    let mut config = config.clone();
    config.provider.timeout_ms = 25;
    let world = World::build(&config, members, rng, Duration::ZERO)?;

    let faults = [
        SandboxFault::Reject(Operation::Confirm),
        SandboxFault::Transport(Operation::Initiate),
        SandboxFault::MissingReference,
        SandboxFault::Hang(Operation::Confirm),
        SandboxFault::Reject(Operation::Initiate),
        SandboxFault::Hang(Operation::Balance),
    ];

    let mut tally = Tally::default();
    let mut faulted = Vec::new();
    for (i, member) in world.members.iter().enumerate() {
        let fault = (i % 3 == 0).then(|| faults[(i / 3) % faults.len()]);
        if let Some(fault) = fault {
            world.provider.inject(fault);
        }
        let ok = tally.record(
            world
                .activation
                .activate(world.request(world.leader_actor(), member))
                .await,
        );
        if fault.is_some() && !ok {
            faulted.push(member.clone());
        }
    }

    // Faulted attempts left nothing behind, so a plain retry must succeed.
    let grants = world.store.grants();
    let untouched = faulted.iter().all(|m| {
        grants.iter().all(|g| &g.giver != m)
            && !world.store.member(m).map(|x| x.is_activated).unwrap_or(true)
    });
    let mut retries_ok = 0;
    for member in &faulted {
        if tally.record(
            world
                .activation
                .activate(world.request(world.leader_actor(), member))
                .await,
        ) {
            retries_ok += 1;
        }
    }

    let expected = Points(config.activation.schedule.total().0 * Decimal::from(tally.ok as u64));
    let result = ScenarioResult {
        pass: untouched
            && retries_ok == faulted.len()
            && tally.points == expected
            && world.activated_count() == members,
        activations_ok: tally.ok,
        activation_failures: tally.failures,
        activation_points: tally.points.0,
        faults_injected: faulted.len(),
        retries_ok,
        ..ScenarioResult::default()
    };
    Ok((world, result))
}

async fn concurrent_duplicates(
    config: &EngineConfig,
    members: usize,
    rng: &mut ChaCha8Rng,
) -> Result<(World, ScenarioResult), BoxError> {
    // Latency forces the two requests to interleave at every provider call.
    let world = World::build(config, members, rng, Duration::from_millis(1))?;

    let mut tally = Tally::default();
    let mut exactly_one = true;
    for member in world.members.iter().take(50) {
        let first = world.request(world.leader_actor(), member);
        let second = first.clone();
        let (a, b) = tokio::join!(
            world.activation.activate(first),
            world.activation.activate(second)
        );
        let wins = [a, b]
            .into_iter()
            .map(|r| {
                let lost_race = matches!(r, Err(ActivationError::AlreadyActivated(_)));
                (tally.record(r), lost_race)
            })
            .collect::<Vec<_>>();
        let ok = wins.iter().filter(|(ok, _)| *ok).count();
        let lost = wins.iter().filter(|(_, lost)| *lost).count();
        exactly_one &= ok == 1 && lost == 1;
    }

    let expected = Points(config.activation.schedule.total().0 * Decimal::from(tally.ok as u64));
    let result = ScenarioResult {
        pass: exactly_one && tally.points == expected,
        activations_ok: tally.ok,
        activation_failures: tally.failures,
        activation_points: tally.points.0,
        ..ScenarioResult::default()
    };
    Ok((world, result))
}

async fn purchases(
    config: &EngineConfig,
    members: usize,
    rng: &mut ChaCha8Rng,
) -> Result<(World, ScenarioResult), BoxError> {
    let world = World::build(config, members, rng, Duration::ZERO)?;

    let mut pooled = Decimal::ZERO;
    let mut distributed = Decimal::ZERO;
    let mut purchases_ok = 0;
    let mut replays_rejected = 0;
    let mut replays = 0;
    let mut last: Option<PurchaseEvent> = None;

    for i in 0..members * 2 {
        let pick = |rng: &mut ChaCha8Rng| -> Option<MemberId> {
            if rng.gen_bool(0.5) {
                world.members.choose(rng).cloned()
            } else {
                None
            }
        };
        let Some(purchaser) = world.members.choose(rng).cloned() else {
            break;
        };
        let Some(merchant) = world.merchants.choose(rng).cloned() else {
            break;
        };
        let event = PurchaseEvent {
            purchaser,
            merchant,
            pool: Decimal::new(rng.gen_range(1i64..=500_000), 2),
            hub: pick(rng),
            community: pick(rng),
            investor: pick(rng),
            reference_id: ReferenceId::from(format!("order-{i:06}")),
        };

        if i % 10 == 9 {
            if let Some(previous) = &last {
                replays += 1;
                if matches!(
                    world.purchase.distribute(previous),
                    Err(PurchaseError::Ledger(LedgerError::DuplicateGrant { .. }))
                ) {
                    replays_rejected += 1;
                }
            }
        }

        match world.purchase.distribute(&event) {
            Ok(receipt) => {
                purchases_ok += 1;
                pooled += receipt.pool;
                distributed += receipt.grants.iter().map(|g| g.points.0).sum::<Decimal>();
            }
            Err(err) => tracing::warn!(reference = %event.reference_id, error = %err, "purchase rejected"),
        }
        last = Some(event);
    }

    let result = ScenarioResult {
        pass: pooled == distributed && replays_rejected == replays,
        purchases_ok,
        purchase_pool: pooled,
        purchase_points: distributed,
        replays_rejected,
        ..ScenarioResult::default()
    };
    Ok((world, result))
}
