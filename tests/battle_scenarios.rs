//! Whole-battle scenarios driven tick by tick through `BattleEngine::step`

use std::sync::Arc;

use glam::Vec3;

use fleet_battle_server::ai::{AiDecisionEngine, AiProfile, FixedRoster};
use fleet_battle_server::battle::command::CommandKind;
use fleet_battle_server::battle::engine::{BattleEngine, BattleSetup};
use fleet_battle_server::battle::error::RejectReason;
use fleet_battle_server::battle::events::{BattleEvent, BattleEventKind};
use fleet_battle_server::battle::fleet::{FleetLoadout, Formation, WeaponProfile, DEFAULT_MORALE};
use fleet_battle_server::battle::reinforcement::ReinforcementPriority;
use fleet_battle_server::battle::result::{BattleResult, EndReason};
use fleet_battle_server::battle::retreat::RetreatPhase;
use fleet_battle_server::battle::types::{
    BattleConfig, BattleFeatures, BattleId, BattleStatus, FactionId, FleetId,
};

fn loadout(faction: u32, units: u32, position: Vec3) -> FleetLoadout {
    FleetLoadout {
        fleet_id: FleetId::new(),
        name: format!("faction-{}", faction),
        faction: FactionId(faction),
        owner_id: None,
        commander_id: None,
        units,
        max_units: units,
        position,
        heading: 0.0,
        max_speed: 50.0,
        acceleration: None,
        turn_rate: None,
        weapon: WeaponProfile::default(),
        morale: DEFAULT_MORALE,
        formation: Formation::Line,
    }
}

/// Weapons that cannot reach across the test arena
fn short_range(mut fleet: FleetLoadout) -> FleetLoadout {
    fleet.weapon.range = 50.0;
    fleet
}

fn setup(max_ticks: u64, ai: bool) -> BattleSetup {
    BattleSetup {
        config: BattleConfig {
            max_ticks,
            features: BattleFeatures {
                ai,
                ..BattleFeatures::default()
            },
            ..BattleConfig::default()
        },
        seed: 42,
        ..BattleSetup::default()
    }
}

fn battle(setup: BattleSetup, fleets: &[FleetLoadout]) -> BattleEngine {
    let mut engine = BattleEngine::new(BattleId::new(), setup).unwrap();
    for fleet in fleets {
        engine.add_participant(fleet.clone()).unwrap();
    }
    engine
}

/// Step until the battle ends or `limit` ticks pass, collecting every event
fn run(engine: &mut BattleEngine, limit: u64) -> Vec<BattleEvent> {
    let mut events = Vec::new();
    for _ in 0..limit {
        match engine.step() {
            Some(snapshot) => events.extend(snapshot.events.iter().cloned()),
            None => break,
        }
        if engine.status() == BattleStatus::Ended {
            break;
        }
    }
    events
}

fn result(engine: &BattleEngine) -> BattleResult {
    engine.result().cloned().expect("battle should have ended")
}

#[test]
fn timeout_goes_to_the_stronger_faction() {
    let strong = short_range(loadout(1, 20, Vec3::new(200.0, 1000.0, 0.0)));
    let weak = short_range(loadout(2, 10, Vec3::new(1800.0, 1000.0, 0.0)));
    let mut engine = battle(setup(100, false), &[strong, weak]);
    engine.start().unwrap();

    run(&mut engine, 500);

    let result = result(&engine);
    assert_eq!(result.reason, EndReason::Timeout);
    assert_eq!(result.winner, Some(FactionId(1)));
    assert_eq!(result.duration_ticks, 100);
    assert!(result.participants.iter().all(|p| p.survived));
}

#[test]
fn timeout_with_equal_force_is_a_draw() {
    let a = short_range(loadout(1, 10, Vec3::new(200.0, 1000.0, 0.0)));
    let b = short_range(loadout(2, 10, Vec3::new(1800.0, 1000.0, 0.0)));
    let mut engine = battle(setup(100, false), &[a, b]);
    engine.start().unwrap();

    run(&mut engine, 500);

    let result = result(&engine);
    assert_eq!(result.reason, EndReason::Timeout);
    assert!(result.is_draw());
    assert_eq!(engine.step(), None);
}

#[test]
fn one_sided_fight_ends_in_victory_with_consistent_losses() {
    // sqrt(4) * 25 = 50 damage per full hit, exactly one unit
    let mut attacker = loadout(1, 4, Vec3::new(500.0, 1000.0, 0.0));
    attacker.weapon = WeaponProfile {
        range: 300.0,
        fire_rate: 10,
        damage: 25.0,
        accuracy: 100.0,
    };
    let mut target = loadout(2, 4, Vec3::new(700.0, 1000.0, 0.0));
    target.max_speed = 20.0;
    target.weapon = WeaponProfile {
        range: 0.0,
        damage: 0.0,
        ..WeaponProfile::default()
    };
    let mut engine = battle(setup(18_000, false), &[attacker.clone(), target.clone()]);
    engine.start().unwrap();

    let events = run(&mut engine, 2_000);

    let result = result(&engine);
    assert_eq!(result.reason, EndReason::Victory);
    assert_eq!(result.winner, Some(FactionId(1)));

    let destroyed: u64 = events
        .iter()
        .filter_map(|e| match e.kind {
            BattleEventKind::ShipDestroyed { units, .. } => Some(units as u64),
            _ => None,
        })
        .sum();
    assert_eq!(result.total_ships_destroyed, destroyed);
    assert_eq!(destroyed, 4);

    let loser = result
        .participants
        .iter()
        .find(|p| p.fleet_id == target.fleet_id)
        .unwrap();
    assert!(!loser.survived);
    assert_eq!(loser.ships_lost, 4);
    assert!(events.iter().any(|e| matches!(
        e.kind,
        BattleEventKind::FleetDestroyed { fleet_id, .. } if fleet_id == target.fleet_id
    )));
}

#[test]
fn ai_retreats_once_below_threshold() {
    let me = loadout(1, 10, Vec3::new(1000.0, 1000.0, 0.0));
    let enemy = short_range(loadout(2, 10, Vec3::new(1800.0, 1000.0, 0.0)));

    let roster = Arc::new(FixedRoster::default());
    roster.assign(
        me.fleet_id,
        AiProfile {
            retreat_threshold: 30.0,
            ..AiProfile::default()
        },
    );
    let mut engine = battle(setup(18_000, true), &[me.clone(), enemy])
        .with_ai(Box::new(AiDecisionEngine::new(roster)));
    engine.fleet_mut(&me.fleet_id).unwrap().hp = 29.0;
    engine.start().unwrap();

    let events = run(&mut engine, 400);

    let retreat_orders: Vec<&BattleEvent> = events
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                BattleEventKind::CommandApplied { fleet_id, command: CommandKind::Retreat, .. }
                    if fleet_id == me.fleet_id
            )
        })
        .collect();
    assert_eq!(retreat_orders.len(), 1);
    assert_eq!(retreat_orders[0].tick, 1);

    let started = events
        .iter()
        .filter(|e| matches!(e.kind, BattleEventKind::RetreatStarted { .. }))
        .count();
    assert_eq!(started, 1);

    // Withdrawing the only fleet of faction 1 hands the field to faction 2
    let result = result(&engine);
    assert_eq!(result.reason, EndReason::Victory);
    assert_eq!(result.winner, Some(FactionId(2)));
    let mine = result
        .participants
        .iter()
        .find(|p| p.fleet_id == me.fleet_id)
        .unwrap();
    assert!(mine.withdrawn);
    assert!(mine.survived);
}

#[test]
fn cancelled_retreat_leaves_fleet_in_place() {
    let a = short_range(loadout(1, 10, Vec3::new(600.0, 900.0, 0.0)));
    let b = short_range(loadout(2, 10, Vec3::new(1400.0, 900.0, 0.0)));
    let mut engine = battle(setup(18_000, false), &[a.clone(), b]);
    engine.start().unwrap();
    run(&mut engine, 3);

    let before = engine.fleet(&a.fleet_id).unwrap().kinematics;
    engine.request_retreat(a.fleet_id, None).unwrap();
    run(&mut engine, 10);
    assert_eq!(
        engine.retreats().get(&a.fleet_id).unwrap().phase,
        RetreatPhase::Charging
    );

    engine.cancel_retreat(a.fleet_id).unwrap();
    let fleet = engine.fleet(&a.fleet_id).unwrap();
    assert!(!fleet.retreating);
    assert!(fleet.is_active());
    assert_eq!(fleet.kinematics.position, before.position);
    assert_eq!(
        engine.cancel_retreat(a.fleet_id),
        Err(RejectReason::NotRetreating)
    );
}

#[test]
fn completed_retreat_withdraws_the_fleet() {
    // Nearest edge is y = 0, away from the hunter
    let runner = loadout(1, 10, Vec3::new(1000.0, 300.0, 0.0));
    let anchor = short_range(loadout(1, 10, Vec3::new(200.0, 1800.0, 0.0)));
    // In range of the runner when the retreat begins
    let hunter = loadout(2, 10, Vec3::new(1000.0, 500.0, 0.0));
    let mut engine = battle(setup(18_000, false), &[runner.clone(), anchor, hunter]);
    engine.start().unwrap();

    let completes_at = engine.request_retreat(runner.fleet_id, None).unwrap();
    assert_eq!(completes_at, 150);

    let events = run(&mut engine, 200);
    let done_tick = events
        .iter()
        .find_map(|e| match e.kind {
            BattleEventKind::RetreatCompleted { fleet_id, .. } if fleet_id == runner.fleet_id => {
                Some(e.tick)
            }
            _ => None,
        })
        .expect("retreat should complete");
    assert_eq!(done_tick, 150);

    let fleet = engine.fleet(&runner.fleet_id).unwrap();
    assert!(fleet.withdrawn);
    assert!(!fleet.retreating);
    assert!(!engine.retreats().is_retreating(&runner.fleet_id));

    // Nobody shoots at or is shot by a withdrawn fleet
    assert!(!events.iter().any(|e| e.tick > done_tick
        && matches!(
            e.kind,
            BattleEventKind::DamageDealt { attacker_id, target_id, .. }
                if attacker_id == runner.fleet_id || target_id == runner.fleet_id
        )));
    assert_eq!(engine.status(), BattleStatus::Active);
}

#[test]
fn reinforcement_over_the_unit_cap_changes_nothing() {
    let big = short_range(loadout(1, 295, Vec3::new(400.0, 1000.0, 0.0)));
    let other = short_range(loadout(2, 10, Vec3::new(1800.0, 1000.0, 0.0)));
    let mut engine = battle(setup(18_000, false), &[big, other]);
    engine.start().unwrap();
    run(&mut engine, 2);

    let before = engine.snapshot();
    let extra = loadout(1, 10, Vec3::ZERO);
    let err = engine
        .request_reinforcement(extra.clone(), ReinforcementPriority::Normal)
        .unwrap_err();
    assert_eq!(err, RejectReason::CapacityExceeded);
    assert_eq!(err.code(), "capacity_exceeded");

    assert_eq!(engine.snapshot(), before);
    assert!(!engine.reinforcements().is_pending(&extra.fleet_id));
    assert_eq!(engine.reinforcements().pending_units(FactionId(1)), 0);

    // Five more units still fit
    let small = loadout(1, 5, Vec3::ZERO);
    let arrival = engine
        .request_reinforcement(small.clone(), ReinforcementPriority::Urgent)
        .unwrap();
    assert!(arrival > engine.tick());
    let remaining = arrival - engine.tick();
    run(&mut engine, remaining);
    assert!(engine.fleet(&small.fleet_id).is_some_and(|f| f.is_active()));
}
