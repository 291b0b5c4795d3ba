//! Fleets changing hands as owners and subordinates come and go

use std::sync::Arc;

use glam::Vec3;

use fleet_battle_server::battle::command::{CommandKind, CommandPayload};
use fleet_battle_server::battle::fleet::{FleetLoadout, Formation, WeaponProfile, DEFAULT_MORALE};
use fleet_battle_server::battle::types::{BattleConfig, BattleId, CharacterId, FactionId, FleetId};
use fleet_battle_server::delegation::{ControlMode, DelegationEvent};
use fleet_battle_server::session::{BattleService, Collaborators, CreateBattle, ServiceSettings};
use fleet_battle_server::store::InMemoryBattleStore;
use fleet_battle_server::world::{CommanderRecord, CommanderStats, InMemoryWorld};

struct Fixture {
    service: BattleService,
    battle_id: BattleId,
    fleet: FleetId,
    owner: CharacterId,
    deputy: CharacterId,
    junior: CharacterId,
}

fn commander(faction: u32, command: u8, sort_order: u32) -> CommanderRecord {
    CommanderRecord {
        id: CharacterId::new(),
        name: format!("commander-{}", sort_order),
        faction: FactionId(faction),
        stats: CommanderStats::new(command, 60, 60, 40, 40),
        sort_order,
    }
}

fn loadout(faction: u32, owner: Option<CharacterId>, position: Vec3) -> FleetLoadout {
    FleetLoadout {
        fleet_id: FleetId::new(),
        name: format!("faction-{}", faction),
        faction: FactionId(faction),
        owner_id: owner,
        commander_id: owner,
        units: 10,
        max_units: 10,
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

async fn fixture(auto_revert: bool) -> Fixture {
    let world = Arc::new(InMemoryWorld::new(4, 4));
    let owner = commander(1, 50, 0);
    let deputy = commander(1, 80, 1);
    // Less command than the owner, never picked
    let junior = commander(1, 30, 2);
    for c in [&owner, &deputy, &junior] {
        world.insert_commander(c.clone());
    }

    let mine = loadout(1, Some(owner.id), Vec3::new(300.0, 1000.0, 0.0));
    let theirs = loadout(2, None, Vec3::new(1700.0, 1000.0, 0.0));
    world.insert_fleet(mine.clone(), None);
    world.insert_fleet(theirs.clone(), None);

    let settings = ServiceSettings {
        battle: BattleConfig {
            tick_rate: 30,
            ..BattleConfig::default()
        },
        auto_revert_on_owner_online: auto_revert,
        ..ServiceSettings::default()
    };
    let service = BattleService::new(
        Collaborators::in_memory(world, Arc::new(InMemoryBattleStore::new())),
        settings,
    );
    let battle_id = service
        .create_battle(CreateBattle {
            fleets: vec![mine.fleet_id, theirs.fleet_id],
            ..Default::default()
        })
        .unwrap();
    service.start(battle_id).await.unwrap();

    Fixture {
        service,
        battle_id,
        fleet: mine.fleet_id,
        owner: owner.id,
        deputy: deputy.id,
        junior: junior.id,
    }
}

impl Fixture {
    fn mode(&self) -> (ControlMode, Option<CharacterId>) {
        let state = self
            .service
            .delegation()
            .state(self.battle_id, self.fleet)
            .unwrap();
        (state.mode, state.delegate_id)
    }

    fn order(&self, issuer: CharacterId) -> Result<(), &'static str> {
        self.service
            .queue_command(
                self.battle_id,
                self.fleet,
                CommandKind::Rotate,
                CommandPayload::rotate(45.0),
                Some(issuer),
            )
            .map(|_| ())
            .map_err(|e| e.code())
    }
}

#[tokio::test]
async fn control_follows_presence() {
    let f = fixture(true).await;
    let mut events = f.service.delegation().subscribe();

    // Nobody online: the AI flies it with the owner's profile
    let state = f.service.delegation().state(f.battle_id, f.fleet).unwrap();
    assert_eq!(state.mode, ControlMode::Ai);
    assert!(state.ai_profile.is_some());
    assert_eq!(f.order(f.owner), Err("not_controller"));

    f.service.set_presence(f.owner, true);
    assert_eq!(f.mode(), (ControlMode::Player, Some(f.owner)));
    assert_eq!(f.order(f.owner), Ok(()));
    assert!(matches!(
        events.try_recv(),
        Ok(DelegationEvent::Changed { to: ControlMode::Player, .. })
    ));

    // Owner drops, best online subordinate steps in
    f.service.set_presence(f.junior, true);
    f.service.set_presence(f.deputy, true);
    let changed = f.service.set_presence(f.owner, false);
    assert_eq!(changed, vec![(f.battle_id, f.fleet)]);
    assert_eq!(f.mode(), (ControlMode::Subordinate, Some(f.deputy)));
    assert_eq!(f.order(f.owner), Err("not_controller"));
    assert_eq!(f.order(f.junior), Err("not_controller"));
    assert_eq!(f.order(f.deputy), Ok(()));

    // Owner returns and takes it back
    f.service.set_presence(f.owner, true);
    assert_eq!(f.mode(), (ControlMode::Player, Some(f.owner)));

    // Everyone leaves, AI again
    f.service.set_presence(f.owner, false);
    assert_eq!(f.mode().0, ControlMode::Subordinate);
    f.service.set_presence(f.deputy, false);
    f.service.set_presence(f.junior, false);
    assert_eq!(f.mode(), (ControlMode::Ai, None));

    // Repeating a presence state changes nothing
    assert!(f.service.set_presence(f.junior, false).is_empty());

    f.service.stop(f.battle_id).await.unwrap();
}

#[tokio::test]
async fn deputy_keeps_control_without_auto_revert() {
    let f = fixture(false).await;
    f.service.set_presence(f.deputy, true);
    assert_eq!(f.mode(), (ControlMode::Subordinate, Some(f.deputy)));

    f.service.set_presence(f.owner, true);
    assert_eq!(f.mode(), (ControlMode::Subordinate, Some(f.deputy)));

    // Until the deputy hands it back
    let err = f
        .service
        .hand_off(f.battle_id, f.fleet, f.owner, f.deputy)
        .unwrap_err();
    assert_eq!(err.code(), "not_controller");

    let state = f
        .service
        .hand_off(f.battle_id, f.fleet, f.deputy, f.owner)
        .unwrap();
    assert_eq!(state.mode, ControlMode::Player);
    assert_eq!(state.delegate_id, Some(f.owner));

    let err = f
        .service
        .hand_off(f.battle_id, f.fleet, f.owner, f.junior)
        .unwrap_err();
    assert_eq!(err.code(), "target_offline");

    f.service.stop(f.battle_id).await.unwrap();
}
