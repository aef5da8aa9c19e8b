//! Per-room authoritative simulation and its tick loop

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::input::PlayerInput;
use crate::room::PlayerRole;
use crate::util::time::TICK_DURATION_MICROS;

use super::ai::{self, AiState, BOT_SPAWN_INTERVAL_MS, BOT_SPAWN_POINTS, MAX_BOTS_ON_FIELD, PLAYER_SPEED};
use super::combat::{BulletState, CombatSystem, HitOutcome};
use super::map::MapState;
use super::physics::{PhysicsSystem, FIELD_SIZE, TANK_SIZE};
use super::snapshot::StateSnapshot;
use super::tank::{TankSide, TankState};
use super::world::{GameStatus, World};
use super::Direction;

/// Where a role's tank spawns and respawns
pub fn player_spawn(role: PlayerRole) -> (f64, f64) {
    match role {
        PlayerRole::Host => (64.0, 192.0),
        PlayerRole::Guest => (128.0, 192.0),
    }
}

/// Latest input held per role until overwritten
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct HeldInput {
    direction: Option<Direction>,
    moving: bool,
    firing: bool,
}

/// Simulation state and rules for one room, driven one step at a time
pub struct EngineCore {
    room_id: String,
    world: World,
    host_input: HeldInput,
    guest_input: HeldInput,
    /// Last issued ids; tanks and bullets count separately from 1
    tank_ids: u32,
    bullet_ids: u32,
    bot_spawn_timer: f64,
    bot_spawn_index: usize,
    rng: ChaCha8Rng,
    last_tick: Option<Instant>,
}

impl EngineCore {
    pub fn new(room_id: impl Into<String>, seed: u64) -> Self {
        Self::with_map(room_id, seed, MapState::stage_one())
    }

    pub fn with_map(room_id: impl Into<String>, seed: u64, map: MapState) -> Self {
        Self {
            room_id: room_id.into(),
            world: World::new(map),
            host_input: HeldInput::default(),
            guest_input: HeldInput::default(),
            tank_ids: 0,
            bullet_ids: 0,
            bot_spawn_timer: 0.0,
            bot_spawn_index: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            last_tick: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn status(&self) -> GameStatus {
        self.world.game_status
    }

    /// Spawn both human tanks and enter `Playing`; false unless still waiting
    pub fn begin(&mut self) -> bool {
        if self.world.game_status != GameStatus::Waiting {
            return false;
        }

        for role in PlayerRole::ALL {
            self.spawn_player_tank(role);
        }
        self.world.game_status = GameStatus::Playing;
        self.last_tick = Some(Instant::now());
        true
    }

    pub fn finish(&mut self) {
        self.world.game_status = GameStatus::Finished;
    }

    /// Step by the wall-clock time since the previous tick
    pub fn tick(&mut self) {
        let now = Instant::now();
        let delta_ms = self
            .last_tick
            .map(|last| now.duration_since(last).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        self.last_tick = Some(now);
        self.step(delta_ms);
    }

    /// Advance the simulation by `delta_ms`
    pub fn step(&mut self, delta_ms: f64) {
        if self.world.game_status != GameStatus::Playing {
            return;
        }

        self.update_bot_spawning(delta_ms);
        self.update_bots(delta_ms);
        self.update_players(delta_ms);
        self.update_bullets(delta_ms);
        self.resolve_wall_hits();
        self.resolve_tank_hits();
        self.update_timers(delta_ms);
        self.check_respawns();
    }

    /// Buffer a role's latest input; a missing direction keeps the held one
    pub fn handle_input(&mut self, role: PlayerRole, input: &PlayerInput) {
        if self.world.game_status != GameStatus::Playing {
            return;
        }

        let held = self.input_mut(role);
        held.direction = input.direction.or(held.direction);
        held.moving = input.moving;
        held.firing = input.firing;
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(&self.world)
    }

    fn input(&self, role: PlayerRole) -> HeldInput {
        match role {
            PlayerRole::Host => self.host_input,
            PlayerRole::Guest => self.guest_input,
        }
    }

    fn input_mut(&mut self, role: PlayerRole) -> &mut HeldInput {
        match role {
            PlayerRole::Host => &mut self.host_input,
            PlayerRole::Guest => &mut self.guest_input,
        }
    }

    fn next_tank_id(&mut self) -> u32 {
        self.tank_ids += 1;
        self.tank_ids
    }

    fn next_bullet_id(&mut self) -> u32 {
        self.bullet_ids += 1;
        self.bullet_ids
    }

    fn spawn_player_tank(&mut self, role: PlayerRole) -> u32 {
        let (x, y) = player_spawn(role);
        let tank_id = self.next_tank_id();
        self.world.tanks.push(TankState::player(tank_id, role, x, y));
        self.world.players.get_mut(role).active_tank_id = Some(tank_id);

        info!(room_id = %self.room_id, tank_id, role = %role, "Player tank spawned");
        tank_id
    }

    fn update_bot_spawning(&mut self, delta_ms: f64) {
        self.bot_spawn_timer += delta_ms;
        if self.bot_spawn_timer >= BOT_SPAWN_INTERVAL_MS {
            self.bot_spawn_timer = 0.0;
            self.spawn_bot();
        }
    }

    /// Put the next bot on the field if the roster, cap and spawn point allow
    fn spawn_bot(&mut self) -> Option<u32> {
        if self.world.remaining_bots == 0 || self.world.living_bots() >= MAX_BOTS_ON_FIELD {
            return None;
        }

        let (x, y) = BOT_SPAWN_POINTS[self.bot_spawn_index % BOT_SPAWN_POINTS.len()];
        self.bot_spawn_index += 1;
        if self.world.spawn_occupied(x, y) {
            debug!(room_id = %self.room_id, x, y, "Bot spawn point occupied");
            return None;
        }

        let remaining = self.world.remaining_bots;
        let level = ai::level_for_remaining(remaining);
        let tank_id = self.next_tank_id();
        let brain = AiState::spawn(&mut self.rng, x, y);
        self.world
            .tanks
            .push(TankState::bot(tank_id, level, x, y, ai::carries_power_up(remaining), brain));
        self.world.remaining_bots -= 1;

        info!(
            room_id = %self.room_id,
            tank_id,
            level = ?level,
            remaining = self.world.remaining_bots,
            "Bot tank spawned"
        );
        Some(tank_id)
    }

    fn update_bots(&mut self, delta_ms: f64) {
        for idx in 0..self.world.tanks.len() {
            let tank = &mut self.world.tanks[idx];
            if !tank.is_bot() || !tank.alive || tank.frozen_timeout > 0.0 {
                continue;
            }
            let Some(mut brain) = tank.ai_state.take() else {
                continue;
            };

            let direction = brain.steer(&mut self.rng, tank.x, tank.y, tank.direction, delta_ms);
            tank.direction = direction;
            tank.moving = true;

            let tank_id = tank.tank_id;
            let speed = ai::speed_for_level(tank.level);
            let (x, y) = PhysicsSystem::advance(tank.x, tank.y, direction, speed * delta_ms);
            let (x, y) = PhysicsSystem::clamp_to_field(x, y, TANK_SIZE);

            if self.world.map.collides_with_tank(x, y) || self.world.blocked_by_tank(tank_id, x, y) {
                brain.on_blocked(&mut self.rng, direction);
            } else {
                let tank = &mut self.world.tanks[idx];
                tank.x = x;
                tank.y = y;
            }

            if brain.fire_due(delta_ms) && CombatSystem::can_fire(self.world.tanks[idx].cooldown) {
                self.fire_bullet(idx);
                brain.reload(&mut self.rng);
            }

            self.world.tanks[idx].ai_state = Some(brain);
        }
    }

    fn update_players(&mut self, delta_ms: f64) {
        for role in PlayerRole::ALL {
            let input = self.input(role);
            let Some(idx) = self
                .world
                .players
                .get(role)
                .active_tank_id
                .and_then(|id| self.world.tank_index(id))
            else {
                continue;
            };

            let World { tanks, map, .. } = &mut self.world;
            let tank = &mut tanks[idx];
            if !tank.alive {
                continue;
            }

            tank.moving = input.moving;

            if let Some(turn) = input.direction.filter(|d| *d != tank.direction) {
                // perpendicular turns snap the axis being left to the 8-unit grid
                if turn.is_horizontal() != tank.direction.is_horizontal() {
                    let max = FIELD_SIZE - TANK_SIZE;
                    if tank.direction.is_horizontal() {
                        let y = tank.y;
                        tank.x = PhysicsSystem::grid_align(tank.x, |x| !map.collides_with_tank(x, y)).clamp(0.0, max);
                    } else {
                        let x = tank.x;
                        tank.y = PhysicsSystem::grid_align(tank.y, |y| !map.collides_with_tank(x, y)).clamp(0.0, max);
                    }
                }
                tank.direction = turn;
            }

            if input.moving {
                let (x, y) = PhysicsSystem::advance(tank.x, tank.y, tank.direction, PLAYER_SPEED * delta_ms);
                let (x, y) = PhysicsSystem::clamp_to_field(x, y, TANK_SIZE);
                // human tanks only check terrain, never other tanks
                if !map.collides_with_tank(x, y) {
                    tank.x = x;
                    tank.y = y;
                }
            }

            if input.firing && CombatSystem::can_fire(tank.cooldown) {
                self.fire_bullet(idx);
            }
        }
    }

    fn fire_bullet(&mut self, idx: usize) {
        let bullet_id = self.next_bullet_id();
        let tank = &mut self.world.tanks[idx];
        let bullet = BulletState::fired_from(bullet_id, tank);
        tank.cooldown = CombatSystem::fire_cooldown();
        self.world.bullets.push(bullet);
    }

    fn update_bullets(&mut self, delta_ms: f64) {
        for bullet in self.world.bullets.iter_mut() {
            bullet.update(delta_ms);
        }
        self.world.bullets.retain(BulletState::in_bounds);
    }

    fn resolve_wall_hits(&mut self) {
        let World { map, bullets, .. } = &mut self.world;
        bullets.retain(|bullet| !map.absorb_bullet(&bullet.swept_rect(), bullet.power));
    }

    fn resolve_tank_hits(&mut self) {
        let World { tanks, bullets, .. } = &mut self.world;
        let mut spent = Vec::new();

        for bullet in bullets.iter() {
            // a shooter that no longer exists counts as human fire
            let shooter = tanks
                .iter()
                .find(|t| t.tank_id == bullet.tank_id)
                .map(|t| t.side)
                .unwrap_or(TankSide::Player);
            let rect = bullet.rect();
            let mut consumed = false;

            for tank in tanks.iter_mut() {
                if tank.tank_id == bullet.tank_id || !tank.alive {
                    continue;
                }
                if !PhysicsSystem::test_collision(&rect, &tank.rect(), 0.0) {
                    continue;
                }

                match CombatSystem::resolve_hit(shooter, tank) {
                    HitOutcome::PassThrough => {}
                    HitOutcome::Absorbed => consumed = true,
                    HitOutcome::Damage => {
                        let (hp, killed) = CombatSystem::apply_damage(tank.hp, 1);
                        tank.hp = hp;
                        if killed {
                            tank.alive = false;
                            info!(
                                room_id = %self.room_id,
                                tank_id = tank.tank_id,
                                side = ?tank.side,
                                "Tank destroyed"
                            );
                        }
                        consumed = true;
                    }
                }
            }

            if consumed {
                spent.push(bullet.bullet_id);
            }
        }

        if !spent.is_empty() {
            bullets.retain(|b| !spent.contains(&b.bullet_id));
        }
    }

    fn update_timers(&mut self, delta_ms: f64) {
        for tank in self.world.tanks.iter_mut() {
            tank.cooldown = CombatSystem::decay(tank.cooldown, delta_ms);
            tank.helmet_duration = CombatSystem::decay(tank.helmet_duration, delta_ms);
            tank.frozen_timeout = CombatSystem::decay(tank.frozen_timeout, delta_ms);
        }
    }

    fn check_respawns(&mut self) {
        for role in PlayerRole::ALL {
            if let Some(tank_id) = self.world.players.get(role).active_tank_id {
                if self.world.tank(tank_id).is_some_and(|t| t.alive) {
                    continue;
                }

                let slot = self.world.players.get_mut(role);
                slot.active_tank_id = None;
                slot.lives = slot.lives.saturating_sub(1);
                info!(room_id = %self.room_id, role = %role, lives = slot.lives, "Player lost a life");
            }

            if self.world.players.get(role).lives > 0 {
                self.respawn_player(role);
            }
        }
    }

    /// Respawn unless a living tank blocks the spawn point; retried next tick
    fn respawn_player(&mut self, role: PlayerRole) {
        let (x, y) = player_spawn(role);
        if self.world.spawn_occupied(x, y) {
            return;
        }
        self.spawn_player_tank(role);
    }
}

/// Handle to a room's engine; the tick loop runs on its own task
pub struct GameEngine {
    room_id: String,
    core: Arc<Mutex<EngineCore>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GameEngine {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self::with_seed(room_id, rand::random())
    }

    pub fn with_seed(room_id: impl Into<String>, seed: u64) -> Self {
        let room_id = room_id.into();
        let (shutdown, _) = watch::channel(false);
        info!(room_id = %room_id, "Game engine created");

        Self {
            core: Arc::new(Mutex::new(EngineCore::new(room_id.clone(), seed))),
            room_id,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Spawn both player tanks and start ticking at 60 Hz.
    ///
    /// Must be called inside a tokio runtime. A second call is a logged no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!(room_id = %self.room_id, "Game engine already running");
            return;
        }
        if !self.core.lock().begin() {
            warn!(room_id = %self.room_id, "Game engine already finished");
            return;
        }

        let core = Arc::clone(&self.core);
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(run_tick_loop(core, shutdown)));

        info!(room_id = %self.room_id, "Game engine started");
    }

    /// Halt the tick loop and mark the match finished
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.task.lock().take();
        self.core.lock().finish();

        info!(room_id = %self.room_id, "Game engine stopped");
    }

    pub fn handle_input(&self, role: PlayerRole, input: &PlayerInput) {
        self.core.lock().handle_input(role, input);
    }

    pub fn get_state(&self) -> StateSnapshot {
        self.core.lock().snapshot()
    }

    pub fn get_room_id(&self) -> &str {
        &self.room_id
    }

    pub fn status(&self) -> GameStatus {
        self.core.lock().status()
    }

    pub fn is_finished(&self) -> bool {
        self.status() == GameStatus::Finished
    }
}

async fn run_tick_loop(core: Arc<Mutex<EngineCore>>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_micros(TICK_DURATION_MICROS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !tick_once(&core) {
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn tick_once(core: &Mutex<EngineCore>) -> bool {
    let mut core = core.lock();
    if core.status() != GameStatus::Playing {
        return false;
    }
    core.tick();
    true
}

/// Registry of all live engines, keyed by room id
pub struct EngineRegistry {
    engines: DashMap<String, Arc<GameEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: DashMap::new(),
        }
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<GameEngine>> {
        self.engines.get(room_id).map(|e| Arc::clone(e.value()))
    }

    /// Register `engine`; an engine already held for the room is stopped
    pub fn insert(&self, engine: Arc<GameEngine>) {
        let room_id = engine.get_room_id().to_string();
        if let Some(replaced) = self.engines.insert(room_id.clone(), Arc::clone(&engine)) {
            if !Arc::ptr_eq(&replaced, &engine) {
                warn!(room_id = %room_id, "Replacing a registered engine");
                replaced.stop();
            }
        }
    }

    pub fn remove(&self, room_id: &str) -> Option<Arc<GameEngine>> {
        self.engines.remove(room_id).map(|(_, e)| e)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.engines.contains_key(room_id)
    }

    pub fn active_engines(&self) -> usize {
        self.engines.len()
    }

    /// Stop and drop every engine (shutdown path)
    pub fn stop_all(&self) {
        let engines: Vec<Arc<GameEngine>> = self.engines.iter().map(|e| Arc::clone(e.value())).collect();
        self.engines.clear();
        for engine in engines {
            engine.stop();
        }
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
