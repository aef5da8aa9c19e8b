//! Combat system - bullets, cooldowns, damage and hit resolution

use serde::Serialize;

use super::physics::{PhysicsSystem, Rect, BULLET_SIZE, FIELD_SIZE, TANK_SIZE};
use super::tank::{TankSide, TankState};
use super::Direction;

/// Units per millisecond
pub const BULLET_SPEED: f64 = 0.18;
/// Delay between shots (ms)
pub const FIRE_COOLDOWN_MS: f64 = 300.0;
pub const BULLET_POWER: u32 = 1;
/// Power needed to break steel
pub const STEEL_BREAKING_POWER: u32 = 3;

/// Sideways widening of the swept box so a shot chips a full tank-width of brick
const EXPLOSION_SPREAD: f64 = 4.0;
const EXPLOSION_THRESHOLD: f64 = 0.01;

/// Active bullet in the game
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletState {
    pub bullet_id: u32,
    pub x: f64,
    pub y: f64,
    pub last_x: f64,
    pub last_y: f64,
    pub direction: Direction,
    pub speed: f64,
    /// Tank that fired it
    pub tank_id: u32,
    pub power: u32,
}

impl BulletState {
    /// Spawn a bullet just outside the muzzle of `tank`
    pub fn fired_from(bullet_id: u32, tank: &TankState) -> Self {
        let centered = (TANK_SIZE - BULLET_SIZE) / 2.0;
        let (x, y) = match tank.direction {
            Direction::Up => (tank.x + centered, tank.y - BULLET_SIZE),
            Direction::Down => (tank.x + centered, tank.y + TANK_SIZE),
            Direction::Left => (tank.x - BULLET_SIZE, tank.y + centered),
            Direction::Right => (tank.x + TANK_SIZE, tank.y + centered),
        };

        Self {
            bullet_id,
            x,
            y,
            last_x: x,
            last_y: y,
            direction: tank.direction,
            speed: BULLET_SPEED,
            tank_id: tank.tank_id,
            power: BULLET_POWER,
        }
    }

    /// Remember the previous position and move forward
    pub fn update(&mut self, delta_ms: f64) {
        self.last_x = self.x;
        self.last_y = self.y;
        let (x, y) = PhysicsSystem::advance(self.x, self.y, self.direction, self.speed * delta_ms);
        self.x = x;
        self.y = y;
    }

    /// Fully inside the field
    pub fn in_bounds(&self) -> bool {
        self.x >= 0.0
            && self.x + BULLET_SIZE <= FIELD_SIZE
            && self.y >= 0.0
            && self.y + BULLET_SIZE <= FIELD_SIZE
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, BULLET_SIZE, BULLET_SIZE)
    }

    /// Box swept since the last tick, widened across the direction of travel
    pub fn swept_rect(&self) -> Rect {
        let x = self.x.min(self.last_x);
        let y = self.y.min(self.last_y);
        let width = (self.x - self.last_x).abs() + BULLET_SIZE;
        let height = (self.y - self.last_y).abs() + BULLET_SIZE;
        let spread = EXPLOSION_SPREAD + EXPLOSION_THRESHOLD;

        if self.direction.is_horizontal() {
            Rect::new(
                x - EXPLOSION_THRESHOLD,
                y - spread,
                width + 2.0 * EXPLOSION_THRESHOLD,
                height + 2.0 * spread,
            )
        } else {
            Rect::new(
                x - spread,
                y - EXPLOSION_THRESHOLD,
                width + 2.0 * spread,
                height + EXPLOSION_THRESHOLD,
            )
        }
    }
}

/// What a bullet does to a tank it overlaps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// Bullet flies on
    PassThrough,
    /// Bullet is consumed, target unharmed
    Absorbed,
    /// Bullet is consumed and deals one point of damage
    Damage,
}

/// Combat rules for cooldowns and damage
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a tank can fire (cooldown check)
    pub fn can_fire(cooldown: f64) -> bool {
        cooldown <= 0.0
    }

    /// Get cooldown to set after firing
    pub fn fire_cooldown() -> f64 {
        FIRE_COOLDOWN_MS
    }

    /// Count a timer down, never below zero
    pub fn decay(timer: f64, delta_ms: f64) -> f64 {
        (timer - delta_ms).max(0.0)
    }

    /// Apply damage to hp, returns (new_hp, is_dead)
    pub fn apply_damage(hp: u32, damage: u32) -> (u32, bool) {
        let new_hp = hp.saturating_sub(damage);
        (new_hp, new_hp == 0)
    }

    /// Friendly human fire is absorbed, bots shoot through each other and a
    /// helmet absorbs bot fire.
    pub fn resolve_hit(shooter: TankSide, target: &TankState) -> HitOutcome {
        match (shooter, target.side) {
            (TankSide::Player, TankSide::Player) => HitOutcome::Absorbed,
            (TankSide::Player, TankSide::Bot) => HitOutcome::Damage,
            (TankSide::Bot, TankSide::Player) if target.helmet_duration > 0.0 => HitOutcome::Absorbed,
            (TankSide::Bot, TankSide::Player) => HitOutcome::Damage,
            (TankSide::Bot, TankSide::Bot) => HitOutcome::PassThrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::PlayerRole;

    fn player_tank(direction: Direction) -> TankState {
        let mut tank = TankState::player(1, PlayerRole::Host, 64.0, 96.0);
        tank.direction = direction;
        tank
    }

    #[test]
    fn muzzle_positions() {
        let b = BulletState::fired_from(1, &player_tank(Direction::Up));
        assert_eq!((b.x, b.y), (70.5, 93.0));
        let b = BulletState::fired_from(2, &player_tank(Direction::Down));
        assert_eq!((b.x, b.y), (70.5, 112.0));
        let b = BulletState::fired_from(3, &player_tank(Direction::Left));
        assert_eq!((b.x, b.y), (61.0, 102.5));
        let b = BulletState::fired_from(4, &player_tank(Direction::Right));
        assert_eq!((b.x, b.y), (80.0, 102.5));
        assert_eq!((b.last_x, b.last_y), (b.x, b.y));
        assert_eq!(b.tank_id, 1);
        assert_eq!(b.power, 1);
    }

    #[test]
    fn bullets_travel_and_leave_the_field() {
        let mut b = BulletState::fired_from(1, &player_tank(Direction::Up));
        b.update(100.0);
        assert_eq!(b.last_y, 93.0);
        assert!((b.y - 75.0).abs() < 1e-9);
        assert!(b.in_bounds());

        b.y = 1.0;
        b.update(50.0);
        assert!(!b.in_bounds());
    }

    #[test]
    fn swept_rect_widens_across_travel() {
        let mut b = BulletState::fired_from(1, &player_tank(Direction::Up));
        b.x = 41.0;
        b.y = 50.0;
        b.update(50.0);
        let r = b.swept_rect();
        assert!((r.x - 36.99).abs() < 1e-9);
        assert!((r.width - 11.02).abs() < 1e-9);
        assert!((r.y - 40.99).abs() < 1e-9);
        assert!((r.y + r.height - 53.0).abs() < 1e-9);

        b.direction = Direction::Right;
        b.last_x = 41.0;
        b.last_y = 41.0;
        b.y = 41.0;
        b.x = 50.0;
        let r = b.swept_rect();
        assert!((r.x - 40.99).abs() < 1e-9);
        assert!((r.y - 36.99).abs() < 1e-9);
        assert!((r.height - 11.02).abs() < 1e-9);
    }

    #[test]
    fn damage_saturates() {
        assert_eq!(CombatSystem::apply_damage(4, 1), (3, false));
        assert_eq!(CombatSystem::apply_damage(1, 1), (0, true));
        assert_eq!(CombatSystem::apply_damage(0, 1), (0, true));
    }

    #[test]
    fn cooldown_and_decay() {
        assert!(CombatSystem::can_fire(0.0));
        assert!(!CombatSystem::can_fire(CombatSystem::fire_cooldown()));
        assert_eq!(CombatSystem::decay(300.0, 16.0), 284.0);
        assert_eq!(CombatSystem::decay(10.0, 16.0), 0.0);
    }

    #[test]
    fn hit_rules() {
        let mut human = player_tank(Direction::Up);
        let ai = crate::game::ai::AiState {
            mode: crate::game::ai::AiMode::Wander,
            move_timer: 1000.0,
            target_direction: Direction::Down,
            fire_timer: 500.0,
            blocked_timer: 0.0,
            last_x: 0.0,
            last_y: 0.0,
        };
        let bot = TankState::bot(2, crate::game::TankLevel::Basic, 0.0, 0.0, false, ai);

        assert_eq!(CombatSystem::resolve_hit(TankSide::Player, &human), HitOutcome::Absorbed);
        assert_eq!(CombatSystem::resolve_hit(TankSide::Player, &bot), HitOutcome::Damage);
        assert_eq!(CombatSystem::resolve_hit(TankSide::Bot, &bot), HitOutcome::PassThrough);
        assert_eq!(CombatSystem::resolve_hit(TankSide::Bot, &human), HitOutcome::Absorbed);
        human.helmet_duration = 0.0;
        assert_eq!(CombatSystem::resolve_hit(TankSide::Bot, &human), HitOutcome::Damage);
    }
}
