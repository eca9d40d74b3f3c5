//! Authoritative simulation state for one room

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const FIELD_WIDTH: f32 = 800.0;
pub const FIELD_HEIGHT: f32 = 600.0;

pub const PADDLE_WIDTH: f32 = 10.0;
pub const PADDLE_HEIGHT: f32 = FIELD_HEIGHT / 5.0;
/// Pixels per 60 Hz frame
pub const PADDLE_SPEED: f32 = 6.0;
/// Distance of the outer paddles from their wall
pub const PADDLE_MARGIN: f32 = 30.0;

pub const BALL_RADIUS: f32 = 10.0;
/// Serve velocity per axis, pixels per 60 Hz frame
pub const SERVE_VELOCITY: f32 = 5.0;
pub const BALL_SPEED: f32 = 1.5;
pub const MAX_BALL_DX: f32 = 12.0;
pub const MAX_BALL_DY: f32 = 12.0;

pub const POWER_UP_SIZE: f32 = 20.0;
pub const EFFECT_DURATION_MS: f32 = 5_000.0;
pub const POWER_UP_RESPAWN_MS: f32 = 4_000.0;
/// The ball is served on its own once this elapses without a client countdown
pub const SERVE_DELAY_MS: f32 = 3_000.0;

pub const DEFAULT_MAX_SCORE: u32 = 5;

/// Field side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Room format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    #[default]
    Two,
    Four,
}

impl RoomKind {
    pub fn max_players(self) -> usize {
        match self {
            RoomKind::Two => 2,
            RoomKind::Four => 4,
        }
    }
}

/// A player's position in a room: which side and which paddle on that side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub side: Side,
    pub slot: usize,
}

impl Seat {
    /// Seat for the player who joined at `index`.
    ///
    /// Two-player rooms seat join order 0 left and 1 right. Four-player rooms
    /// seat 0 and 1 on the left, 2 and 3 on the right.
    pub fn for_join_index(kind: RoomKind, index: usize) -> Option<Self> {
        let (side, slot) = match (kind, index) {
            (RoomKind::Two, 0) => (Side::Left, 0),
            (RoomKind::Two, 1) => (Side::Right, 0),
            (RoomKind::Four, 0) => (Side::Left, 0),
            (RoomKind::Four, 1) => (Side::Left, 1),
            (RoomKind::Four, 2) => (Side::Right, 0),
            (RoomKind::Four, 3) => (Side::Right, 1),
            _ => return None,
        };
        Some(Self { side, slot })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub radius: f32,
    pub speed: f32,
}

impl Ball {
    fn centered() -> Self {
        Self {
            x: FIELD_WIDTH / 2.0,
            y: FIELD_HEIGHT / 2.0,
            dx: SERVE_VELOCITY,
            dy: SERVE_VELOCITY,
            radius: BALL_RADIUS,
            speed: BALL_SPEED,
        }
    }

    /// Re-centre the ball and serve it toward `toward`
    pub fn serve<R: Rng + ?Sized>(&mut self, toward: Side, rng: &mut R) {
        let vertical = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        self.x = FIELD_WIDTH / 2.0;
        self.y = FIELD_HEIGHT / 2.0;
        self.dx = match toward {
            Side::Left => -SERVE_VELOCITY,
            Side::Right => SERVE_VELOCITY,
        };
        self.dy = SERVE_VELOCITY * vertical;
    }

    /// Side that last sent the ball, judged by its travel direction
    pub fn sender(&self) -> Side {
        if self.dx >= 0.0 {
            Side::Left
        } else {
            Side::Right
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paddle {
    pub x: f32,
    pub y: f32,
    pub dy: f32,
    pub speed: f32,
    pub height: f32,
    pub nickname: String,
}

impl Paddle {
    fn at(x: f32) -> Self {
        Self {
            x,
            y: FIELD_HEIGHT / 2.0 - PADDLE_HEIGHT / 2.0,
            dy: 0.0,
            speed: PADDLE_SPEED,
            height: PADDLE_HEIGHT,
            nickname: String::new(),
        }
    }

    /// Steer the paddle; `direction` is -1, 0 or 1
    pub fn steer(&mut self, direction: i8) {
        self.dy = f32::from(direction) * self.speed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PowerUpKind {
    SizeIncrease,
    SizeDecrease,
    SpeedBoost,
}

impl PowerUpKind {
    pub const ALL: [PowerUpKind; 3] = [
        PowerUpKind::SizeIncrease,
        PowerUpKind::SizeDecrease,
        PowerUpKind::SpeedBoost,
    ];

    pub fn color(self) -> &'static str {
        match self {
            PowerUpKind::SizeIncrease => "#00ff00",
            PowerUpKind::SizeDecrease => "#ff0000",
            PowerUpKind::SpeedBoost => "#ffff00",
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerUp {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub active: bool,
    #[serde(rename = "type")]
    pub kind: PowerUpKind,
    pub color: &'static str,
}

impl PowerUp {
    /// Place a fresh power-up somewhere in the central half of the field
    pub fn spawn<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let kind = PowerUpKind::random(rng);
        Self {
            x: rng.gen_range(FIELD_WIDTH / 4.0..FIELD_WIDTH * 3.0 / 4.0),
            y: rng.gen_range(FIELD_HEIGHT / 4.0..FIELD_HEIGHT * 3.0 / 4.0),
            width: POWER_UP_SIZE,
            height: POWER_UP_SIZE,
            active: true,
            kind,
            color: kind.color(),
        }
    }
}

/// A power-up effect currently applied to the field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveEffect {
    pub kind: PowerUpKind,
    /// Side that collected the power-up
    pub side: Side,
    pub remaining_ms: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub ball: Ball,
    #[serde(rename = "leftPaddle")]
    pub left_paddles: Vec<Paddle>,
    #[serde(rename = "rightPaddle")]
    pub right_paddles: Vec<Paddle>,
    pub power_up: PowerUp,
    pub score_left: u32,
    pub score_right: u32,
    pub max_score: u32,
    pub paddle_width: f32,
    pub paddle_height: f32,
    pub paddle_speed: f32,
    pub waiting_for_start: bool,
    pub power_ups_enabled: bool,
    #[serde(skip)]
    pub serve_delay_ms: f32,
    #[serde(skip)]
    pub effect: Option<ActiveEffect>,
    #[serde(skip)]
    pub power_up_respawn_ms: Option<f32>,
}

impl SimulationState {
    pub fn new<R: Rng + ?Sized>(
        kind: RoomKind,
        max_score: u32,
        power_ups_enabled: bool,
        rng: &mut R,
    ) -> Self {
        let mut left_paddles = vec![Paddle::at(PADDLE_MARGIN)];
        let mut right_paddles = vec![Paddle::at(FIELD_WIDTH - PADDLE_WIDTH - PADDLE_MARGIN)];
        if kind == RoomKind::Four {
            left_paddles.push(Paddle::at(FIELD_WIDTH / 7.0));
            right_paddles.push(Paddle::at(FIELD_WIDTH - FIELD_WIDTH / 7.0 - PADDLE_WIDTH));
        }

        let mut power_up = PowerUp::spawn(rng);
        power_up.active = power_ups_enabled;

        Self {
            ball: Ball::centered(),
            left_paddles,
            right_paddles,
            power_up,
            score_left: 0,
            score_right: 0,
            max_score,
            paddle_width: PADDLE_WIDTH,
            paddle_height: PADDLE_HEIGHT,
            paddle_speed: PADDLE_SPEED,
            waiting_for_start: true,
            power_ups_enabled,
            serve_delay_ms: SERVE_DELAY_MS,
            effect: None,
            power_up_respawn_ms: None,
        }
    }

    #[cfg(test)]
    pub fn paddles(&self, side: Side) -> &[Paddle] {
        match side {
            Side::Left => &self.left_paddles,
            Side::Right => &self.right_paddles,
        }
    }

    pub fn paddles_mut(&mut self, side: Side) -> &mut Vec<Paddle> {
        match side {
            Side::Left => &mut self.left_paddles,
            Side::Right => &mut self.right_paddles,
        }
    }

    pub fn paddle_mut(&mut self, seat: Seat) -> Option<&mut Paddle> {
        self.paddles_mut(seat.side).get_mut(seat.slot)
    }

    pub fn scores(&self) -> [u32; 2] {
        [self.score_left, self.score_right]
    }

    pub fn add_point(&mut self, side: Side) {
        match side {
            Side::Left => self.score_left += 1,
            Side::Right => self.score_right += 1,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.score_left >= self.max_score || self.score_right >= self.max_score
    }

    /// Side ahead on points; `None` on a tie
    pub fn leader(&self) -> Option<Side> {
        match self.score_left.cmp(&self.score_right) {
            std::cmp::Ordering::Greater => Some(Side::Left),
            std::cmp::Ordering::Less => Some(Side::Right),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Force `side` to the winning score for display after a forfeit
    pub fn force_win(&mut self, side: Side) {
        match side {
            Side::Left => self.score_left = self.max_score,
            Side::Right => self.score_right = self.max_score,
        }
    }

    /// Release the ball immediately
    pub fn release_serve(&mut self) {
        self.waiting_for_start = false;
        self.serve_delay_ms = 0.0;
    }

    pub fn respawn_power_up<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.power_up = PowerUp::spawn(rng);
        self.power_up.active = self.power_ups_enabled;
        self.power_up_respawn_ms = None;
    }

    /// Label paddles with their occupants' nicknames
    pub fn label_paddle(&mut self, seat: Seat, nickname: &str) {
        if let Some(paddle) = self.paddle_mut(seat) {
            paddle.nickname = nickname.to_string();
        }
    }
}
