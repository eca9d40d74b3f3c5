//! Ball, paddle and power-up physics

use rand::Rng;

use super::state::{
    ActiveEffect, Paddle, PowerUpKind, Side, SimulationState, BALL_SPEED, EFFECT_DURATION_MS,
    FIELD_HEIGHT, FIELD_WIDTH, MAX_BALL_DX, MAX_BALL_DY, PADDLE_HEIGHT, PADDLE_WIDTH, POWER_UP_RESPAWN_MS,
};

/// Velocities are expressed per 60 Hz frame
pub const FRAME_MS: f32 = 1000.0 / 60.0;

/// Longest span a single advance will integrate
pub const MAX_ADVANCE_MS: f32 = 250.0;

/// Hit acceleration applied to |dx|
const PADDLE_ACCELERATION: f32 = 1.05;

/// Vertical velocity added for a hit at the very tip of a paddle
const PADDLE_SPIN: f32 = 3.0;

/// Something notable that happened during an advance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhysicsEvent {
    Scored { side: Side },
    PowerUpCollected { kind: PowerUpKind, side: Side },
    EffectExpired,
}

/// Physics system for advancing a room's simulation
pub struct PhysicsEngine;

impl PhysicsEngine {
    /// Advance `state` by `delta_ms` of wall-clock time.
    ///
    /// Integration runs in sub-steps of at most one frame so a late tick cannot
    /// tunnel the ball through a paddle. All randomness comes from `rng`.
    pub fn advance<R: Rng + ?Sized>(
        state: &mut SimulationState,
        delta_ms: f32,
        rng: &mut R,
    ) -> Vec<PhysicsEvent> {
        let mut events = Vec::new();
        if !delta_ms.is_finite() || delta_ms <= 0.0 {
            return events;
        }

        let mut remaining = delta_ms.min(MAX_ADVANCE_MS);
        while remaining > 0.0 && !state.is_finished() {
            let dt = remaining.min(FRAME_MS);
            Self::step(state, dt, rng, &mut events);
            remaining -= dt;
        }
        events
    }

    fn step<R: Rng + ?Sized>(
        state: &mut SimulationState,
        dt: f32,
        rng: &mut R,
        events: &mut Vec<PhysicsEvent>,
    ) {
        let scale = dt / FRAME_MS;

        Self::tick_effect(state, dt, events);
        Self::tick_power_up_respawn(state, dt, rng);
        Self::move_paddles(state, scale);

        if state.waiting_for_start {
            state.serve_delay_ms -= dt;
            if state.serve_delay_ms > 0.0 {
                return;
            }
            state.release_serve();
        }

        let ball = &mut state.ball;
        ball.x += ball.dx * ball.speed * scale;
        ball.y += ball.dy * ball.speed * scale;

        Self::bounce_walls(state);
        Self::collide_paddles(state);
        Self::collect_power_up(state, events);
        Self::check_goal(state, rng, events);
    }

    fn tick_effect(state: &mut SimulationState, dt: f32, events: &mut Vec<PhysicsEvent>) {
        let Some(effect) = state.effect.as_mut() else {
            return;
        };
        effect.remaining_ms -= dt;
        if effect.remaining_ms <= 0.0 {
            Self::clear_effect(state);
            events.push(PhysicsEvent::EffectExpired);
        }
    }

    fn tick_power_up_respawn<R: Rng + ?Sized>(state: &mut SimulationState, dt: f32, rng: &mut R) {
        if let Some(left) = state.power_up_respawn_ms {
            let left = left - dt;
            if left <= 0.0 {
                state.respawn_power_up(rng);
            } else {
                state.power_up_respawn_ms = Some(left);
            }
        }
    }

    fn move_paddles(state: &mut SimulationState, scale: f32) {
        for paddle in state
            .left_paddles
            .iter_mut()
            .chain(state.right_paddles.iter_mut())
        {
            paddle.y = (paddle.y + paddle.dy * scale).clamp(0.0, FIELD_HEIGHT - paddle.height);
        }
    }

    fn bounce_walls(state: &mut SimulationState) {
        let ball = &mut state.ball;
        if ball.y - ball.radius <= 0.0 && ball.dy < 0.0 {
            ball.y = ball.radius;
            ball.dy = -ball.dy;
        } else if ball.y + ball.radius >= FIELD_HEIGHT && ball.dy > 0.0 {
            ball.y = FIELD_HEIGHT - ball.radius;
            ball.dy = -ball.dy;
        }
    }

    fn collide_paddles(state: &mut SimulationState) {
        // Only paddles facing the ball's travel direction can be hit
        let side = if state.ball.dx < 0.0 {
            Side::Left
        } else if state.ball.dx > 0.0 {
            Side::Right
        } else {
            return;
        };

        let ball = &mut state.ball;
        let paddles = match side {
            Side::Left => &state.left_paddles,
            Side::Right => &state.right_paddles,
        };

        for paddle in paddles {
            let centre_x = paddle.x + PADDLE_WIDTH / 2.0;
            let in_front = match side {
                Side::Left => ball.x >= centre_x,
                Side::Right => ball.x <= centre_x,
            };
            if !in_front || !circle_hits_rect(ball.x, ball.y, ball.radius, paddle) {
                continue;
            }

            let half = paddle.height / 2.0;
            let offset = ((ball.y - (paddle.y + half)) / half).clamp(-1.0, 1.0);
            let new_dx = (ball.dx.abs() * PADDLE_ACCELERATION).min(MAX_BALL_DX);

            match side {
                Side::Left => {
                    ball.dx = new_dx;
                    ball.x = paddle.x + PADDLE_WIDTH + ball.radius;
                }
                Side::Right => {
                    ball.dx = -new_dx;
                    ball.x = paddle.x - ball.radius;
                }
            }
            ball.dy = (ball.dy + offset * PADDLE_SPIN).clamp(-MAX_BALL_DY, MAX_BALL_DY);
            break;
        }
    }

    fn collect_power_up(state: &mut SimulationState, events: &mut Vec<PhysicsEvent>) {
        let power_up = &state.power_up;
        if !state.power_ups_enabled || !power_up.active {
            return;
        }

        let ball = &state.ball;
        let closest_x = ball.x.clamp(power_up.x, power_up.x + power_up.width);
        let closest_y = ball.y.clamp(power_up.y, power_up.y + power_up.height);
        let (dx, dy) = (ball.x - closest_x, ball.y - closest_y);
        if dx * dx + dy * dy > ball.radius * ball.radius {
            return;
        }

        let kind = power_up.kind;
        let side = ball.sender();
        state.power_up.active = false;
        state.power_up_respawn_ms = Some(POWER_UP_RESPAWN_MS);
        Self::apply_effect(state, kind, side);
        events.push(PhysicsEvent::PowerUpCollected { kind, side });
    }

    fn apply_effect(state: &mut SimulationState, kind: PowerUpKind, side: Side) {
        Self::clear_effect(state);
        match kind {
            PowerUpKind::SizeIncrease => resize_paddles(state.paddles_mut(side), 1.5),
            PowerUpKind::SizeDecrease => resize_paddles(state.paddles_mut(side.opposite()), 0.5),
            PowerUpKind::SpeedBoost => state.ball.speed = BALL_SPEED * 1.5,
        }
        state.effect = Some(ActiveEffect {
            kind,
            side,
            remaining_ms: EFFECT_DURATION_MS,
        });
    }

    fn clear_effect(state: &mut SimulationState) {
        resize_paddles(&mut state.left_paddles, 1.0);
        resize_paddles(&mut state.right_paddles, 1.0);
        state.ball.speed = BALL_SPEED;
        state.effect = None;
    }

    fn check_goal<R: Rng + ?Sized>(
        state: &mut SimulationState,
        rng: &mut R,
        events: &mut Vec<PhysicsEvent>,
    ) {
        let scorer = if state.ball.x < 0.0 {
            Side::Right
        } else if state.ball.x > FIELD_WIDTH {
            Side::Left
        } else {
            return;
        };

        state.add_point(scorer);
        state.ball.serve(scorer.opposite(), rng);
        events.push(PhysicsEvent::Scored { side: scorer });
    }
}

fn resize_paddles(paddles: &mut [Paddle], factor: f32) {
    for paddle in paddles {
        let centre = paddle.y + paddle.height / 2.0;
        paddle.height = PADDLE_HEIGHT * factor;
        paddle.y = (centre - paddle.height / 2.0).clamp(0.0, FIELD_HEIGHT - paddle.height);
    }
}

fn circle_hits_rect(cx: f32, cy: f32, radius: f32, paddle: &Paddle) -> bool {
    let closest_x = cx.clamp(paddle.x, paddle.x + PADDLE_WIDTH);
    let closest_y = cy.clamp(paddle.y, paddle.y + paddle.height);
    let (dx, dy) = (cx - closest_x, cy - closest_y);
    dx * dx + dy * dy <= radius * radius
}
