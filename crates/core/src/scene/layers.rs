use kurbo::{Point, Vec2};

use crate::{assets::Rgba, config::ColorScheme};

/// Golden-ratio step used to scatter spawn points without a random source.
const GOLDEN: f64 = 0.618_033_988_749_895;

#[derive(Debug, Clone, Copy, PartialEq)]
struct PhaseAnchor {
    elapsed: f64,
    beats: f64,
    bpm: f32,
}

/// Background gradient cycling once per beat.
///
/// The phase is measured from an anchor so it stays continuous when the tempo
/// changes: at constant tempo it is exactly `(elapsed * bpm / 60) mod 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientState {
    pub color_pair: (Rgba, Rgba),
    /// Degrees in `[0, 360)`.
    pub angle: f32,
    pub bpm_sync: bool,
    phase: f64,
    anchor: Option<PhaseAnchor>,
}

impl GradientState {
    pub fn new(color_pair: (Rgba, Rgba), angle: f32, bpm_sync: bool) -> Self {
        Self {
            color_pair,
            angle,
            bpm_sync,
            phase: 0.0,
            anchor: None,
        }
    }

    /// Current animation phase in `[0, 1)`.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.anchor = None;
    }

    /// Moves the phase to playback time `elapsed` at `bpm`.
    pub fn advance(&mut self, elapsed: f64, bpm: f32) {
        if !(bpm > 0.0 && bpm.is_finite()) || !elapsed.is_finite() {
            return;
        }
        let anchor = match self.anchor {
            None => PhaseAnchor {
                elapsed: 0.0,
                beats: 0.0,
                bpm,
            },
            Some(anchor) if (anchor.bpm - bpm).abs() > f32::EPSILON => PhaseAnchor {
                elapsed,
                beats: beats_at(anchor, elapsed).fract(),
                bpm,
            },
            Some(anchor) => anchor,
        };
        self.anchor = Some(anchor);
        self.phase = wrap_unit(beats_at(anchor, elapsed));
    }
}

fn beats_at(anchor: PhaseAnchor, elapsed: f64) -> f64 {
    anchor.beats + (elapsed - anchor.elapsed) * f64::from(anchor.bpm) / 60.0
}

fn wrap_unit(value: f64) -> f64 {
    let wrapped = value.rem_euclid(1.0);
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// Per-bin bar heights on the byte scale (0..=255), decaying towards the
/// latest spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct EqualizerState {
    bar_heights: Vec<f32>,
    smoothing: f32,
}

impl EqualizerState {
    pub fn new(smoothing: f32) -> Self {
        Self {
            bar_heights: Vec::new(),
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn bar_heights(&self) -> &[f32] {
        &self.bar_heights
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.bar_heights.clear();
    }

    /// `h = s * h' + (1 - s) * f` per bar. A change in bin count starts the
    /// bars from zero.
    pub fn advance(&mut self, frequency_data: &[u8]) {
        if self.bar_heights.len() != frequency_data.len() {
            self.bar_heights = vec![0.0; frequency_data.len()];
        }
        let s = self.smoothing;
        for (height, &value) in self.bar_heights.iter_mut().zip(frequency_data) {
            *height = s * *height + (1.0 - s) * f32::from(value);
        }
    }
}

/// A moving light in normalised surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Point,
    /// Fraction of the shorter surface side.
    pub radius: f64,
    pub color: Rgba,
    /// Normalised units per second.
    pub velocity: Vec2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotlightState {
    pub lights: Vec<Light>,
    /// Energy scaled by sensitivity, in `[0, 1]`.
    pub intensity: f32,
}

impl SpotlightState {
    pub fn new(colors: &ColorScheme) -> Self {
        let palette = [colors.primary, colors.secondary, colors.accent];
        let lights = palette
            .iter()
            .enumerate()
            .map(|(i, &color)| {
                let t = i as f64;
                let angle = std::f64::consts::TAU * (t * GOLDEN).fract();
                Light {
                    position: Point::new(0.25 + 0.25 * t, 0.3 + 0.2 * t),
                    radius: 0.25 + 0.05 * t,
                    color,
                    velocity: Vec2::from_angle(angle) * 0.15,
                }
            })
            .collect();
        Self {
            lights,
            intensity: 0.0,
        }
    }

    pub fn set_colors(&mut self, colors: &ColorScheme) {
        let palette = [colors.primary, colors.secondary, colors.accent];
        for (light, &color) in self.lights.iter_mut().zip(palette.iter().cycle()) {
            light.color = color;
        }
    }

    /// Integrates every light by `dt` seconds, reflecting off the unit square.
    pub fn advance(&mut self, dt: f64, energy: f32, sensitivity: f32) {
        self.intensity = (energy * sensitivity).clamp(0.0, 1.0);
        if !(dt > 0.0) {
            return;
        }
        for light in &mut self.lights {
            let next = light.position + light.velocity * dt;
            let (x, vx) = reflect(next.x, light.velocity.x);
            let (y, vy) = reflect(next.y, light.velocity.y);
            light.position = Point::new(x, y);
            light.velocity = Vec2::new(vx, vy);
        }
    }
}

/// Folds `pos` back into `[0, 1]`, flipping `vel` when it crossed a bound.
fn reflect(pos: f64, vel: f64) -> (f64, f64) {
    if pos < 0.0 {
        ((-pos).min(1.0), vel.abs())
    } else if pos > 1.0 {
        ((2.0 - pos).max(0.0), -vel.abs())
    } else {
        (pos, vel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub position: Point,
    pub velocity: Vec2,
    /// Remaining life in `[0, 1]`; the particle is removed at zero.
    pub life: f32,
}

/// Foreground sparks spawned in proportion to the audio energy.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    pub particles: Vec<Particle>,
    pub capacity: usize,
    spawn_budget: f64,
    spawned: u64,
}

impl ParticleState {
    /// Spawn rate at full energy, per second.
    pub const MAX_RATE: f64 = 120.0;
    /// Seconds a particle lives.
    pub const LIFETIME: f64 = 1.5;

    pub fn new(capacity: usize) -> Self {
        Self {
            particles: Vec::with_capacity(capacity),
            capacity,
            spawn_budget: 0.0,
            spawned: 0,
        }
    }

    /// Removes every particle and restarts the spawn sequence.
    pub fn reset(&mut self) {
        self.particles.clear();
        self.spawn_budget = 0.0;
        self.spawned = 0;
    }

    pub fn advance(&mut self, dt: f64, energy: f32, sensitivity: f32) {
        if !(dt > 0.0) {
            return;
        }
        let fade = (dt / Self::LIFETIME) as f32;
        for particle in &mut self.particles {
            particle.position += particle.velocity * dt;
            particle.life -= fade;
        }
        self.particles
            .retain(|p| p.life > 0.0 && (-0.1..=1.1).contains(&p.position.y));

        let drive = f64::from((energy * sensitivity).clamp(0.0, 1.0));
        self.spawn_budget += drive * Self::MAX_RATE * dt;
        while self.spawn_budget >= 1.0 {
            self.spawn_budget -= 1.0;
            if self.particles.len() >= self.capacity {
                continue;
            }
            let particle = self.spawn(drive);
            self.particles.push(particle);
        }
    }

    fn spawn(&mut self, drive: f64) -> Particle {
        self.spawned += 1;
        let u = (self.spawned as f64 * GOLDEN).fract();
        Particle {
            position: Point::new(u, 1.0),
            velocity: Vec2::new((u - 0.5) * 0.2, -(0.2 + 0.4 * drive)),
            life: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_matches_closed_form_at_constant_tempo() {
        let mut gradient = GradientState::new((Rgba::BLACK, Rgba::WHITE), 0.0, true);
        for bpm in [60.0f32, 97.3, 120.0, 174.0] {
            gradient.reset();
            for step in 0..500 {
                let t = step as f64 * 0.0137;
                gradient.advance(t, bpm);
                let expected = (t * f64::from(bpm) / 60.0).rem_euclid(1.0);
                let diff = (gradient.phase() - expected).abs();
                assert!(diff < 1e-9 || (1.0 - diff) < 1e-9, "bpm {bpm} t {t}");
            }
        }
    }

    #[test]
    fn one_beat_at_120_bpm_wraps_to_zero() {
        let mut gradient = GradientState::new((Rgba::BLACK, Rgba::WHITE), 0.0, true);
        gradient.advance(0.5, 120.0);
        assert_eq!(gradient.phase(), 0.0);
        gradient.advance(0.625, 120.0);
        assert!((gradient.phase() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn tempo_change_keeps_the_phase_continuous() {
        let mut gradient = GradientState::new((Rgba::BLACK, Rgba::WHITE), 0.0, true);
        gradient.advance(1.1, 120.0);
        let before = gradient.phase();
        gradient.advance(1.1, 90.0);
        assert!((gradient.phase() - before).abs() < 1e-12);
        gradient.advance(1.6, 90.0);
        assert!((gradient.phase() - (before + 0.75).fract()).abs() < 1e-9);
    }

    #[test]
    fn zero_smoothing_copies_the_spectrum() {
        let mut eq = EqualizerState::new(0.0);
        eq.advance(&[128, 255, 64, 0]);
        assert_eq!(eq.bar_heights(), &[128.0, 255.0, 64.0, 0.0]);
    }

    #[test]
    fn smoothing_decays_towards_the_spectrum() {
        let mut eq = EqualizerState::new(0.5);
        eq.advance(&[200, 100]);
        assert_eq!(eq.bar_heights(), &[100.0, 50.0]);
        eq.advance(&[0, 100]);
        assert_eq!(eq.bar_heights(), &[50.0, 75.0]);

        eq.set_smoothing(1.0);
        eq.advance(&[255, 255]);
        assert_eq!(eq.bar_heights(), &[50.0, 75.0]);

        eq.advance(&[1, 2, 3]);
        assert_eq!(eq.bar_heights(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn lights_reflect_at_the_bounds() {
        let mut spot = SpotlightState::new(&ColorScheme::default());
        spot.lights[0].position = Point::new(0.95, 0.5);
        spot.lights[0].velocity = Vec2::new(1.0, 0.0);

        spot.advance(0.1, 0.5, 1.0);
        let light = spot.lights[0];
        assert!((light.position.x - 0.95).abs() < 1e-9);
        assert_eq!(light.velocity.x, -1.0);
        assert!((spot.intensity - 0.5).abs() < 1e-6);

        for _ in 0..1000 {
            spot.advance(0.033, 1.0, 3.0);
        }
        for light in &spot.lights {
            assert!((0.0..=1.0).contains(&light.position.x));
            assert!((0.0..=1.0).contains(&light.position.y));
        }
        assert_eq!(spot.intensity, 1.0);
    }

    #[test]
    fn particles_follow_energy_and_respect_capacity() {
        let mut particles = ParticleState::new(16);
        particles.advance(1.0 / 60.0, 0.0, 1.0);
        assert!(particles.particles.is_empty());

        for _ in 0..120 {
            particles.advance(1.0 / 60.0, 1.0, 1.0);
            assert!(particles.particles.len() <= 16);
        }
        assert_eq!(particles.particles.len(), 16);

        for _ in 0..200 {
            particles.advance(1.0 / 60.0, 0.0, 1.0);
        }
        assert!(particles.particles.is_empty());
    }
}
