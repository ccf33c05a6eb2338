//! Synthetic fleet generator
//!
//! Produces deterministic AIS traffic for a given seed:
//! - Transiting vessels on dead-reckoned straight legs
//! - Rendezvous pairs loitering together at a shared point
//! - Gaussian position noise on every report

use chrono::{DateTime, Duration, Utc};
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use anyhow::{ensure, Result};
use rand_distr::{Distribution, Normal};
use ship2ship_core::geometry::DEGREES_PER_METRE;
use ship2ship_core::types::KNOTS_TO_KMPH;
use ship2ship_core::{Ping, VesselId};

/// First MMSI handed out to simulated vessels.
pub const BASE_MMSI: u64 = 200_000_000;

/// AIS navigational status: under way using engine
const STATUS_UNDER_WAY: i32 = 0;

/// AIS navigational status: at anchor
const STATUS_AT_ANCHOR: i32 = 1;

/// Shape of the simulated traffic.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Total vessels, rendezvous participants included
    pub vessels: usize,

    /// Position reports per vessel
    pub pings_per_vessel: usize,

    /// Seconds between reports (default: 60)
    pub interval_secs: i64,

    /// Time of the first report
    pub start: DateTime<Utc>,

    /// Centre of the traffic area [longitude, latitude]
    pub origin: Vector2<f64>,

    /// Half-width of the traffic area in degrees (default: 0.5)
    pub spread_deg: f64,

    /// Vessel pairs that meet and loiter together (default: 1)
    pub rendezvous_pairs: usize,

    /// Position noise standard deviation in metres (default: 5)
    pub position_noise_m: f64,
}

impl FleetConfig {
    pub fn new(vessels: usize, pings_per_vessel: usize, start: DateTime<Utc>) -> Self {
        Self {
            vessels,
            pings_per_vessel,
            interval_secs: 60,
            start,
            origin: Vector2::new(3.5, 52.0),
            spread_deg: 0.5,
            rendezvous_pairs: 1,
            position_noise_m: 5.0,
        }
    }

    pub fn with_rendezvous_pairs(mut self, pairs: usize) -> Self {
        self.rendezvous_pairs = pairs;
        self
    }

    pub fn with_interval(mut self, interval_secs: i64) -> Self {
        self.interval_secs = interval_secs;
        self
    }
}

/// Ground truth for one simulated vessel.
#[derive(Debug, Clone)]
pub struct SimulatedVessel {
    pub id: VesselId,
    pub name: String,

    /// Position [longitude, latitude] in degrees
    pub position: Vector2<f64>,

    /// Speed over ground in km/h
    pub speed_kmph: f64,

    /// Course in degrees clockwise from north
    pub heading_deg: f64,

    /// Loitering at a rendezvous point
    pub loitering: bool,
}

impl SimulatedVessel {
    /// Planar velocity [east, north] in m/s.
    pub fn velocity_mps(&self) -> Vector2<f64> {
        let speed = self.speed_kmph * 1000.0 / 3600.0;
        let heading = self.heading_deg.to_radians();
        Vector2::new(speed * heading.sin(), speed * heading.cos())
    }
}

/// Deterministic fleet simulation.
pub struct FleetSimulator {
    config: FleetConfig,
    rng: ChaCha8Rng,
    noise: Normal<f64>,
    vessels: Vec<SimulatedVessel>,
    now: DateTime<Utc>,
}

impl FleetSimulator {
    /// Spawns the fleet from `seed`.
    ///
    /// # Errors
    /// Fails when the position noise is negative or not finite.
    pub fn new(seed: u64, config: FleetConfig) -> Result<Self> {
        ensure!(
            config.position_noise_m.is_finite() && config.position_noise_m >= 0.0,
            "position noise must be a non-negative distance, got {} m",
            config.position_noise_m
        );
        let noise = Normal::new(0.0, config.position_noise_m * DEGREES_PER_METRE)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let rendezvous = config.rendezvous_pairs.min(config.vessels / 2);
        let mut vessels = Vec::with_capacity(config.vessels);

        for pair in 0..rendezvous {
            let meeting = Self::random_position(&mut rng, &config);
            let drift_heading = rng.gen_range(0.0..360.0);
            for member in 0..2 {
                let index = pair * 2 + member;
                vessels.push(SimulatedVessel {
                    id: VesselId(BASE_MMSI + index as u64),
                    name: format!("SIM VESSEL {}", index),
                    position: meeting,
                    speed_kmph: 0.5,
                    heading_deg: drift_heading,
                    loitering: true,
                });
            }
        }

        for index in rendezvous * 2..config.vessels {
            let position = Self::random_position(&mut rng, &config);
            vessels.push(SimulatedVessel {
                id: VesselId(BASE_MMSI + index as u64),
                name: format!("SIM VESSEL {}", index),
                position,
                speed_kmph: rng.gen_range(10.0..35.0),
                heading_deg: rng.gen_range(0.0..360.0),
                loitering: false,
            });
        }

        let now = config.start;
        Ok(Self {
            config,
            rng,
            noise,
            vessels,
            now,
        })
    }

    fn random_position(rng: &mut ChaCha8Rng, config: &FleetConfig) -> Vector2<f64> {
        let spread = config.spread_deg;
        config.origin + Vector2::new(rng.gen_range(-spread..spread), rng.gen_range(-spread..spread))
    }

    pub fn vessels(&self) -> &[SimulatedVessel] {
        &self.vessels
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Advances every vessel by `dt_secs` of dead reckoning.
    pub fn step(&mut self, dt_secs: i64) {
        self.now = self.now + Duration::seconds(dt_secs);
        for vessel in &mut self.vessels {
            let displacement_m = vessel.velocity_mps() * dt_secs as f64;
            vessel.position += displacement_m * DEGREES_PER_METRE;
        }
    }

    /// One noisy position report per vessel at the current time.
    pub fn reports(&mut self) -> Vec<Ping> {
        let noise = self.noise;
        let now = self.now;
        let rng = &mut self.rng;

        self.vessels
            .iter()
            .map(|vessel| Ping {
                vessel_id: vessel.id,
                vessel_name: vessel.name.clone(),
                call_sign: None,
                timestamp: now,
                latitude: vessel.position.y + noise.sample(rng),
                longitude: vessel.position.x + noise.sample(rng),
                speed_over_ground: vessel.speed_kmph / KNOTS_TO_KMPH,
                heading: vessel.heading_deg,
                status: Some(if vessel.loitering {
                    STATUS_AT_ANCHOR
                } else {
                    STATUS_UNDER_WAY
                }),
            })
            .collect()
    }

    /// Runs the whole simulation, reporting before each step.
    pub fn run(mut self) -> Vec<Ping> {
        let mut pings = Vec::with_capacity(self.config.vessels * self.config.pings_per_vessel);
        for _ in 0..self.config.pings_per_vessel {
            pings.extend(self.reports());
            self.step(self.config.interval_secs);
        }
        pings
    }
}
