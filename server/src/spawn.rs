//! Spawn point and team selection for new sessions

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Team, SPAWN_MARGIN, WORLD_HEIGHT, WORLD_WIDTH};
use std::collections::VecDeque;

/// Chooses where a new session appears and which team it joins.
pub trait SpawnStrategy: Send {
    fn spawn_point(&mut self) -> (f64, f64);
    fn team(&mut self) -> Team;
}

/// Uniform spawns on whole-pixel coordinates inside the world margin
///
/// x is drawn from `[50, 750)` and y from `[50, 550)`; the team is a fair coin.
pub struct RandomSpawn {
    rng: StdRng,
}

impl RandomSpawn {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SpawnStrategy for RandomSpawn {
    fn spawn_point(&mut self) -> (f64, f64) {
        let x = self
            .rng
            .gen_range(SPAWN_MARGIN..WORLD_WIDTH as u32 - SPAWN_MARGIN);
        let y = self
            .rng
            .gen_range(SPAWN_MARGIN..WORLD_HEIGHT as u32 - SPAWN_MARGIN);
        (x as f64, y as f64)
    }

    fn team(&mut self) -> Team {
        if self.rng.gen_bool(0.5) {
            Team::Red
        } else {
            Team::Blue
        }
    }
}

/// Replays a fixed list of spawns, cycling when it runs out.
///
/// Used to make broker behaviour deterministic in tests.
pub struct FixedSpawn {
    spawns: VecDeque<(f64, f64, Team)>,
    current_team: Team,
}

impl FixedSpawn {
    pub fn new(spawns: Vec<(f64, f64, Team)>) -> Self {
        Self {
            spawns: spawns.into(),
            current_team: Team::Red,
        }
    }
}

impl SpawnStrategy for FixedSpawn {
    fn spawn_point(&mut self) -> (f64, f64) {
        match self.spawns.pop_front() {
            Some(spawn) => {
                self.spawns.push_back(spawn);
                self.current_team = spawn.2;
                (spawn.0, spawn.1)
            }
            None => (SPAWN_MARGIN as f64, SPAWN_MARGIN as f64),
        }
    }

    fn team(&mut self) -> Team {
        self.current_team
    }
}
