use jumphash::JumpHasher;
use rand::prelude::*;
use weighted_rs::{SmoothWeight, Weight};

use super::{Provider, SelectMode};

/// picks one provider out of a registry lookup.
pub trait ClientSelector: Send {
    fn select(&mut self, key: &str) -> Option<Provider>;
    fn update_server(&mut self, providers: &[Provider]);
}

pub fn new_selector(mode: SelectMode) -> Box<dyn ClientSelector> {
    match mode {
        SelectMode::First => Box::new(FirstSelector::default()),
        SelectMode::Random => Box::new(RandomSelector::default()),
        SelectMode::RoundRobin => Box::new(RoundRobinSelector::default()),
        SelectMode::WeightedRandom => Box::new(WeightedRandomSelector::default()),
        SelectMode::WeightedRoundRobin => Box::new(WeightedRoundRobinSelector::default()),
        SelectMode::ConsistentHash => Box::new(ConsistentHashSelector::default()),
    }
}

/// always the first provider, in registry order.
#[derive(Debug, Default)]
pub struct FirstSelector {
    servers: Vec<Provider>,
}

impl ClientSelector for FirstSelector {
    fn select(&mut self, _key: &str) -> Option<Provider> {
        self.servers.first().cloned()
    }
    fn update_server(&mut self, providers: &[Provider]) {
        self.servers = providers.to_vec();
    }
}

#[derive(Debug, Default)]
pub struct RandomSelector {
    servers: Vec<Provider>,
}

impl ClientSelector for RandomSelector {
    fn select(&mut self, _key: &str) -> Option<Provider> {
        self.servers.choose(&mut thread_rng()).cloned()
    }
    fn update_server(&mut self, providers: &[Provider]) {
        self.servers = providers.to_vec();
    }
}

#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    servers: Vec<Provider>,
    next: usize,
}

impl ClientSelector for RoundRobinSelector {
    fn select(&mut self, _key: &str) -> Option<Provider> {
        if self.servers.is_empty() {
            return None;
        }
        let s = self.servers[self.next % self.servers.len()].clone();
        self.next = self.next.wrapping_add(1);
        Some(s)
    }
    fn update_server(&mut self, providers: &[Provider]) {
        self.servers = providers.to_vec();
    }
}

/// random in proportion to provider weight; uniform when no weight is positive.
#[derive(Debug, Default)]
pub struct WeightedRandomSelector {
    servers: Vec<Provider>,
}

impl ClientSelector for WeightedRandomSelector {
    fn select(&mut self, _key: &str) -> Option<Provider> {
        let mut rng = thread_rng();
        let total: f64 = self.servers.iter().map(|s| s.weight.max(0.0)).sum();
        if total <= 0.0 {
            return self.servers.choose(&mut rng).cloned();
        }
        let mut point = rng.gen_range(0.0..total);
        for s in &self.servers {
            let w = s.weight.max(0.0);
            if point < w {
                return Some(s.clone());
            }
            point -= w;
        }
        self.servers.last().cloned()
    }
    fn update_server(&mut self, providers: &[Provider]) {
        self.servers = providers.to_vec();
    }
}

pub struct WeightedRoundRobinSelector {
    servers: Vec<Provider>,
    sw: SmoothWeight<usize>,
}

impl Default for WeightedRoundRobinSelector {
    fn default() -> Self {
        WeightedRoundRobinSelector {
            servers: Vec::new(),
            sw: SmoothWeight::new(),
        }
    }
}

impl ClientSelector for WeightedRoundRobinSelector {
    fn select(&mut self, _key: &str) -> Option<Provider> {
        let idx = self.sw.next()?;
        self.servers.get(idx).cloned()
    }
    fn update_server(&mut self, providers: &[Provider]) {
        self.servers = providers.to_vec();
        self.sw = SmoothWeight::new();
        for (i, p) in self.servers.iter().enumerate() {
            // registry weights may be fractional
            let w = ((p.weight * 100.0).round() as isize).max(1);
            self.sw.add(i, w);
        }
    }
}

/// the same key lands on the same provider while the provider set is stable.
#[derive(Debug, Default)]
pub struct ConsistentHashSelector {
    servers: Vec<Provider>,
}

impl ClientSelector for ConsistentHashSelector {
    fn select(&mut self, key: &str) -> Option<Provider> {
        if self.servers.is_empty() {
            return None;
        }
        let jh = JumpHasher::new();
        let idx = jh.slot(&key, self.servers.len() as u32) as usize;
        self.servers.get(idx).cloned()
    }
    fn update_server(&mut self, providers: &[Provider]) {
        self.servers = providers.to_vec();
    }
}
