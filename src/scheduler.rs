use std::collections::HashMap;

use crate::node::Node;
use crate::task::Task;

/// Node selection strategy: filter the candidates, score them (lower is
/// better), pick the minimum. The three operations always run in order.
pub trait Scheduler {
    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node>;
    fn score(&self, task: &Task, candidates: &[Node]) -> HashMap<String, f64>;
    fn pick(&mut self, scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    RoundRobin,
    Epvm,
}

impl SchedulerKind {
    pub fn build(self) -> Box<dyn Scheduler + Send> {
        match self {
            SchedulerKind::RoundRobin => Box::new(RoundRobin::new()),
            SchedulerKind::Epvm => Box::new(Epvm),
        }
    }
}

/// Cycles through the workers regardless of load. The cursor's successor
/// gets the winning (lowest) score each round.
#[derive(Debug, Default)]
pub struct RoundRobin {
    pub last_worker_idx: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin { last_worker_idx: 0 }
    }
}

impl Scheduler for RoundRobin {
    fn select_candidate_nodes(&self, _task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes.to_vec()
    }

    fn score(&self, _task: &Task, candidates: &[Node]) -> HashMap<String, f64> {
        if candidates.is_empty() {
            return HashMap::new();
        }

        let successor = (self.last_worker_idx + 1) % candidates.len();
        candidates
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                let score = if idx == successor { 0.1 } else { 1.0 };
                (node.name.clone(), score)
            })
            .collect()
    }

    fn pick(&mut self, scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node> {
        let node = min_score_node(scores, candidates)?;
        self.last_worker_idx = (self.last_worker_idx + 1) % candidates.len();
        Some(node)
    }
}

/// Packs tasks by projected memory load: nodes without headroom for the
/// request are filtered out, the least-loaded survivor wins.
#[derive(Debug, Default)]
pub struct Epvm;

impl Scheduler for Epvm {
    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node> {
        let requested = task.memory.max(0) as u64;
        nodes
            .iter()
            .filter(|node| requested <= node.memory.saturating_sub(node.memory_allocated))
            .cloned()
            .collect()
    }

    fn score(&self, task: &Task, candidates: &[Node]) -> HashMap<String, f64> {
        let requested = task.memory.max(0) as u64;
        candidates
            .iter()
            .map(|node| {
                let score = if node.memory == 0 {
                    1.0
                } else {
                    (node.memory_allocated + requested) as f64 / node.memory as f64
                };
                (node.name.clone(), score)
            })
            .collect()
    }

    fn pick(&mut self, scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node> {
        min_score_node(scores, candidates)
    }
}

/// Minimum-score candidate; ties go to the earlier position.
fn min_score_node(scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node> {
    let mut best: Option<(&Node, f64)> = None;
    for node in candidates {
        let Some(&score) = scores.get(&node.name) else {
            continue;
        };
        match best {
            Some((_, best_score)) if score >= best_score => {}
            _ => best = Some((node, score)),
        }
    }
    best.map(|(node, _)| node.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, memory: u64, allocated: u64) -> Node {
        let mut n = Node::new(name, &format!("http://{name}:5555"), "worker");
        n.memory = memory;
        n.memory_allocated = allocated;
        n
    }

    fn select(scheduler: &mut dyn Scheduler, task: &Task, nodes: &[Node]) -> Option<Node> {
        let candidates = scheduler.select_candidate_nodes(task, nodes);
        if candidates.is_empty() {
            return None;
        }
        let scores = scheduler.score(task, &candidates);
        scheduler.pick(&scores, &candidates)
    }

    #[test]
    fn round_robin_visits_all_workers_before_repeating() {
        let nodes = vec![
            node("worker-0", 0, 0),
            node("worker-1", 0, 0),
            node("worker-2", 0, 0),
        ];
        let mut scheduler = RoundRobin::new();
        let task = Task::default();

        let mut picked = Vec::new();
        for _ in 0..3 {
            picked.push(select(&mut scheduler, &task, &nodes).unwrap().name);
        }

        let mut distinct = picked.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 3, "first three picks were {picked:?}");

        // The fourth pick wraps around.
        let again = select(&mut scheduler, &task, &nodes).unwrap().name;
        assert_eq!(again, picked[0]);
    }

    #[test]
    fn round_robin_keeps_every_node_as_candidate() {
        let nodes = vec![node("worker-0", 0, 0), node("worker-1", 0, 0)];
        let scheduler = RoundRobin::new();
        let task = Task {
            memory: 1 << 40,
            ..Default::default()
        };

        assert_eq!(scheduler.select_candidate_nodes(&task, &nodes).len(), 2);
    }

    #[test]
    fn epvm_filters_nodes_without_memory_headroom() {
        let gib: u64 = 1 << 30;
        let nodes = vec![
            node("small", gib, gib - 1024),
            node("big", 4 * gib, 0),
        ];
        let task = Task {
            memory: (128 * 1024 * 1024) as i64,
            ..Default::default()
        };

        let scheduler = Epvm;
        let candidates = scheduler.select_candidate_nodes(&task, &nodes);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "big");
    }

    #[test]
    fn epvm_prefers_the_least_loaded_node() {
        let gib: u64 = 1 << 30;
        let nodes = vec![
            node("busy", 4 * gib, 3 * gib),
            node("idle", 4 * gib, 0),
        ];
        let task = Task {
            memory: gib as i64 / 2,
            ..Default::default()
        };

        let mut scheduler = Epvm;
        let picked = select(&mut scheduler, &task, &nodes).unwrap();
        assert_eq!(picked.name, "idle");
    }

    #[test]
    fn epvm_returns_no_candidates_when_nothing_fits() {
        let nodes = vec![node("tiny", 1024, 1024)];
        let task = Task {
            memory: 1,
            ..Default::default()
        };

        let scheduler = Epvm;
        assert!(scheduler.select_candidate_nodes(&task, &nodes).is_empty());
    }

    #[test]
    fn ties_break_by_candidate_position() {
        let nodes = vec![node("a", 0, 0), node("b", 0, 0)];
        let scores = HashMap::from([("a".to_string(), 1.0), ("b".to_string(), 1.0)]);
        let picked = min_score_node(&scores, &nodes).unwrap();
        assert_eq!(picked.name, "a");
    }
}
