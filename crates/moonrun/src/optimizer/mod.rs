// Multi-pass bytecode optimizer. Pass order is fixed: constant folding ->
// dead code -> peephole -> jump threading -> tail calls -> register
// compaction. Passes that cannot prove a rewrite safe leave the code alone.

mod passes;

use std::rc::Rc;

use crate::lua_value::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    None,
    Basic,
    Standard,
    Aggressive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub replaced: usize,
    pub removed: usize,
}

impl PassStats {
    pub fn changed(&self) -> bool {
        self.replaced > 0 || self.removed > 0
    }

    fn add(&mut self, other: PassStats) {
        self.replaced += other.replaced;
        self.removed += other.removed;
    }
}

/// Aggregate statistics across every pass and round.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizeReport {
    pub constant_folding: PassStats,
    pub dead_code: PassStats,
    pub peephole: PassStats,
    pub jump_threading: PassStats,
    pub tail_calls: PassStats,
    pub register_compaction: PassStats,
    pub rounds: usize,
}

pub struct Optimizer {
    level: OptLevel,
    report: OptimizeReport,
}

impl Optimizer {
    pub fn new(level: OptLevel) -> Self {
        Optimizer {
            level,
            report: OptimizeReport::default(),
        }
    }

    pub fn report(&self) -> &OptimizeReport {
        &self.report
    }

    /// Optimize a prototype and, recursively, its children.
    pub fn optimize(&mut self, mut chunk: Chunk) -> Chunk {
        if self.level == OptLevel::None {
            return chunk;
        }
        let children = std::mem::take(&mut chunk.child_protos);
        chunk.child_protos = children
            .into_iter()
            .map(|child| {
                let owned = Rc::try_unwrap(child).unwrap_or_else(|rc| (*rc).clone());
                Rc::new(self.optimize(owned))
            })
            .collect();

        let max_rounds = if self.level >= OptLevel::Aggressive { 4 } else { 1 };
        for _ in 0..max_rounds {
            let mut changed = false;
            changed |= self.run_pass(&mut chunk, passes::constant_folding, |r| {
                &mut r.constant_folding
            });
            if self.level >= OptLevel::Standard {
                changed |= self.run_pass(&mut chunk, passes::dead_code, |r| &mut r.dead_code);
            }
            changed |= self.run_pass(&mut chunk, passes::peephole, |r| &mut r.peephole);
            changed |= self.run_pass(&mut chunk, passes::jump_threading, |r| {
                &mut r.jump_threading
            });
            if self.level >= OptLevel::Standard {
                changed |= self.run_pass(&mut chunk, passes::tail_calls, |r| &mut r.tail_calls);
                changed |= self.run_pass(&mut chunk, passes::register_compaction, |r| {
                    &mut r.register_compaction
                });
            }
            self.report.rounds += 1;
            if !changed {
                break;
            }
        }
        chunk
    }

    fn run_pass(
        &mut self,
        chunk: &mut Chunk,
        pass: fn(&mut Chunk) -> PassStats,
        slot: fn(&mut OptimizeReport) -> &mut PassStats,
    ) -> bool {
        let stats = pass(chunk);
        slot(&mut self.report).add(stats);
        stats.changed()
    }
}
