use crate::config::ResourceLimits;
use crate::dataset::Cell;
use crate::errors::{Result, SandboxError};
use std::time::{Duration, Instant};

/// Consumed ticks between wall-clock checks.
const CLOCK_INTERVAL: u32 = 256;

/// Cooperative ceilings for one execution: instruction fuel, a wall-clock
/// deadline, a cell ceiling for every materialised Series or DataFrame, and
/// an allowance of text bytes shared by every string the script builds.
#[derive(Debug)]
pub struct Budget {
    fuel: u64,
    limit: u64,
    max_cells: usize,
    text_left: usize,
    text_limit: usize,
    deadline: Instant,
    timeout: Duration,
    since_clock: u32,
}

impl Budget {
    pub fn new(limits: &ResourceLimits) -> Self {
        let timeout = limits.timeout();
        Self {
            fuel: limits.max_instructions,
            limit: limits.max_instructions,
            max_cells: limits.max_cells,
            text_left: limits.max_text_bytes,
            text_limit: limits.max_text_bytes,
            deadline: Instant::now() + timeout,
            timeout,
            since_clock: 0,
        }
    }

    /// Spend `cost` units of fuel.
    pub fn tick(&mut self, cost: usize) -> Result<()> {
        let cost = cost.max(1) as u64;
        if cost > self.fuel {
            self.fuel = 0;
            return Err(SandboxError::ResourceExhausted(format!(
                "instruction budget of {} exhausted",
                self.limit
            )));
        }
        self.fuel -= cost;
        self.since_clock += 1;
        if self.since_clock >= CLOCK_INTERVAL || cost > 4096 {
            self.since_clock = 0;
            if Instant::now() >= self.deadline {
                return Err(SandboxError::Timeout(self.timeout));
            }
        }
        Ok(())
    }

    pub fn check_cells(&self, cells: usize) -> Result<()> {
        if cells > self.max_cells {
            return Err(SandboxError::ResourceExhausted(format!(
                "{} cells exceeds the limit of {}",
                cells, self.max_cells
            )));
        }
        Ok(())
    }

    /// Charge `bytes` of new text. Called before the string is allocated.
    pub fn charge_text(&mut self, bytes: usize) -> Result<()> {
        if bytes > self.text_left {
            self.text_left = 0;
            return Err(SandboxError::ResourceExhausted(format!(
                "text allowance of {} bytes exhausted",
                self.text_limit
            )));
        }
        self.text_left -= bytes;
        Ok(())
    }

    /// Charge `count` copies of `bytes` each.
    pub fn charge_text_copies(&mut self, bytes: usize, count: usize) -> Result<()> {
        self.charge_text(bytes.saturating_mul(count))
    }

    /// Charge `count` copies of a cell's text.
    pub fn charge_cell_copies(&mut self, cell: &Cell, count: usize) -> Result<()> {
        match cell {
            Cell::Text(t) => self.charge_text_copies(t.len(), count),
            _ => Ok(()),
        }
    }

    /// `count` copies of `cell`, charged before they are built.
    pub fn replicate(&mut self, cell: &Cell, count: usize) -> Result<Vec<Cell>> {
        self.charge_cell_copies(cell, count)?;
        Ok(vec![cell.clone(); count])
    }

    pub fn consumed(&self) -> u64 {
        self.limit - self.fuel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuel_runs_out() {
        let limits = ResourceLimits {
            max_instructions: 10,
            ..ResourceLimits::default()
        };
        let mut budget = Budget::new(&limits);
        for _ in 0..10 {
            budget.tick(1).unwrap();
        }
        let err = budget.tick(1).unwrap_err();
        assert!(err.to_string().starts_with("ResourceLimit:"));
        assert_eq!(budget.consumed(), 10);
    }

    #[test]
    fn test_deadline_reported_as_timeout() {
        let limits = ResourceLimits {
            timeout_ms: 1,
            ..ResourceLimits::default()
        };
        let mut budget = Budget::new(&limits);
        std::thread::sleep(Duration::from_millis(5));
        let err = (0..CLOCK_INTERVAL)
            .map(|_| budget.tick(1))
            .find_map(|r| r.err())
            .unwrap();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_cell_ceiling() {
        let limits = ResourceLimits {
            max_cells: 4,
            ..ResourceLimits::default()
        };
        let budget = Budget::new(&limits);
        assert!(budget.check_cells(4).is_ok());
        assert!(budget.check_cells(5).is_err());
    }

    #[test]
    fn test_text_allowance_is_cumulative() {
        let limits = ResourceLimits {
            max_text_bytes: 100,
            ..ResourceLimits::default()
        };
        let mut budget = Budget::new(&limits);
        budget.charge_text(60).unwrap();
        budget.charge_text(40).unwrap();
        let err = budget.charge_text(1).unwrap_err();
        assert!(err.to_string().starts_with("ResourceLimit:"));
        assert!(budget.charge_text_copies(usize::MAX, 2).is_err());
    }
}
