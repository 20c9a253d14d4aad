//! The integer timeline (spec §3 "Integer timeline", §8 property (f)).
//!
//! Time is represented as a 64-bit integer on `[0, max_nr_timesteps]`, mapped
//! linearly onto `[t_begin, t_end]`. Scheduling decisions always compare
//! integer times; floating point is used only for output and for handing
//! times to the physics collaborator.

use thiserror::Error;

pub type Ti = u64;

/// A time bin `b`: a particle on bin `b` advances in steps of `1 << b` ticks.
pub type TimeBin = u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimelineError {
    #[error("max_nr_timesteps must be a power of two, got {0}")]
    NotPowerOfTwo(u64),
    #[error("t_end ({t_end}) must be greater than t_begin ({t_begin})")]
    InvalidBounds { t_begin: f64, t_end: f64 },
    #[error("time bin {0} exceeds max_nr_timesteps exponent {1}")]
    BinOverflow(TimeBin, u32),
}

/// The linear mapping between integer ticks and physical time, plus the
/// time-bin helpers used throughout task activation and drift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeLine {
    t_begin: f64,
    t_end: f64,
    max_nr_timesteps: Ti,
    time_base: f64,
    max_bin: TimeBin,
}

impl TimeLine {
    pub fn new(t_begin: f64, t_end: f64, max_nr_timesteps: Ti) -> Result<Self, TimelineError> {
        if t_end <= t_begin {
            return Err(TimelineError::InvalidBounds { t_begin, t_end });
        }
        if max_nr_timesteps == 0 || !max_nr_timesteps.is_power_of_two() {
            return Err(TimelineError::NotPowerOfTwo(max_nr_timesteps));
        }
        let time_base = (t_end - t_begin) / max_nr_timesteps as f64;
        let max_bin = max_nr_timesteps.trailing_zeros();
        Ok(Self {
            t_begin,
            t_end,
            max_nr_timesteps,
            time_base,
            max_bin,
        })
    }

    pub fn t_begin(&self) -> f64 {
        self.t_begin
    }

    pub fn t_end(&self) -> f64 {
        self.t_end
    }

    pub fn time_base(&self) -> f64 {
        self.time_base
    }

    pub fn max_nr_timesteps(&self) -> Ti {
        self.max_nr_timesteps
    }

    pub fn max_bin(&self) -> TimeBin {
        self.max_bin
    }

    /// `ti_to_float`: integer tick -> physical time.
    pub fn ti_to_float(&self, ti: Ti) -> f64 {
        self.t_begin + ti as f64 * self.time_base
    }

    /// `float_to_ti`: physical time -> nearest integer tick on the grid.
    pub fn float_to_ti(&self, t: f64) -> Ti {
        (((t - self.t_begin) / self.time_base).round() as i64).max(0) as Ti
    }

    /// Step length in integer ticks for bin `b`: `1 << b`.
    pub fn step_size(&self, bin: TimeBin) -> Result<Ti, TimelineError> {
        if bin > self.max_bin {
            return Err(TimelineError::BinOverflow(bin, self.max_bin));
        }
        Ok(1u64 << bin)
    }

    /// The largest bin whose step size divides evenly into `dt` ticks and is
    /// no larger than `dt`; used by the timestep task to requantize a
    /// particle's desired physical step onto the integer grid.
    pub fn bin_of(&self, dt_ticks: Ti) -> TimeBin {
        if dt_ticks == 0 {
            return 0;
        }
        let bin = (63 - dt_ticks.leading_zeros()).min(self.max_bin);
        bin
    }

    /// `ti_end` for a particle currently at `ti_current` on bin `b`.
    pub fn next_end(&self, ti_current: Ti, bin: TimeBin) -> Ti {
        let step = 1u64 << bin.min(self.max_bin);
        // round up to the next multiple of `step` strictly greater than
        // ti_current, so repeated kicks land on a bin-aligned grid.
        ((ti_current / step) + 1) * step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timebase_round_trip() {
        let tl = TimeLine::new(0.0, 1.0, 1 << 28).unwrap();
        let product = tl.time_base() * tl.max_nr_timesteps() as f64;
        assert!((product - (tl.t_end() - tl.t_begin())).abs() < 1e-9);
    }

    #[test]
    fn ti_float_round_trip_on_grid() {
        let tl = TimeLine::new(0.0, 1.0, 1 << 10).unwrap();
        for ti in [0u64, 1, 512, 1023, 1024] {
            let t = tl.ti_to_float(ti);
            assert_eq!(tl.float_to_ti(t), ti);
        }
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(matches!(
            TimeLine::new(0.0, 1.0, 1000),
            Err(TimelineError::NotPowerOfTwo(1000))
        ));
    }

    #[test]
    fn step_size_doubles_per_bin() {
        let tl = TimeLine::new(0.0, 1.0, 1 << 8).unwrap();
        assert_eq!(tl.step_size(0).unwrap(), 1);
        assert_eq!(tl.step_size(3).unwrap(), 8);
        assert!(tl.step_size(tl.max_bin() + 1).is_err());
    }

    #[test]
    fn next_end_is_bin_aligned_and_strictly_greater() {
        let tl = TimeLine::new(0.0, 1.0, 1 << 8).unwrap();
        let end = tl.next_end(5, 2);
        assert!(end > 5);
        assert_eq!(end % 4, 0);
    }
}
