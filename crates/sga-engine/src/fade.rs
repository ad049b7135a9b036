//! Fade scheduler
//!
//! Linear value ramps advanced once per tick. Records live in a reusable
//! slot list: a new fade takes the first inactive record, else appends.

use std::fmt;

/// Called once when a fade or glide completes
pub type FadeCallback = Box<dyn FnOnce()>;

/// Post-fade policy and completion callback
#[derive(Default)]
pub struct FadeOptions {
    /// Stop the faded entity's voices when the fade completes
    pub stop_after: bool,
    /// Put the pre-fade value back when the fade completes
    pub restore_after: bool,
    pub on_complete: Option<FadeCallback>,
}

impl FadeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_after(mut self) -> Self {
        self.stop_after = true;
        self
    }

    pub fn restore_after(mut self) -> Self {
        self.restore_after = true;
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for FadeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FadeOptions")
            .field("stop_after", &self.stop_after)
            .field("restore_after", &self.restore_after)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

struct FadeRecord<T> {
    target: T,
    start_value: f32,
    target_value: f32,
    start_time: f64,
    end_time: f64,
    restore_value: f32,
    stop_after: bool,
    restore_after: bool,
    callback: Option<FadeCallback>,
    active: bool,
}

impl<T> FadeRecord<T> {
    fn value_at(&self, now: f64) -> f32 {
        let span = self.end_time - self.start_time;
        let t = if span > 0.0 {
            ((now - self.start_time) / span).clamp(0.0, 1.0) as f32
        } else {
            1.0
        };
        let lo = self.start_value.min(self.target_value);
        let hi = self.start_value.max(self.target_value);
        (self.start_value + (self.target_value - self.start_value) * t).clamp(lo, hi)
    }
}

/// A finished fade, handed back for its policies to be applied
pub struct FadeCompletion<T> {
    pub target: T,
    /// Final value, exactly the fade target
    pub value: f32,
    /// Stop the entity's voices
    pub stop: bool,
    /// Value to restore, when the restore policy applies
    pub restore_to: Option<f32>,
    pub callback: Option<FadeCallback>,
}

impl<T> FadeCompletion<T> {
    /// Completion for a fade of zero length
    pub fn immediate(target: T, from: f32, to: f32, options: FadeOptions, stop_at_zero: bool) -> Self {
        resolve_policy(target, from, to, options.stop_after, options.restore_after, options.on_complete, stop_at_zero)
    }

    /// Fire the callback, if any
    pub fn notify(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

fn resolve_policy<T>(
    target: T,
    restore_value: f32,
    value: f32,
    stop_after: bool,
    restore_after: bool,
    callback: Option<FadeCallback>,
    stop_at_zero: bool,
) -> FadeCompletion<T> {
    let stop = stop_after || (stop_at_zero && value == 0.0);
    FadeCompletion {
        target,
        value,
        stop,
        restore_to: (!stop && restore_after).then_some(restore_value),
        callback,
    }
}

/// Output of one scheduler pass
pub struct FadeTick<T> {
    /// Current value of every fade still running
    pub values: Vec<(T, f32)>,
    pub completed: Vec<FadeCompletion<T>>,
}

impl<T> Default for FadeTick<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            completed: Vec::new(),
        }
    }
}

/// Reusable fade records for one kind of target
pub struct FadePool<T> {
    records: Vec<FadeRecord<T>>,
}

impl<T> Default for FadePool<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T: Copy + PartialEq> FadePool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fade from `from` to `to` over `secs`.
    ///
    /// Any fade already running on `target` is dropped without its callback.
    pub fn start(&mut self, target: T, from: f32, to: f32, now: f64, secs: f32, options: FadeOptions) {
        self.cancel(target);
        let record = FadeRecord {
            target,
            start_value: from,
            target_value: to,
            start_time: now,
            end_time: now + f64::from(secs.max(0.0)),
            restore_value: from,
            stop_after: options.stop_after,
            restore_after: options.restore_after,
            callback: options.on_complete,
            active: true,
        };
        match self.records.iter_mut().find(|r| !r.active) {
            Some(slot) => *slot = record,
            None => self.records.push(record),
        }
    }

    /// Drop the fade on `target` without firing its callback
    pub fn cancel(&mut self, target: T) -> bool {
        self.cancel_where(|t| t == target) > 0
    }

    /// Drop every fade whose target matches
    pub fn cancel_where(&mut self, mut pred: impl FnMut(T) -> bool) -> usize {
        let mut cancelled = 0;
        for record in self.records.iter_mut().filter(|r| r.active && pred(r.target)) {
            record.active = false;
            record.callback = None;
            cancelled += 1;
        }
        cancelled
    }

    pub fn is_active(&self, target: T) -> bool {
        self.records.iter().any(|r| r.active && r.target == target)
    }

    /// Target value of the running fade on `target`
    pub fn target_value(&self, target: T) -> Option<f32> {
        self.records
            .iter()
            .find(|r| r.active && r.target == target)
            .map(|r| r.target_value)
    }

    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.active).count()
    }

    /// Records allocated so far, active or not
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Advance every active fade to `now`.
    ///
    /// `stop_at_zero` turns a completed fade to 0.0 into a stop.
    pub fn advance(&mut self, now: f64, stop_at_zero: bool) -> FadeTick<T> {
        let mut tick = FadeTick::default();
        for record in self.records.iter_mut().filter(|r| r.active) {
            if now >= record.end_time {
                record.active = false;
                tick.completed.push(resolve_policy(
                    record.target,
                    record.restore_value,
                    record.target_value,
                    record.stop_after,
                    record.restore_after,
                    record.callback.take(),
                    stop_at_zero,
                ));
            } else {
                tick.values.push((record.target, record.value_at(now)));
            }
        }
        tick
    }
}
