//! Back-off switch for streaming reads.
//!
//! After a streaming failure the switch turns streaming off for a window that
//! grows with each consecutive failure; callers use the one-shot read meanwhile.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Initial streaming back-off after the first failure.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Back-off stops growing once it reaches this.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);
/// Growth factor between consecutive failures.
pub const BACKOFF_MULTIPLIER: f64 = 1.6;
/// Errors reported this soon after a window ends still belong to it.
const REPORT_GRACE: Duration = Duration::from_millis(500);

struct SwitchState {
	backoff: ExponentialBackoff,
	back_off_until: Option<Instant>,
}

pub struct StreamSwitch {
	state: Mutex<SwitchState>,
}

impl Default for StreamSwitch {
	fn default() -> Self {
		Self::new()
	}
}

impl StreamSwitch {
	pub fn new() -> Self {
		let backoff = ExponentialBackoffBuilder::new()
			.with_initial_interval(INITIAL_BACKOFF)
			.with_multiplier(BACKOFF_MULTIPLIER)
			.with_randomization_factor(0.0)
			.with_max_interval(MAX_BACKOFF)
			.with_max_elapsed_time(None)
			.build();

		Self {
			state: Mutex::new(SwitchState {
				backoff,
				back_off_until: None,
			}),
		}
	}

	/// Whether streaming should be attempted now. Clears an expired window.
	pub fn enabled(&self) -> bool {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		match state.back_off_until {
			None => true,
			Some(until) if Instant::now() >= until => {
				state.back_off_until = None;
				true
			}
			Some(_) => false,
		}
	}

	/// Record a streaming failure and open (or grow) the back-off window.
	pub fn report_error(&self, error: &dyn std::fmt::Display) {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		let now = Instant::now();
		if let Some(until) = state.back_off_until {
			if now < until + REPORT_GRACE {
				debug!("Streaming error during active back-off ignored: {}", error);
				return;
			}
		}

		let window = state.backoff.next_backoff().unwrap_or(MAX_BACKOFF);
		state.back_off_until = Some(now + window);
		warn!(
			"Streaming read failed, disabling streaming for {:?}: {}",
			window, error
		);
	}

	/// Record a successful stream; the next failure starts from the initial window.
	pub fn report_success(&self) {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		state.back_off_until = None;
		state.backoff.reset();
	}
}
