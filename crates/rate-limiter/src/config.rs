use std::collections::HashMap;
use std::time::Duration;

use crate::Window;

/// Per-window message caps for one client class (spec §3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLimits {
	pub per_second: u32,
	pub per_minute: u32,
	pub per_hour: u32,
	pub per_day: u32,
}

impl ClassLimits {
	/// Narrowest window first, matching the tie-break rule: the first window
	/// at or above its cap is the one reported.
	pub fn windows(self) -> [(Window, u32); 4] {
		[
			(Window::Second, self.per_second),
			(Window::Minute, self.per_minute),
			(Window::Hour, self.per_hour),
			(Window::Day, self.per_day),
		]
	}
}

/// How an admission check behaves when the backing [`kv_store::KVStore`]
/// itself errors out, rather than returning a clean allow/deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterDegradation {
	/// Treat the check as passed. Appropriate for message limits when
	/// availability matters more than strict enforcement.
	FailOpen,
	/// Treat the check as denied. The default for connection admission,
	/// since an unbounded connection count under a degraded store risks
	/// resource exhaustion (spec §7).
	FailClosed,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
	pub max_connections_per_user: u32,
	pub connection_window: Duration,
	pub class_limits: HashMap<String, ClassLimits>,
	pub backoff_base: Duration,
	pub backoff_max: Duration,
	pub backoff_reset: Duration,
	pub connection_degradation: RateLimiterDegradation,
	pub message_degradation: RateLimiterDegradation,
}

impl RateLimiterConfig {
	pub fn limits_for(&self, class: &str) -> ClassLimits {
		self.class_limits.get(class).copied().unwrap_or_else(|| {
			self.class_limits.get("anonymous").copied().unwrap_or(ClassLimits {
				per_second: 1,
				per_minute: 1,
				per_hour: 1,
				per_day: 1,
			})
		})
	}

	/// `min(BASE * 2^(violations-1), MAX)`, clamping the exponent so a long
	/// unbroken streak of violations can't overflow the shift.
	pub fn backoff_for(&self, violations: u32) -> Duration {
		let exponent = violations.saturating_sub(1).min(32);
		let scaled = self.backoff_base.as_secs_f64() * 2f64.powi(exponent as i32);
		Duration::from_secs_f64(scaled.min(self.backoff_max.as_secs_f64()))
	}
}

impl Default for RateLimiterConfig {
	fn default() -> Self {
		let mut class_limits = HashMap::new();
		class_limits.insert(
			"authenticated".to_string(),
			ClassLimits {
				per_second: 10,
				per_minute: 60,
				per_hour: 1000,
				per_day: 10_000,
			},
		);
		class_limits.insert(
			"anonymous".to_string(),
			ClassLimits {
				per_second: 5,
				per_minute: 30,
				per_hour: 250,
				per_day: 2_500,
			},
		);
		Self {
			max_connections_per_user: 5,
			connection_window: Duration::from_secs(3600),
			class_limits,
			backoff_base: Duration::from_secs(2),
			backoff_max: Duration::from_secs(300),
			backoff_reset: Duration::from_secs(600),
			connection_degradation: RateLimiterDegradation::FailClosed,
			message_degradation: RateLimiterDegradation::FailClosed,
		}
	}
}
