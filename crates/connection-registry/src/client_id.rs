//! Client and IP derivation from the upgrade request, grounded on
//! `file_host/src/websocket/connection/core.rs`'s `ClientId::from_request`
//! (header priority order) and its `x-forwarded-for` handling, adapted to
//! `chat-protocol`'s `ClientId`/`IpAddress` newtypes.

use std::net::IpAddr;

use chat_protocol::IpAddress;

/// Resolves the connecting peer's IP, honoring `X-Forwarded-For` only when
/// `direct_peer` is one of `trusted_proxies` (spec §10 supplement: a
/// reverse-proxy deployment must not let an untrusted client spoof its own
/// IP for rate-limit purposes).
pub fn resolve_ip(direct_peer: IpAddr, forwarded_for: Option<&str>, trusted_proxies: &[IpAddr]) -> IpAddress {
	if trusted_proxies.contains(&direct_peer) {
		if let Some(forwarded) = forwarded_for {
			if let Some(first) = forwarded.split(',').next().map(str::trim) {
				if let Ok(parsed) = first.parse::<IpAddr>() {
					return IpAddress::from(parsed);
				}
			}
		}
	}
	IpAddress::from(direct_peer)
}

/// Validates a client-supplied connection id: non-empty and within a sane
/// length bound, mirroring `ClientId::from_request`'s length guard.
pub fn validate_client_id(raw: &str) -> Option<&str> {
	let trimmed = raw.trim();
	if trimmed.is_empty() || trimmed.len() > 128 {
		None
	} else {
		Some(trimmed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn forwarded_for_is_honored_only_from_trusted_proxies() {
		let direct: IpAddr = "10.0.0.1".parse().unwrap();
		let trusted = vec![direct];
		let resolved = resolve_ip(direct, Some("203.0.113.5, 10.0.0.1"), &trusted);
		assert_eq!(resolved, IpAddress::from("203.0.113.5".parse::<IpAddr>().unwrap()));

		let resolved_untrusted = resolve_ip(direct, Some("203.0.113.5"), &[]);
		assert_eq!(resolved_untrusted, IpAddress::from(direct));
	}

	#[test]
	fn client_id_rejects_empty_and_oversized() {
		assert_eq!(validate_client_id(""), None);
		assert_eq!(validate_client_id("   "), None);
		assert_eq!(validate_client_id(&"a".repeat(200)), None);
		assert_eq!(validate_client_id("abc"), Some("abc"));
	}
}
