//! Key namespace builders, verbatim from
//! `original_source/backend/app/core/websocket_rate_limiter.py`'s key
//! formatting (`ws:conn:{user}:{ip}:{client}` and siblings), so that a
//! Redis `KEYS ws:*` inspection during an incident matches what the
//! original gateway produced.

pub fn identity(user_id: &str, ip: &str, client_id: &str) -> String {
	format!("{user_id}:{ip}:{client_id}")
}

pub fn conn_key(user_id: &str, ip: &str, client_id: &str) -> String {
	format!("ws:conn:{user_id}:{ip}:{client_id}")
}

pub fn conn_count_key(user_id: &str) -> String {
	format!("ws:conn_count:{user_id}")
}

pub fn msg_key(user_id: &str, ip: &str, client_id: &str, window: &str) -> String {
	format!("ws:msg:{user_id}:{ip}:{client_id}:{window}")
}

pub fn violations_key(identity: &str) -> String {
	format!("ws:violations:{identity}")
}

pub fn backoff_key(identity: &str) -> String {
	format!("ws:backoff:{identity}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_match_the_documented_namespace() {
		assert_eq!(conn_key("u", "1.2.3.4", "c"), "ws:conn:u:1.2.3.4:c");
		assert_eq!(conn_count_key("u"), "ws:conn_count:u");
		assert_eq!(msg_key("u", "1.2.3.4", "c", "second"), "ws:msg:u:1.2.3.4:c:second");
		assert_eq!(violations_key("u:1.2.3.4:c"), "ws:violations:u:1.2.3.4:c");
		assert_eq!(backoff_key("u:1.2.3.4:c"), "ws:backoff:u:1.2.3.4:c");
	}
}
